//! Markdown link references.
//!
//! Red links point at pages that do not exist yet (`[text](/create/{slug})`),
//! blue links at pages that do (`[text](/wiki/{slug})`). Links are never
//! persisted; they are found by pattern-matching the markdown on demand.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::LazyLock;

const LINK_PATTERN: &str = r"\[([^\]]+)\]\(/(create|wiki)/([^)\s]+)\)";

static LINK_RE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(LINK_PATTERN));

fn link_regex() -> Result<&'static Regex> {
    LINK_RE
        .as_ref()
        .map_err(|e| anyhow!("invalid link pattern: {}", e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Red,
    Blue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRef {
    pub kind: LinkKind,
    pub text: String,
    pub slug: String,
    /// Byte range of the whole `[text](...)` in the markdown.
    pub start: usize,
    pub end: usize,
}

/// Every red and blue link, in document order.
pub fn extract_links(markdown: &str) -> Result<Vec<LinkRef>> {
    let links = link_regex()?
        .captures_iter(markdown)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let kind = match caps.get(2)?.as_str() {
                "create" => LinkKind::Red,
                _ => LinkKind::Blue,
            };
            Some(LinkRef {
                kind,
                text: caps.get(1)?.as_str().to_string(),
                slug: caps.get(3)?.as_str().to_string(),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect();
    Ok(links)
}

/// The first red link to `target_slug`.
pub fn find_red_link(markdown: &str, target_slug: &str) -> Result<Option<LinkRef>> {
    Ok(extract_links(markdown)?
        .into_iter()
        .find(|l| l.kind == LinkKind::Red && l.slug == target_slug))
}

/// Up to `radius` characters on each side of the link, formatted as
/// `before[text]after`.
pub fn link_context(markdown: &str, link: &LinkRef, radius: usize) -> String {
    let before = &markdown[..link.start];
    let after = &markdown[link.end..];

    let before_start = before
        .char_indices()
        .rev()
        .nth(radius.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let before = if radius == 0 { "" } else { &before[before_start..] };

    let after_end = after
        .char_indices()
        .nth(radius)
        .map(|(i, _)| i)
        .unwrap_or(after.len());

    format!("{}[{}]{}", before, link.text, &after[..after_end])
}

/// Rewrite every red link to `target_slug` as a blue link to `result_slug`,
/// keeping the link text. `None` when there was nothing to rewrite.
pub fn replace_red_link(
    markdown: &str,
    target_slug: &str,
    result_slug: &str,
) -> Result<Option<String>> {
    let links: Vec<LinkRef> = extract_links(markdown)?
        .into_iter()
        .filter(|l| l.kind == LinkKind::Red && l.slug == target_slug)
        .collect();
    if links.is_empty() {
        return Ok(None);
    }

    let mut out = String::with_capacity(markdown.len());
    let mut cursor = 0;
    for link in &links {
        out.push_str(&markdown[cursor..link.start]);
        out.push_str(&format!("[{}](/wiki/{})", link.text, result_slug));
        cursor = link.end;
    }
    out.push_str(&markdown[cursor..]);
    Ok(Some(out))
}

/// Request slugs must be non-empty and free of whitespace and path
/// separators.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 200
        && !slug
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\' || c == '(' || c == ')')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "토성의 위성 중 [타이탄과 그 너머의 개척자들](/create/pioneers-of-titan-and-beyond)은 \
[빛의 속도 한계](/wiki/light-speed-limit)를 받아들였다.";

    #[test]
    fn test_extract_links_both_kinds() {
        let links = extract_links(SOURCE).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].kind, LinkKind::Red);
        assert_eq!(links[0].text, "타이탄과 그 너머의 개척자들");
        assert_eq!(links[0].slug, "pioneers-of-titan-and-beyond");
        assert_eq!(links[1].kind, LinkKind::Blue);
        assert_eq!(links[1].slug, "light-speed-limit");
    }

    #[test]
    fn test_link_regex_compiled_once() {
        let first = link_regex().unwrap();
        let second = link_regex().unwrap();
        assert!(std::ptr::eq(first, second));
        for _ in 0..3 {
            assert_eq!(extract_links(SOURCE).unwrap().len(), 2);
        }
    }

    #[test]
    fn test_find_red_link_ignores_blue() {
        assert!(find_red_link(SOURCE, "light-speed-limit").unwrap().is_none());
        assert!(find_red_link(SOURCE, "pioneers-of-titan-and-beyond")
            .unwrap()
            .is_some());
        assert!(find_red_link(SOURCE, "pioneers-of-titan").unwrap().is_none());
    }

    #[test]
    fn test_context_counts_chars() {
        let md = "가나다라마[링크](/create/x)바사아자차";
        let link = find_red_link(md, "x").unwrap().unwrap();
        assert_eq!(link_context(md, &link, 2), "라마[링크]바사");
        assert_eq!(link_context(md, &link, 100), "가나다라마[링크]바사아자차");
        assert_eq!(link_context(md, &link, 0), "[링크]");
    }

    #[test]
    fn test_replace_red_link_all_occurrences() {
        let md = "[a](/create/t) and again [A](/create/t) but not [b](/create/u)";
        let out = replace_red_link(md, "t", "titan-1").unwrap().unwrap();
        assert_eq!(
            out,
            "[a](/wiki/titan-1) and again [A](/wiki/titan-1) but not [b](/create/u)"
        );
        assert!(replace_red_link(&out, "t", "titan-1").unwrap().is_none());
    }

    #[test]
    fn test_slug_validation() {
        assert!(is_valid_slug("pioneers-of-titan"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("a b"));
        assert!(!is_valid_slug("a/b"));
    }
}
