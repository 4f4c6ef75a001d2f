//! `exopedia seed`: persist a page from a markdown file.
//!
//! Seed pages bootstrap the wiki; every later page grows out of their red
//! links. Title and summary are taken from the flags when given, otherwise
//! from the file's first heading and first prose paragraph.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::embedding;
use crate::models::NewPage;
use crate::prompts::truncate_chars;
use crate::services::open_page_store;

const SUMMARY_CHARS: usize = 300;

pub async fn run_seed(
    config: &Config,
    file: &Path,
    slug: Option<String>,
    title: Option<String>,
    summary: Option<String>,
) -> Result<()> {
    let markdown = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read markdown file: {}", file.display()))?;

    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("page")
        .to_string();
    let title = title
        .or_else(|| first_heading(&markdown))
        .unwrap_or_else(|| stem.clone());
    let summary = summary
        .or_else(|| first_paragraph(&markdown))
        .unwrap_or_else(|| title.clone());

    let provider = embedding::create_provider(&config.embedding)?;
    let (pool, pages) = open_page_store(config, provider).await?;

    let persisted = pages
        .persist_new_page(NewPage {
            title: title.clone(),
            proposed_slug: slug.unwrap_or(stem),
            summary,
            markdown,
        })
        .await?;
    pool.close().await;

    println!("seed");
    println!("  title: {}", title);
    println!("  slug: {}", persisted.canonical_slug);
    println!("  page id: {}", persisted.page_id);
    println!("  blob: {}", persisted.storage_object_path);
    Ok(())
}

/// Text of the first `#` heading.
pub fn first_heading(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with('#'))
        .map(|l| l.trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty())
}

/// The first paragraph that is not a heading, joined onto one line and cut
/// to a summary-sized length.
pub fn first_paragraph(markdown: &str) -> Option<String> {
    markdown
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'))
        .map(|p| {
            let joined = p.lines().map(str::trim).collect::<Vec<_>>().join(" ");
            truncate_chars(&joined, SUMMARY_CHARS).to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "# 토성\n\n토성은 고리로 유명했다.\n위성 [타이탄](/create/titan)이 있었다.\n\n## 역사\n\n...";

    #[test]
    fn test_first_heading() {
        assert_eq!(first_heading(DOC).as_deref(), Some("토성"));
        assert_eq!(first_heading("no heading"), None);
        assert_eq!(first_heading("#\n"), None);
    }

    #[test]
    fn test_first_paragraph_skips_headings() {
        assert_eq!(
            first_paragraph(DOC).as_deref(),
            Some("토성은 고리로 유명했다. 위성 [타이탄](/create/titan)이 있었다.")
        );
        assert_eq!(first_paragraph("# only"), None);
    }

    #[test]
    fn test_first_paragraph_is_cut() {
        let long = "가".repeat(1000);
        assert_eq!(first_paragraph(&long).unwrap().chars().count(), SUMMARY_CHARS);
    }
}
