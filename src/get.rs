//! Page retrieval by slug for the `exopedia get` command.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::DisabledProvider;
use crate::services::open_page_store;

/// CLI entry point: print a page's metadata and markdown to stdout.
pub async fn run_get(config: &Config, slug: &str) -> Result<()> {
    let (pool, pages) = open_page_store(config, Arc::new(DisabledProvider)).await?;

    let meta = pages.get_meta(slug).await?;
    let document = pages.get_page(slug).await?;
    let (meta, document) = match (meta, document) {
        (Some(m), Some(d)) => (m, d),
        _ => {
            pool.close().await;
            bail!("page not found: {}", slug);
        }
    };
    let views = pages.view_count(&meta.id).await?;
    pool.close().await;

    println!("--- Page ---");
    println!("slug:         {}", meta.slug);
    println!("title:        {}", meta.title);
    println!("summary:      {}", meta.summary);
    println!("storage:      {}", meta.storage_path);
    println!("created_at:   {}", format_ts_iso(meta.created_at));
    println!("updated_at:   {}", format_ts_iso(meta.updated_at));
    if let Some(ts) = meta.last_visited_at {
        println!("visited_at:   {}", format_ts_iso(ts));
    }
    println!("views:        {}", views);
    println!();
    println!("--- Markdown ---");
    println!("{}", document.markdown);

    Ok(())
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_ts_iso(1_700_000_000), "2023-11-14T22:13:20Z");
    }
}
