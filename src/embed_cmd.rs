//! `exopedia embed backfill`: fill vectors that were skipped at write time,
//! e.g. pages seeded while embeddings were disabled.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding;
use crate::services::open_page_store;

pub async fn run_embed_backfill(
    config: &Config,
    batch_size_override: Option<usize>,
    summaries_only: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let (pool, pages) = open_page_store(config, provider).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let summaries = pages.backfill_summary_embeddings(batch_size).await?;
    let chunks = if summaries_only {
        None
    } else {
        Some(pages.backfill_chunk_embeddings(batch_size).await?)
    };
    pool.close().await;

    println!("embed backfill");
    println!("  page summaries embedded: {}", summaries);
    if let Some((embedded, failed)) = chunks {
        println!("  chunks embedded: {}", embedded);
        println!("  chunks failed: {}", failed);
    }
    Ok(())
}
