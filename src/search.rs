//! `exopedia search`: query the Semantic Index (page summaries) or the
//! Retrieval Index (content chunks) from the command line.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::index::{RetrievalIndex, SemanticMatcher, SummaryMatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SearchIndex {
    /// Page summaries, as the resolver sees them.
    Pages,
    /// Content chunks, as drafting research sees them.
    Content,
}

pub async fn run_search(
    config: &Config,
    query: &str,
    index: SearchIndex,
    limit: Option<usize>,
    threshold: Option<f32>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }
    if let Some(t) = threshold {
        if !(0.0..=1.0).contains(&t) {
            bail!("--threshold must be in [0.0, 1.0]");
        }
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;

    match index {
        SearchIndex::Pages => {
            let matcher = SummaryMatcher::new(pool.clone(), Arc::clone(&provider));
            let top_k = limit.unwrap_or(config.resolution.search_top_k);
            let threshold = threshold.unwrap_or(config.resolution.search_threshold);
            let matches = matcher.search(query, top_k, threshold).await?;

            if matches.is_empty() {
                println!("No results.");
            }
            for (i, m) in matches.iter().enumerate() {
                println!("{}. [{:.2}] {}", i + 1, m.score, m.title);
                println!("    slug: {}", m.slug);
                println!("    summary: \"{}\"", m.summary.replace('\n', " ").trim());
                println!();
            }
        }
        SearchIndex::Content => {
            let retrieval = RetrievalIndex::new(pool.clone(), provider);
            let top_k = limit.unwrap_or(config.resolution.content_top_k);
            let hits = retrieval.search(query, top_k).await?;

            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {} #{}",
                    i + 1,
                    hit.similarity,
                    hit.title,
                    hit.chunk_index
                );
                println!("    slug: {}", hit.slug);
                println!("    excerpt: \"{}\"", hit.content.replace('\n', " ").trim());
                println!();
            }
        }
    }

    pool.close().await;
    Ok(())
}
