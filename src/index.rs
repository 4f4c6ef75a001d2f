//! Similarity indices over stored pages.
//!
//! - **Semantic Index** ([`SemanticMatcher`]): nearest-neighbor search over
//!   one embedding per page. [`SummaryMatcher`] embeds page summaries and
//!   is the implementation the resolver uses. Any other fingerprint (for
//!   example a title embedding) plugs in behind the same trait.
//! - **Retrieval Index** ([`RetrievalIndex`]): nearest-neighbor search over
//!   content chunks, used for research queries while drafting.
//!
//! Both are brute-force cosine similarity in Rust over little-endian `f32`
//! BLOBs. When the embedding provider is disabled they return no results
//! rather than an error, so the resolver degrades to always creating.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::embedding::{blob_to_vec, cosine_similarity, embed_query, EmbeddingProvider};
use crate::models::{ContentHit, PageMatch};

/// Nearest-neighbor search over page fingerprints.
#[async_trait]
pub trait SemanticMatcher: Send + Sync {
    /// Up to `top_k` pages with score `>= threshold`, best first.
    async fn search(&self, query: &str, top_k: usize, threshold: f32) -> Result<Vec<PageMatch>>;
}

/// [`SemanticMatcher`] over `pages.summary_embedding`.
pub struct SummaryMatcher {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SummaryMatcher {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { pool, embedder }
    }
}

#[async_trait]
impl SemanticMatcher for SummaryMatcher {
    async fn search(&self, query: &str, top_k: usize, threshold: f32) -> Result<Vec<PageMatch>> {
        if query.trim().is_empty() || top_k == 0 || !self.embedder.is_enabled() {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;

        let rows = sqlx::query(
            "SELECT slug, title, summary, summary_embedding FROM pages WHERE summary_embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut matches: Vec<PageMatch> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("summary_embedding");
                let score = cosine_similarity(&query_vec, &blob_to_vec(&blob));
                (score >= threshold).then(|| PageMatch {
                    slug: row.get("slug"),
                    title: row.get("title"),
                    summary: row.get("summary"),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}

// ============ Batch resolution ============

/// One term the drafting agent wants to link.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolveCandidate {
    pub term: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTerm {
    pub term: String,
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedTerm {
    pub term: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResolution {
    pub resolved: Vec<ResolvedTerm>,
    pub unresolved: Vec<UnresolvedTerm>,
}

/// Resolve each term to its best match, if any. The query for a term is
/// `"{term} {context}"` when context is given.
pub async fn batch_resolve(
    matcher: &dyn SemanticMatcher,
    candidates: &[ResolveCandidate],
    top_k: usize,
    threshold: f32,
) -> Result<BatchResolution> {
    let mut out = BatchResolution::default();

    for candidate in candidates {
        let query = match candidate.context.as_deref() {
            Some(ctx) if !ctx.trim().is_empty() => format!("{} {}", candidate.term, ctx),
            _ => candidate.term.clone(),
        };

        let matches = matcher.search(&query, top_k.max(1), threshold).await?;
        match matches.into_iter().next() {
            Some(best) => out.resolved.push(ResolvedTerm {
                term: candidate.term.clone(),
                slug: best.slug,
                title: best.title,
                summary: best.summary,
                score: best.score,
            }),
            None => out.unresolved.push(UnresolvedTerm {
                term: candidate.term.clone(),
            }),
        }
    }

    Ok(out)
}

// ============ Retrieval Index ============

pub struct RetrievalIndex {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RetrievalIndex {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { pool, embedder }
    }

    /// Top `top_k` chunks by cosine similarity to `query`.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ContentHit>> {
        if query.trim().is_empty() || top_k == 0 || !self.embedder.is_enabled() {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;

        let rows = sqlx::query(
            r#"
            SELECT p.slug, p.title, c.chunk_index, c.text, c.embedding
            FROM content_chunks c
            JOIN pages p ON p.id = c.page_id
            WHERE c.embedding IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<ContentHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ContentHit {
                    slug: row.get("slug"),
                    title: row.get("title"),
                    chunk_index: row.get("chunk_index"),
                    content: row.get("text"),
                    similarity: cosine_similarity(&query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}
