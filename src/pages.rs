//! Content Store: page metadata in SQLite, bodies in the blob store.
//!
//! A page is written in three places that are not covered by one
//! transaction: the `pages` row, the markdown blob, and the chunk set of
//! the retrieval index. Each step is safe to repeat:
//!
//! | Step | Retry behavior |
//! |------|----------------|
//! | claim slug (`INSERT ... ON CONFLICT DO NOTHING`) | re-probe the next free suffix |
//! | blob write | upsert |
//! | chunk set | delete-all-then-insert-all in one transaction |
//!
//! Summary and chunk embeddings are best-effort: a provider failure is
//! logged and the vectors are stored as `NULL`.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::blob::{page_blob_path, BlobStore};
use crate::chunk::chunk_text;
use crate::embedding::{vec_to_blob, EmbeddingProvider};
use crate::models::{NewPage, Page, PageDocument, PageUpdate, PersistedPage};

/// Attempts at claiming a slug before giving up under contention.
const MAX_SLUG_CLAIMS: usize = 16;

pub struct PageStore {
    pool: SqlitePool,
    blobs: Arc<dyn BlobStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_chars: usize,
}

impl PageStore {
    pub fn new(
        pool: SqlitePool,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        max_chars: usize,
    ) -> Self {
        Self {
            pool,
            blobs,
            embedder,
            max_chars,
        }
    }

    /// Page metadata without the body.
    pub async fn get_meta(&self, slug: &str) -> Result<Option<Page>> {
        let row = sqlx::query(
            "SELECT id, slug, title, summary, storage_path, created_at, updated_at, last_visited_at FROM pages WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Page {
            id: row.get("id"),
            slug: row.get("slug"),
            title: row.get("title"),
            summary: row.get("summary"),
            storage_path: row.get("storage_path"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            last_visited_at: row.get("last_visited_at"),
        }))
    }

    /// Metadata plus markdown. A row whose blob is missing reads as
    /// not-found.
    pub async fn get_page(&self, slug: &str) -> Result<Option<PageDocument>> {
        let Some(meta) = self.get_meta(slug).await? else {
            return Ok(None);
        };

        let Some(markdown) = self.blobs.get(&meta.storage_path).await? else {
            tracing::warn!(slug, path = %meta.storage_path, "page row has no body blob");
            return Ok(None);
        };

        Ok(Some(PageDocument {
            id: meta.id,
            slug: meta.slug,
            title: meta.title,
            markdown,
        }))
    }

    /// Create a page under a canonical, collision-free slug.
    pub async fn persist_new_page(&self, new: NewPage) -> Result<PersistedPage> {
        let base = canonicalize_slug(&new.proposed_slug);
        let summary_vec = self.embed_summary(&new.summary).await;
        let page_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let mut claimed = None;
        for _ in 0..MAX_SLUG_CLAIMS {
            let candidate = self.next_free_slug(&base).await?;
            let storage_path = page_blob_path(&candidate);

            let result = sqlx::query(
                r#"
                INSERT INTO pages (id, slug, title, summary, storage_path, summary_embedding, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(slug) DO NOTHING
                "#,
            )
            .bind(&page_id)
            .bind(&candidate)
            .bind(&new.title)
            .bind(&new.summary)
            .bind(&storage_path)
            .bind(summary_vec.as_deref())
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                claimed = Some((candidate, storage_path));
                break;
            }
            tracing::debug!(slug = %candidate, "slug claimed concurrently, probing again");
        }

        let Some((canonical_slug, storage_path)) = claimed else {
            bail!("could not claim a free slug for '{}'", base);
        };

        self.blobs.put(&storage_path, &new.markdown).await?;
        let chunk_count = self.replace_chunks(&page_id, &new.markdown).await?;

        tracing::info!(slug = %canonical_slug, chunks = chunk_count, "page created");

        Ok(PersistedPage {
            page_id,
            canonical_slug,
            storage_object_path: storage_path,
        })
    }

    /// Replace a page's body (and optionally its summary), then rebuild
    /// its chunk set.
    pub async fn persist_page_update(&self, update: PageUpdate) -> Result<()> {
        let Some(meta) = self.get_meta(&update.slug).await? else {
            bail!("page not found: {}", update.slug);
        };

        self.blobs.put(&meta.storage_path, &update.markdown).await?;

        let now = chrono::Utc::now().timestamp();
        match update.summary {
            Some(ref summary) => {
                let summary_vec = self.embed_summary(summary).await;
                sqlx::query(
                    "UPDATE pages SET summary = ?, summary_embedding = ?, updated_at = ? WHERE id = ?",
                )
                .bind(summary)
                .bind(summary_vec.as_deref())
                .bind(now)
                .bind(&meta.id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("UPDATE pages SET updated_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(&meta.id)
                    .execute(&self.pool)
                    .await?;
            }
        }

        let chunk_count = self.replace_chunks(&meta.id, &update.markdown).await?;
        tracing::info!(slug = %meta.slug, chunks = chunk_count, "page updated");
        Ok(())
    }

    /// Record one view and return the live count.
    pub async fn record_view(&self, page_id: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO page_views (page_id, viewed_at) VALUES (?, ?)")
            .bind(page_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE pages SET last_visited_at = ? WHERE id = ?")
            .bind(now)
            .bind(page_id)
            .execute(&self.pool)
            .await?;
        self.view_count(page_id).await
    }

    pub async fn view_count(&self, page_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM page_views WHERE page_id = ?")
            .bind(page_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Embed the summary of every page that has none. Returns the number
    /// of pages filled.
    pub async fn backfill_summary_embeddings(&self, batch_size: usize) -> Result<usize> {
        if !self.embedder.is_enabled() {
            bail!("Embeddings are disabled. Set [embedding] provider in config.");
        }

        let rows = sqlx::query(
            "SELECT id, summary FROM pages WHERE summary_embedding IS NULL ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let pending: Vec<(String, String)> = rows
            .iter()
            .map(|r| (r.get("id"), r.get("summary")))
            .collect();

        let mut filled = 0;
        for batch in pending.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|(_, s)| s.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;

            for ((id, _), vector) in batch.iter().zip(vectors.iter()) {
                sqlx::query("UPDATE pages SET summary_embedding = ? WHERE id = ?")
                    .bind(vec_to_blob(vector))
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                filled += 1;
            }
        }

        Ok(filled)
    }

    /// Embed every content chunk stored without a vector. Returns the
    /// number of chunks filled; a failed batch is skipped and counted in
    /// the second value.
    pub async fn backfill_chunk_embeddings(&self, batch_size: usize) -> Result<(usize, usize)> {
        if !self.embedder.is_enabled() {
            bail!("Embeddings are disabled. Set [embedding] provider in config.");
        }

        let rows = sqlx::query("SELECT id, text FROM content_chunks WHERE embedding IS NULL")
            .fetch_all(&self.pool)
            .await?;
        let pending: Vec<(String, String)> =
            rows.iter().map(|r| (r.get("id"), r.get("text"))).collect();

        let mut filled = 0;
        let mut failed = 0;
        for batch in pending.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
            let vectors = match self.embedder.embed(&texts).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, size = batch.len(), "chunk embedding batch failed");
                    failed += batch.len();
                    continue;
                }
            };

            for ((id, _), vector) in batch.iter().zip(vectors.iter()) {
                sqlx::query("UPDATE content_chunks SET embedding = ? WHERE id = ?")
                    .bind(vec_to_blob(vector))
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                filled += 1;
            }
        }

        Ok((filled, failed))
    }

    async fn embed_summary(&self, summary: &str) -> Option<Vec<u8>> {
        if !self.embedder.is_enabled() {
            return None;
        }
        match crate::embedding::embed_query(self.embedder.as_ref(), summary).await {
            Ok(v) => Some(vec_to_blob(&v)),
            Err(e) => {
                tracing::warn!(error = %e, "summary embedding failed; storing page without it");
                None
            }
        }
    }

    /// Smallest free slug among `base`, `base-1`, `base-2`, ...
    async fn next_free_slug(&self, base: &str) -> Result<String> {
        // Canonical slugs contain no LIKE wildcards except '-', which is literal.
        let taken: HashSet<String> =
            sqlx::query_scalar("SELECT slug FROM pages WHERE slug = ?1 OR slug LIKE ?1 || '-%'")
                .bind(base)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect();
        Ok(first_free_slug(base, &taken))
    }

    /// Delete-all-then-insert-all for one page's chunks. Returns the new
    /// chunk count.
    async fn replace_chunks(&self, page_id: &str, markdown: &str) -> Result<usize> {
        let chunks = chunk_text(page_id, markdown, self.max_chars);

        let vectors: Vec<Option<Vec<u8>>> = if self.embedder.is_enabled() && !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            match self.embedder.embed(&texts).await {
                Ok(vs) if vs.len() == chunks.len() => {
                    vs.iter().map(|v| Some(vec_to_blob(v))).collect()
                }
                Ok(vs) => {
                    tracing::warn!(
                        expected = chunks.len(),
                        got = vs.len(),
                        "embedding count mismatch; storing chunks without vectors"
                    );
                    vec![None; chunks.len()]
                }
                Err(e) => {
                    tracing::warn!(error = %e, "chunk embedding failed; storing chunks without vectors");
                    vec![None; chunks.len()]
                }
            }
        } else {
            vec![None; chunks.len()]
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM content_chunks WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                "INSERT INTO content_chunks (id, page_id, chunk_index, text, hash, embedding) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.page_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vector.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chunks.len())
    }
}

/// Lower-case, map every character outside `[a-z0-9-]` to `-`, collapse
/// runs of `-`, and trim them from the ends. An empty result becomes
/// `"page"`.
pub fn canonicalize_slug(proposed: &str) -> String {
    let mut out = String::with_capacity(proposed.len());
    for c in proposed.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        "page".to_string()
    } else {
        out
    }
}

/// `base` if free, otherwise `base-n` for the smallest free `n >= 1`.
pub fn first_free_slug(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 1u64;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_basic() {
        assert_eq!(canonicalize_slug("Pioneers of Titan"), "pioneers-of-titan");
        assert_eq!(canonicalize_slug("already-fine-42"), "already-fine-42");
    }

    #[test]
    fn test_canonicalize_collapses_and_trims() {
        assert_eq!(canonicalize_slug("  Titan -- & Beyond!! "), "titan-beyond");
        assert_eq!(canonicalize_slug("--x--"), "x");
    }

    #[test]
    fn test_canonicalize_non_ascii_falls_back() {
        assert_eq!(canonicalize_slug("타이탄"), "page");
        assert_eq!(canonicalize_slug("타이탄 2"), "2");
        assert_eq!(canonicalize_slug(""), "page");
    }

    #[test]
    fn test_first_free_slug_probes_sequentially() {
        let mut taken = HashSet::new();
        assert_eq!(first_free_slug("titan", &taken), "titan");

        taken.insert("titan".to_string());
        assert_eq!(first_free_slug("titan", &taken), "titan-1");

        taken.insert("titan-1".to_string());
        taken.insert("titan-3".to_string());
        assert_eq!(first_free_slug("titan", &taken), "titan-2");
    }

    #[test]
    fn test_first_free_slug_base_free_despite_suffixes() {
        let taken: HashSet<String> = ["titan-1".to_string()].into_iter().collect();
        assert_eq!(first_free_slug("titan", &taken), "titan");
    }
}
