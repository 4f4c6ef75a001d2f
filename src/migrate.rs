use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Page metadata; bodies live in the blob store
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            storage_path TEXT NOT NULL,
            summary_embedding BLOB,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_visited_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS page_views (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            page_id TEXT NOT NULL,
            viewed_at INTEGER NOT NULL,
            FOREIGN KEY (page_id) REFERENCES pages(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Retrieval index over page bodies
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content_chunks (
            id TEXT PRIMARY KEY,
            page_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB,
            UNIQUE(page_id, chunk_index),
            FOREIGN KEY (page_id) REFERENCES pages(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One job per (source, target) link pair
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS creation_queue (
            id TEXT PRIMARY KEY,
            source_slug TEXT NOT NULL,
            target_slug TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            result_slug TEXT,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER,
            UNIQUE(source_slug, target_slug)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS creation_logs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            queue_id TEXT NOT NULL,
            ts INTEGER NOT NULL,
            level TEXT NOT NULL,
            phase TEXT NOT NULL,
            tool_name TEXT,
            message TEXT NOT NULL,
            args_snip TEXT,
            result_snip TEXT,
            FOREIGN KEY (queue_id) REFERENCES creation_queue(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rate_limit_hits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_key TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            hit_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_page_views_page_id ON page_views(page_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_chunks_page_id ON content_chunks(page_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_creation_logs_queue_id ON creation_logs(queue_id, seq)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_creation_queue_status ON creation_queue(status, created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_rate_limit_hits_key ON rate_limit_hits(client_key, endpoint, hit_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
