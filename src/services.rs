//! Composition root.
//!
//! Every store, index, and external capability is constructed once here and
//! handed to its consumers explicitly. Tests build the same graph through
//! [`Services::with_components`] with fakes in place of the network-backed
//! pieces.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::blob::{BlobStore, FsBlobStore};
use crate::config::Config;
use crate::creation::{CreationService, JobRunner};
use crate::db;
use crate::decider::Decider;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::{RetrievalIndex, SemanticMatcher, SummaryMatcher};
use crate::jobs::JobLedger;
use crate::llm::{create_model, LanguageModel};
use crate::migrate;
use crate::orchestrator::Orchestrator;
use crate::pages::PageStore;
use crate::ratelimit::RateLimiter;
use crate::tools::ToolSurface;

/// A page store over the configured database and blob directory, for CLI
/// commands that do not need the model.
pub async fn open_page_store(
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<(SqlitePool, PageStore)> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.root.clone()));
    let pages = PageStore::new(pool.clone(), blobs, embedder, config.chunking.max_chars);
    Ok((pool, pages))
}

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub pages: Arc<PageStore>,
    pub matcher: Arc<dyn SemanticMatcher>,
    pub retrieval: Arc<RetrievalIndex>,
    pub ledger: Arc<JobLedger>,
    pub decider: Arc<Decider>,
    pub orchestrator: Arc<Orchestrator>,
    pub creation: Arc<CreationService>,
}

impl Services {
    /// Open the database (migrating it if needed) and build the providers
    /// the config names.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage.root.clone()));
        let embedder = create_provider(&config.embedding)?;
        let model = create_model(&config.model)?;

        Ok(Self::with_components(config.clone(), pool, blobs, embedder, model))
    }

    pub fn with_components(
        config: Config,
        pool: SqlitePool,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let pages = Arc::new(PageStore::new(
            pool.clone(),
            blobs,
            embedder.clone(),
            config.chunking.max_chars,
        ));
        let matcher: Arc<dyn SemanticMatcher> =
            Arc::new(SummaryMatcher::new(pool.clone(), embedder.clone()));
        let retrieval = Arc::new(RetrievalIndex::new(pool.clone(), embedder));
        let ledger = Arc::new(JobLedger::new(pool.clone()));

        let decider = Arc::new(Decider::new(
            matcher.clone(),
            model.clone(),
            &config.resolution,
            &config.drafting,
            &config.model,
        ));

        let tools = Arc::new(ToolSurface::new(
            pages.clone(),
            matcher.clone(),
            retrieval.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            model,
            tools,
            ledger.clone(),
            config.resolution.clone(),
            config.drafting.clone(),
            config.model.drafting_temperature,
        ));

        let runner = JobRunner::new(
            pages.clone(),
            ledger.clone(),
            orchestrator.clone(),
            Duration::from_secs(config.jobs.max_duration_secs),
        );
        let limiter = Arc::new(RateLimiter::new(pool.clone(), &config.rate_limit));
        let creation = Arc::new(CreationService::new(
            pages.clone(),
            ledger.clone(),
            decider.clone(),
            limiter,
            runner,
            config.resolution.context_radius,
        ));

        Self {
            config: Arc::new(config),
            pool,
            pages,
            matcher,
            retrieval,
            ledger,
            decider,
            orchestrator,
            creation,
        }
    }
}
