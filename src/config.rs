//! TOML configuration.
//!
//! Every tunable of the resolver, the drafting loop, the job ledger, and the
//! HTTP boundary lives here. API keys are read from the environment by the
//! providers that need them and never appear in the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub drafting: DraftingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Language model settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_model_retries")]
    pub max_retries: u32,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_decision_temperature")]
    pub decision_temperature: f32,
    #[serde(default = "default_drafting_temperature")]
    pub drafting_temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            name: default_model_name(),
            max_retries: default_model_retries(),
            timeout_secs: default_model_timeout(),
            decision_temperature: default_decision_temperature(),
            drafting_temperature: default_drafting_temperature(),
        }
    }
}

fn default_model_name() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_model_retries() -> u32 {
    3
}
fn default_model_timeout() -> u64 {
    120
}
fn default_decision_temperature() -> f32 {
    0.3
}
fn default_drafting_temperature() -> f32 {
    0.7
}

/// Similarity search knobs for the decider and the drafting tools.
#[derive(Debug, Deserialize, Clone)]
pub struct ResolutionConfig {
    #[serde(default = "default_decision_top_k")]
    pub decision_top_k: usize,
    #[serde(default = "default_decision_threshold")]
    pub decision_threshold: f32,
    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,
    #[serde(default = "default_match_threshold")]
    pub search_threshold: f32,
    #[serde(default = "default_batch_top_k")]
    pub batch_top_k: usize,
    #[serde(default = "default_match_threshold")]
    pub batch_threshold: f32,
    #[serde(default = "default_content_top_k")]
    pub content_top_k: usize,
    /// Characters of markdown captured on each side of a clicked link.
    #[serde(default = "default_context_radius")]
    pub context_radius: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            decision_top_k: default_decision_top_k(),
            decision_threshold: default_decision_threshold(),
            search_top_k: default_search_top_k(),
            search_threshold: default_match_threshold(),
            batch_top_k: default_batch_top_k(),
            batch_threshold: default_match_threshold(),
            content_top_k: default_content_top_k(),
            context_radius: default_context_radius(),
        }
    }
}

fn default_decision_top_k() -> usize {
    5
}
fn default_decision_threshold() -> f32 {
    0.7
}
fn default_search_top_k() -> usize {
    5
}
fn default_match_threshold() -> f32 {
    0.85
}
fn default_batch_top_k() -> usize {
    1
}
fn default_content_top_k() -> usize {
    10
}
fn default_context_radius() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct DraftingConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_snip_chars")]
    pub args_snip_chars: usize,
    #[serde(default = "default_snip_chars")]
    pub result_snip_chars: usize,
    #[serde(default = "default_candidate_summary_chars")]
    pub candidate_summary_chars: usize,
}

impl Default for DraftingConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            args_snip_chars: default_snip_chars(),
            result_snip_chars: default_snip_chars(),
            candidate_summary_chars: default_candidate_summary_chars(),
        }
    }
}

fn default_max_turns() -> usize {
    12
}
fn default_snip_chars() -> usize {
    800
}
fn default_candidate_summary_chars() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// Wall-clock ceiling for one background run. Jobs left `running`
    /// longer than this are reconciled to `failed`.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

fn default_max_duration_secs() -> u64 {
    300
}
fn default_reconcile_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_minutes: default_window_minutes(),
        }
    }
}

fn default_max_requests() -> u32 {
    10
}
fn default_window_minutes() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }

    let thresholds = [
        ("resolution.decision_threshold", config.resolution.decision_threshold),
        ("resolution.search_threshold", config.resolution.search_threshold),
        ("resolution.batch_threshold", config.resolution.batch_threshold),
    ];
    for (name, value) in thresholds {
        if !(0.0..=1.0).contains(&value) {
            bail!("{} must be in [0.0, 1.0]", name);
        }
    }

    if config.drafting.max_turns == 0 {
        bail!("drafting.max_turns must be >= 1");
    }

    if config.rate_limit.max_requests == 0 || config.rate_limit.window_minutes == 0 {
        bail!("rate_limit.max_requests and rate_limit.window_minutes must be >= 1");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.model.provider.as_str() {
        "disabled" | "gemini" => {}
        other => bail!(
            "Unknown model provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/exopedia.sqlite"

[server]
bind = "127.0.0.1:7340"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg: Config = toml::from_str(MINIMAL).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.chunking.max_chars, 1000);
        assert_eq!(cfg.drafting.max_turns, 12);
        assert_eq!(cfg.resolution.decision_top_k, 5);
        assert!((cfg.resolution.decision_threshold - 0.7).abs() < 1e-6);
        assert!((cfg.resolution.search_threshold - 0.85).abs() < 1e-6);
        assert_eq!(cfg.resolution.context_radius, 100);
        assert_eq!(cfg.rate_limit.max_requests, 10);
        assert_eq!(cfg.rate_limit.window_minutes, 5);
        assert!(!cfg.embedding.is_enabled());
        assert_eq!(cfg.model.provider, "disabled");
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut cfg: Config = toml::from_str(MINIMAL).unwrap();
        cfg.resolution.batch_threshold = 1.5;
        let err = validate(&cfg).unwrap_err().to_string();
        assert!(err.contains("batch_threshold"), "{}", err);
    }

    #[test]
    fn test_enabled_embedding_requires_dims() {
        let mut cfg: Config = toml::from_str(MINIMAL).unwrap();
        cfg.embedding.provider = "openai".to_string();
        cfg.embedding.model = Some("text-embedding-3-small".to_string());
        assert!(validate(&cfg).is_err());
        cfg.embedding.dims = Some(1536);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_unknown_model_provider_rejected() {
        let mut cfg: Config = toml::from_str(MINIMAL).unwrap();
        cfg.model.provider = "mystery".to_string();
        assert!(validate(&cfg).is_err());
    }
}
