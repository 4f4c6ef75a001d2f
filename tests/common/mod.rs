//! Fakes and setup shared by the integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use exopedia::blob::InMemoryBlobStore;
use exopedia::config::Config;
use exopedia::db;
use exopedia::embedding::EmbeddingProvider;
use exopedia::creation::{CreateOutcome, CreateRequest};
use exopedia::llm::{LanguageModel, ModelRequest, ModelResponse, Part, Role, ToolCall};
use exopedia::migrate;
use exopedia::models::{NewPage, PersistedPage};
use exopedia::services::Services;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ─── Hashing embedder ───────────────────────────────────────────────

/// Deterministic bag-of-words embedder: each whitespace token adds 1.0 to
/// the dimension its SHA-256 selects. Texts sharing words score high;
/// vectors are never negative, so every score is in `[0, 1]`.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self { dims: 64 }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let slot = u16::from_le_bytes([digest[0], digest[1]]) as usize % self.dims;
            v[slot] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-bow"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ─── Scripted model ─────────────────────────────────────────────────

enum Step {
    Respond(Box<dyn Fn(&ModelRequest) -> Result<ModelResponse> + Send + Sync>),
    Stall(Duration),
}

/// Replays a fixed sequence of responses, one per `generate` call, and
/// records every request. Steps may inspect the request, e.g. to echo a
/// slug returned by an earlier tool call. Once the script runs out it
/// answers with plain text.
pub struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, response: ModelResponse) -> Self {
        self.then_with(move |_| Ok(response.clone()))
    }

    pub fn then_with(
        self,
        step: impl Fn(&ModelRequest) -> Result<ModelResponse> + Send + Sync + 'static,
    ) -> Self {
        self.steps
            .lock()
            .unwrap()
            .push_back(Step::Respond(Box::new(step)));
        self
    }

    /// Sleep for `delay` before answering with text.
    pub fn then_stall(self, delay: Duration) -> Self {
        self.steps.lock().unwrap().push_back(Step::Stall(delay));
        self
    }

    pub fn then_fail(self, message: &'static str) -> Self {
        self.then_with(move |_| Err(anyhow::anyhow!(message)))
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(f)) => f(request),
            Some(Step::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(ModelResponse::text("done"))
            }
            None => Ok(ModelResponse::text("done")),
        }
    }
}

/// A response with a single tool call.
pub fn call(name: &str, args: Value) -> ModelResponse {
    ModelResponse::calls(vec![ToolCall::new(name, args)])
}

/// The most recent function response named `tool` in a request's history.
pub fn last_tool_response(request: &ModelRequest, tool: &str) -> Option<Value> {
    request
        .messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .flat_map(|m| m.parts.iter().rev())
        .find_map(|p| match p {
            Part::Response { name, response } if name == tool => Some(response.clone()),
            _ => None,
        })
}

// ─── Environment ────────────────────────────────────────────────────

pub struct TestEnv {
    pub tmp: TempDir,
    pub services: Services,
    pub model: Arc<ScriptedModel>,
    pub blobs: Arc<InMemoryBlobStore>,
}

pub fn test_config(root: &Path) -> Config {
    let text = format!(
        r#"[db]
path = "{root}/data/exopedia.sqlite"

[storage]
root = "{root}/blobs"

[server]
bind = "127.0.0.1:0"
"#,
        root = root.display()
    );
    toml::from_str(&text).unwrap()
}

pub async fn test_env(model: ScriptedModel) -> TestEnv {
    test_env_with(model, |_| {}).await
}

pub async fn test_env_with(model: ScriptedModel, tweak: impl FnOnce(&mut Config)) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    // Seed pages stay invisible to the decider unless a test lowers this.
    config.resolution.decision_threshold = 0.95;
    tweak(&mut config);

    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let model = Arc::new(model);
    let blobs = Arc::new(InMemoryBlobStore::new());
    let services = Services::with_components(
        config,
        pool,
        blobs.clone(),
        Arc::new(HashingEmbedder::new()),
        model.clone(),
    );

    TestEnv {
        tmp,
        services,
        model,
        blobs,
    }
}

pub async fn seed_page(
    services: &Services,
    slug: &str,
    title: &str,
    summary: &str,
    markdown: &str,
) -> PersistedPage {
    services
        .pages
        .persist_new_page(NewPage {
            title: title.to_string(),
            proposed_slug: slug.to_string(),
            summary: summary.to_string(),
            markdown: markdown.to_string(),
        })
        .await
        .unwrap()
}

/// Issue a create request from the default client and wait for the run it
/// scheduled, if any.
pub async fn create_and_wait(services: &Services, source: &str, target: &str) -> CreateOutcome {
    let request = CreateRequest {
        source_slug: source.to_string(),
        target_slug: target.to_string(),
    };
    let mut outcome = services
        .creation
        .create(&request, "127.0.0.1")
        .await
        .unwrap();
    if let Some(task) = outcome.task.take() {
        task.await.unwrap();
    }
    outcome
}

pub async fn markdown_of(services: &Services, slug: &str) -> String {
    services
        .pages
        .get_page(slug)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("page {} missing", slug))
        .markdown
}

pub fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}
