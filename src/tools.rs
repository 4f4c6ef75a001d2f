//! Tool Surface: the fixed vocabulary of operations the model may invoke.
//!
//! Every tool name maps to one [`ToolKind`]. A raw [`ToolCall`] from the
//! model is turned into a typed [`ToolInvocation`] by
//! [`ToolInvocation::parse`], which fills missing arguments from the
//! session ([`SessionDefaults`]); the invocation is then run by
//! [`ToolSurface::execute`]. Names outside the vocabulary never reach
//! this module: the orchestrator answers them with a `null` result.
//!
//! ```text
//!   ToolCall{name,args} ──parse──▶ ToolInvocation ──execute──▶ ToolOutcome
//!                                      │                         │
//!                               ToolError::InvalidArguments   ToolError::Execution
//! ```
//!
//! | Tool | Decision | Existing mode | New mode |
//! |------|:-:|:-:|:-:|
//! | `search_page_index` | | ✓ | ✓ |
//! | `batch_resolve_page_index` | | | ✓ |
//! | `search_content_index` | | | ✓ |
//! | `get_page` | | ✓ | ✓ |
//! | `persist_new_page` | | | ✓ |
//! | `persist_page_update` | | ✓ | ✓ |
//! | `redirect_to_existing` | ✓ | | |
//! | `declare_no_existing` | ✓ | | |
//! | `finish_session` | | ✓ | ✓ |

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::ResolutionConfig;
use crate::index::{batch_resolve, ResolveCandidate, RetrievalIndex, SemanticMatcher};
use crate::llm::{ToolCall, ToolDeclaration};
use crate::models::{NewPage, PageUpdate, PersistedPage};
use crate::pages::PageStore;

/// Sent with every `batch_resolve_page_index` result.
pub const BATCH_RESOLVE_GUIDANCE: &str = "Each term's top candidate comes with its summary. \
Even when a title looks similar, read the summary and link to /wiki/{slug} only if it is \
clearly the same topic; otherwise keep the /create/ link.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    SearchPageIndex,
    BatchResolvePageIndex,
    SearchContentIndex,
    GetPage,
    PersistNewPage,
    PersistPageUpdate,
    RedirectToExisting,
    DeclareNoExisting,
    FinishSession,
}

/// Tools offered to the link-resolution decider.
pub const DECISION_TOOLS: &[ToolKind] = &[ToolKind::RedirectToExisting, ToolKind::DeclareNoExisting];

/// Tools offered when patching a source page toward an existing page.
pub const EXISTING_MODE_TOOLS: &[ToolKind] = &[
    ToolKind::GetPage,
    ToolKind::SearchPageIndex,
    ToolKind::PersistPageUpdate,
    ToolKind::FinishSession,
];

/// Tools offered when drafting a new page.
pub const NEW_MODE_TOOLS: &[ToolKind] = &[
    ToolKind::SearchPageIndex,
    ToolKind::BatchResolvePageIndex,
    ToolKind::SearchContentIndex,
    ToolKind::GetPage,
    ToolKind::PersistNewPage,
    ToolKind::PersistPageUpdate,
    ToolKind::FinishSession,
];

impl ToolKind {
    pub const ALL: [ToolKind; 9] = [
        ToolKind::SearchPageIndex,
        ToolKind::BatchResolvePageIndex,
        ToolKind::SearchContentIndex,
        ToolKind::GetPage,
        ToolKind::PersistNewPage,
        ToolKind::PersistPageUpdate,
        ToolKind::RedirectToExisting,
        ToolKind::DeclareNoExisting,
        ToolKind::FinishSession,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::SearchPageIndex => "search_page_index",
            ToolKind::BatchResolvePageIndex => "batch_resolve_page_index",
            ToolKind::SearchContentIndex => "search_content_index",
            ToolKind::GetPage => "get_page",
            ToolKind::PersistNewPage => "persist_new_page",
            ToolKind::PersistPageUpdate => "persist_page_update",
            ToolKind::RedirectToExisting => "redirect_to_existing",
            ToolKind::DeclareNoExisting => "declare_no_existing",
            ToolKind::FinishSession => "finish_session",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// A terminal call ends the drafting loop once executed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolKind::FinishSession)
    }

    pub fn declaration(&self) -> ToolDeclaration {
        let (description, parameters) = match self {
            ToolKind::SearchPageIndex => (
                "Search existing pages by semantic similarity of their summaries",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "The search query text" },
                        "topK": { "type": "number", "description": "Number of top results to return" },
                        "threshold": { "type": "number", "description": "Minimum similarity threshold (0-1)" }
                    },
                    "required": ["query"]
                }),
            ),
            ToolKind::BatchResolvePageIndex => (
                "Check whether pages exist for several terms at once. Returns the top match with its summary for verification.",
                json!({
                    "type": "object",
                    "properties": {
                        "candidates": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "term": { "type": "string" },
                                    "context": { "type": "string" }
                                },
                                "required": ["term"]
                            }
                        },
                        "topK": { "type": "number" },
                        "threshold": { "type": "number" }
                    },
                    "required": ["candidates"]
                }),
            ),
            ToolKind::SearchContentIndex => (
                "Search page content chunks for research",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "The search query text" },
                        "topK": { "type": "number", "description": "Number of top results to return" }
                    },
                    "required": ["query"]
                }),
            ),
            ToolKind::GetPage => (
                "Get a page by slug",
                json!({
                    "type": "object",
                    "properties": { "slug": { "type": "string", "description": "The page slug" } },
                    "required": ["slug"]
                }),
            ),
            ToolKind::PersistNewPage => (
                "Create and persist a new wiki page. The returned canonicalSlug may differ from proposedSlug.",
                json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "proposedSlug": { "type": "string" },
                        "summary": { "type": "string" },
                        "markdown": { "type": "string" }
                    },
                    "required": ["title", "proposedSlug", "summary", "markdown"]
                }),
            ),
            ToolKind::PersistPageUpdate => (
                "Replace the markdown (and optionally the summary) of an existing page",
                json!({
                    "type": "object",
                    "properties": {
                        "slug": { "type": "string" },
                        "markdown": { "type": "string" },
                        "summary": { "type": "string" }
                    },
                    "required": ["slug", "markdown"]
                }),
            ),
            ToolKind::RedirectToExisting => (
                "Declare that an existing page covers the same topic as the link",
                json!({
                    "type": "object",
                    "properties": { "slug": { "type": "string" } },
                    "required": ["slug"]
                }),
            ),
            ToolKind::DeclareNoExisting => (
                "Declare that no existing page covers the same topic as the link",
                json!({
                    "type": "object",
                    "properties": { "reason": { "type": "string" } }
                }),
            ),
            ToolKind::FinishSession => (
                "End the session once every step has succeeded",
                json!({
                    "type": "object",
                    "properties": { "reason": { "type": "string" } }
                }),
            ),
        };

        ToolDeclaration {
            name: self.name(),
            description,
            parameters,
        }
    }
}

pub fn declarations(kinds: &[ToolKind]) -> Vec<ToolDeclaration> {
    kinds.iter().map(|k| k.declaration()).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: &'static str, message: String },
    #[error("{tool} failed: {message}")]
    Execution { tool: &'static str, message: String },
}

impl ToolError {
    fn invalid(kind: ToolKind, message: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            tool: kind.name(),
            message: message.into(),
        }
    }

    fn execution(kind: ToolKind, err: anyhow::Error) -> Self {
        ToolError::Execution {
            tool: kind.name(),
            message: format!("{:#}", err),
        }
    }
}

/// What the session knows when an argument is missing.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub source_slug: String,
    pub source_markdown: String,
    pub target_slug: String,
    pub link_text: String,
    pub resolution: ResolutionConfig,
}

/// A validated, typed tool call.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    SearchPageIndex {
        query: String,
        top_k: usize,
        threshold: f32,
    },
    BatchResolvePageIndex {
        candidates: Vec<ResolveCandidate>,
        top_k: usize,
        threshold: f32,
    },
    SearchContentIndex {
        query: String,
        top_k: usize,
    },
    GetPage {
        slug: String,
    },
    PersistNewPage(NewPage),
    PersistPageUpdate(PageUpdate),
    RedirectToExisting {
        slug: String,
    },
    DeclareNoExisting,
    FinishSession,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryArgs {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    top_k: Option<f64>,
    #[serde(default)]
    threshold: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchArgs {
    #[serde(default)]
    candidates: Vec<ResolveCandidate>,
    #[serde(default)]
    top_k: Option<f64>,
    #[serde(default)]
    threshold: Option<f64>,
}

#[derive(Deserialize)]
struct SlugArgs {
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewPageArgs {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    proposed_slug: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
}

#[derive(Deserialize)]
struct UpdateArgs {
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

impl ToolInvocation {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolInvocation::SearchPageIndex { .. } => ToolKind::SearchPageIndex,
            ToolInvocation::BatchResolvePageIndex { .. } => ToolKind::BatchResolvePageIndex,
            ToolInvocation::SearchContentIndex { .. } => ToolKind::SearchContentIndex,
            ToolInvocation::GetPage { .. } => ToolKind::GetPage,
            ToolInvocation::PersistNewPage(_) => ToolKind::PersistNewPage,
            ToolInvocation::PersistPageUpdate(_) => ToolKind::PersistPageUpdate,
            ToolInvocation::RedirectToExisting { .. } => ToolKind::RedirectToExisting,
            ToolInvocation::DeclareNoExisting => ToolKind::DeclareNoExisting,
            ToolInvocation::FinishSession => ToolKind::FinishSession,
        }
    }

    /// Validate a model tool call, filling gaps from the session.
    pub fn parse(kind: ToolKind, call: &ToolCall, defaults: &SessionDefaults) -> Result<Self, ToolError> {
        let args = match &call.args {
            Value::Null => json!({}),
            Value::Object(_) => call.args.clone(),
            other => {
                return Err(ToolError::invalid(
                    kind,
                    format!("arguments must be an object, got {}", other),
                ))
            }
        };
        let res = &defaults.resolution;

        let inv = match kind {
            ToolKind::SearchPageIndex => {
                let a: QueryArgs = decode(kind, args)?;
                ToolInvocation::SearchPageIndex {
                    query: non_empty(kind, "query", a.query)?,
                    top_k: to_top_k(a.top_k, res.search_top_k),
                    threshold: to_threshold(kind, a.threshold, res.search_threshold)?,
                }
            }
            ToolKind::BatchResolvePageIndex => {
                let a: BatchArgs = decode(kind, args)?;
                ToolInvocation::BatchResolvePageIndex {
                    candidates: a.candidates,
                    top_k: to_top_k(a.top_k, res.batch_top_k),
                    threshold: to_threshold(kind, a.threshold, res.batch_threshold)?,
                }
            }
            ToolKind::SearchContentIndex => {
                let a: QueryArgs = decode(kind, args)?;
                ToolInvocation::SearchContentIndex {
                    query: non_empty(kind, "query", a.query)?,
                    top_k: to_top_k(a.top_k, res.content_top_k),
                }
            }
            ToolKind::GetPage => {
                let a: SlugArgs = decode(kind, args)?;
                ToolInvocation::GetPage {
                    slug: non_empty(kind, "slug", a.slug)?,
                }
            }
            ToolKind::PersistNewPage => {
                let a: NewPageArgs = decode(kind, args)?;
                let link = &defaults.link_text;
                ToolInvocation::PersistNewPage(NewPage {
                    title: a.title.unwrap_or_else(|| link.clone()),
                    // A proposal with nothing to canonicalize takes the red link's slug.
                    proposed_slug: a
                        .proposed_slug
                        .filter(|s| s.chars().any(|c| c.is_ascii_alphanumeric()))
                        .unwrap_or_else(|| defaults.target_slug.clone()),
                    summary: a
                        .summary
                        .unwrap_or_else(|| format!("An article about {} as of the year 3025.", link)),
                    markdown: a.markdown.unwrap_or_else(|| stub_markdown(link)),
                })
            }
            ToolKind::PersistPageUpdate => {
                let a: UpdateArgs = decode(kind, args)?;
                ToolInvocation::PersistPageUpdate(PageUpdate {
                    slug: a.slug.unwrap_or_else(|| defaults.source_slug.clone()),
                    markdown: a
                        .markdown
                        .unwrap_or_else(|| defaults.source_markdown.clone()),
                    summary: a.summary,
                })
            }
            ToolKind::RedirectToExisting => {
                let a: SlugArgs = decode(kind, args)?;
                ToolInvocation::RedirectToExisting {
                    slug: non_empty(kind, "slug", a.slug)?,
                }
            }
            ToolKind::DeclareNoExisting => ToolInvocation::DeclareNoExisting,
            ToolKind::FinishSession => ToolInvocation::FinishSession,
        };

        Ok(inv)
    }
}

fn decode<T: serde::de::DeserializeOwned>(kind: ToolKind, args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::invalid(kind, e.to_string()))
}

fn non_empty(kind: ToolKind, field: &str, value: Option<String>) -> Result<String, ToolError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ToolError::invalid(kind, format!("{} must not be empty", field))),
    }
}

fn to_top_k(value: Option<f64>, default: usize) -> usize {
    match value {
        Some(v) if v.is_finite() && v >= 1.0 => v.round().min(100.0) as usize,
        _ => default,
    }
}

fn to_threshold(kind: ToolKind, value: Option<f64>, default: f32) -> Result<f32, ToolError> {
    match value {
        None => Ok(default),
        Some(v) if (0.0..=1.0).contains(&v) => Ok(v as f32),
        Some(v) => Err(ToolError::invalid(
            kind,
            format!("threshold must be in [0, 1], got {}", v),
        )),
    }
}

fn stub_markdown(link_text: &str) -> String {
    format!(
        "# {}\n\nThis article describes {} from the vantage point of 3025.\n\n*This article was generated automatically and needs expansion.*",
        link_text, link_text
    )
}

/// Side effects of a successful tool call the orchestrator tracks.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    /// Payload sent back to the model as the function response.
    pub response: Value,
    pub created: Option<PersistedPage>,
    /// Slug of a page that `persist_page_update` rewrote.
    pub updated_slug: Option<String>,
}

impl ToolOutcome {
    fn result(value: Value) -> Self {
        Self {
            response: json!({ "result": value }),
            ..Default::default()
        }
    }
}

/// Executes [`ToolInvocation`]s against the stores and indices.
pub struct ToolSurface {
    pages: Arc<PageStore>,
    matcher: Arc<dyn SemanticMatcher>,
    retrieval: Arc<RetrievalIndex>,
}

impl ToolSurface {
    pub fn new(
        pages: Arc<PageStore>,
        matcher: Arc<dyn SemanticMatcher>,
        retrieval: Arc<RetrievalIndex>,
    ) -> Self {
        Self {
            pages,
            matcher,
            retrieval,
        }
    }

    pub async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, ToolError> {
        let kind = invocation.kind();
        let fail = |e: anyhow::Error| ToolError::execution(kind, e);

        let outcome = match invocation {
            ToolInvocation::SearchPageIndex {
                query,
                top_k,
                threshold,
            } => {
                let matches = self
                    .matcher
                    .search(query, *top_k, *threshold)
                    .await
                    .map_err(fail)?;
                ToolOutcome::result(json!({ "matches": matches }))
            }
            ToolInvocation::BatchResolvePageIndex {
                candidates,
                top_k,
                threshold,
            } => {
                let resolution = batch_resolve(self.matcher.as_ref(), candidates, *top_k, *threshold)
                    .await
                    .map_err(fail)?;
                ToolOutcome {
                    response: json!({
                        "result": resolution,
                        "guidance": BATCH_RESOLVE_GUIDANCE,
                    }),
                    ..Default::default()
                }
            }
            ToolInvocation::SearchContentIndex { query, top_k } => {
                let chunks = self.retrieval.search(query, *top_k).await.map_err(fail)?;
                ToolOutcome::result(json!({ "chunks": chunks }))
            }
            ToolInvocation::GetPage { slug } => {
                let page = self.pages.get_page(slug).await.map_err(fail)?;
                ToolOutcome::result(json!(page))
            }
            ToolInvocation::PersistNewPage(new) => {
                let persisted = self
                    .pages
                    .persist_new_page(new.clone())
                    .await
                    .map_err(fail)?;
                let mut outcome = ToolOutcome::result(json!(persisted));
                outcome.created = Some(persisted);
                outcome
            }
            ToolInvocation::PersistPageUpdate(update) => {
                self.pages
                    .persist_page_update(update.clone())
                    .await
                    .map_err(fail)?;
                let mut outcome = ToolOutcome::result(json!({ "ok": true }));
                outcome.updated_slug = Some(update.slug.clone());
                outcome
            }
            ToolInvocation::RedirectToExisting { .. } | ToolInvocation::DeclareNoExisting => {
                ToolOutcome::result(json!({ "accepted": true }))
            }
            ToolInvocation::FinishSession => ToolOutcome {
                response: json!({ "ok": true }),
                ..Default::default()
            },
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> SessionDefaults {
        SessionDefaults {
            source_slug: "solar-system".to_string(),
            source_markdown: "# Solar System".to_string(),
            target_slug: "pioneers-of-titan".to_string(),
            link_text: "타이탄 개척자".to_string(),
            resolution: ResolutionConfig::default(),
        }
    }

    #[test]
    fn test_names_roundtrip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("delete_everything"), None);
    }

    #[test]
    fn test_mode_tool_sets() {
        assert!(!EXISTING_MODE_TOOLS.contains(&ToolKind::PersistNewPage));
        assert!(NEW_MODE_TOOLS.contains(&ToolKind::PersistNewPage));
        for kind in DECISION_TOOLS {
            assert!(!NEW_MODE_TOOLS.contains(kind));
            assert!(!EXISTING_MODE_TOOLS.contains(kind));
        }
    }

    #[test]
    fn test_search_defaults_from_resolution() {
        let call = ToolCall::new("search_page_index", json!({ "query": "titan" }));
        let inv = ToolInvocation::parse(ToolKind::SearchPageIndex, &call, &defaults()).unwrap();
        match inv {
            ToolInvocation::SearchPageIndex {
                query,
                top_k,
                threshold,
            } => {
                assert_eq!(query, "titan");
                assert_eq!(top_k, 5);
                assert!((threshold - 0.85).abs() < 1e-6);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_float_top_k_accepted() {
        let call = ToolCall::new("search_content_index", json!({ "query": "q", "topK": 3.0 }));
        let inv = ToolInvocation::parse(ToolKind::SearchContentIndex, &call, &defaults()).unwrap();
        assert!(matches!(inv, ToolInvocation::SearchContentIndex { top_k: 3, .. }));
    }

    #[test]
    fn test_missing_query_is_invalid() {
        let call = ToolCall::new("search_page_index", json!({}));
        let err = ToolInvocation::parse(ToolKind::SearchPageIndex, &call, &defaults()).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(err.to_string().contains("search_page_index"));
    }

    #[test]
    fn test_wrong_type_is_invalid() {
        let call = ToolCall::new("get_page", json!({ "slug": 42 }));
        assert!(ToolInvocation::parse(ToolKind::GetPage, &call, &defaults()).is_err());
    }

    #[test]
    fn test_persist_new_page_fallbacks() {
        let call = ToolCall::new("persist_new_page", json!({ "markdown": "# body" }));
        let inv = ToolInvocation::parse(ToolKind::PersistNewPage, &call, &defaults()).unwrap();
        let ToolInvocation::PersistNewPage(new) = inv else {
            panic!("expected PersistNewPage");
        };
        assert_eq!(new.title, "타이탄 개척자");
        assert_eq!(new.proposed_slug, "pioneers-of-titan");
        assert_eq!(new.markdown, "# body");
        assert!(new.summary.contains("타이탄 개척자"));
    }

    #[test]
    fn test_hangul_only_proposed_slug_takes_target_slug() {
        for proposed in ["타이탄 개척자", "--", "   "] {
            let call = ToolCall::new(
                "persist_new_page",
                json!({ "proposedSlug": proposed, "markdown": "# body" }),
            );
            let inv = ToolInvocation::parse(ToolKind::PersistNewPage, &call, &defaults()).unwrap();
            let ToolInvocation::PersistNewPage(new) = inv else {
                panic!("expected PersistNewPage");
            };
            assert_eq!(new.proposed_slug, "pioneers-of-titan", "proposed {:?}", proposed);
        }

        let call = ToolCall::new(
            "persist_new_page",
            json!({ "proposedSlug": "타이탄 2", "markdown": "# body" }),
        );
        let inv = ToolInvocation::parse(ToolKind::PersistNewPage, &call, &defaults()).unwrap();
        let ToolInvocation::PersistNewPage(new) = inv else {
            panic!("expected PersistNewPage");
        };
        assert_eq!(new.proposed_slug, "타이탄 2");
    }

    #[test]
    fn test_persist_update_defaults_to_source() {
        let call = ToolCall::new("persist_page_update", Value::Null);
        let inv = ToolInvocation::parse(ToolKind::PersistPageUpdate, &call, &defaults()).unwrap();
        let ToolInvocation::PersistPageUpdate(update) = inv else {
            panic!("expected PersistPageUpdate");
        };
        assert_eq!(update.slug, "solar-system");
        assert_eq!(update.markdown, "# Solar System");
        assert!(update.summary.is_none());
    }

    #[test]
    fn test_threshold_out_of_range() {
        let call = ToolCall::new(
            "batch_resolve_page_index",
            json!({ "candidates": [{ "term": "x" }], "threshold": 3 }),
        );
        assert!(ToolInvocation::parse(ToolKind::BatchResolvePageIndex, &call, &defaults()).is_err());
    }

    #[test]
    fn test_declarations_are_objects() {
        for decl in declarations(&ToolKind::ALL) {
            assert_eq!(decl.parameters["type"], "object", "{}", decl.name);
        }
    }
}
