//! Link Resolution Decider.
//!
//! One model exchange, two possible verdicts: the clicked link names the
//! same topic as an existing page, or it does not. Candidates come from the
//! Semantic Index; the model judges them by summary. Anything other than a
//! clean `redirect_to_existing` naming a shown candidate counts as no match,
//! so failures lean toward creating a page.

use serde_json::Value;
use std::sync::Arc;

use crate::config::{DraftingConfig, ModelConfig, ResolutionConfig};
use crate::index::SemanticMatcher;
use crate::llm::{LanguageModel, Message, ModelRequest, ModelResponse, ToolMode};
use crate::models::PageMatch;
use crate::prompts;
use crate::tools::{declarations, ToolKind, DECISION_TOOLS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// An existing page with this slug covers the same topic.
    Existing(String),
    NoMatch,
}

pub struct Decider {
    matcher: Arc<dyn SemanticMatcher>,
    model: Arc<dyn LanguageModel>,
    top_k: usize,
    threshold: f32,
    summary_chars: usize,
    temperature: f32,
}

impl Decider {
    pub fn new(
        matcher: Arc<dyn SemanticMatcher>,
        model: Arc<dyn LanguageModel>,
        resolution: &ResolutionConfig,
        drafting: &DraftingConfig,
        model_config: &ModelConfig,
    ) -> Self {
        Self {
            matcher,
            model,
            top_k: resolution.decision_top_k,
            threshold: resolution.decision_threshold,
            summary_chars: drafting.candidate_summary_chars,
            temperature: model_config.decision_temperature,
        }
    }

    /// Semantic-index candidates for a link, summaries shortened for the
    /// prompt. Search failures yield no candidates.
    pub async fn candidates(&self, link_text: &str) -> Vec<PageMatch> {
        match self.matcher.search(link_text, self.top_k, self.threshold).await {
            Ok(matches) => matches
                .into_iter()
                .map(|m| PageMatch {
                    summary: prompts::truncate_chars(&m.summary, self.summary_chars).to_string(),
                    ..m
                })
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, link_text, "semantic index search failed");
                Vec::new()
            }
        }
    }

    pub async fn decide(&self, link_text: &str, target_slug: &str, context: &str) -> Decision {
        let candidates = self.candidates(link_text).await;
        if candidates.is_empty() {
            tracing::info!(target_slug, "no decision candidates");
            return Decision::NoMatch;
        }

        let request = ModelRequest {
            system: prompts::decision_system_prompt(),
            messages: vec![Message::user_text(prompts::decision_user_prompt(
                link_text,
                target_slug,
                context,
                &candidates,
            ))],
            tools: declarations(DECISION_TOOLS),
            tool_mode: ToolMode::Auto,
            temperature: self.temperature,
        };

        let decision = match self.model.generate(&request).await {
            Ok(response) => interpret(&response, &candidates),
            Err(e) => {
                tracing::warn!(error = %e, target_slug, "decision model call failed");
                Decision::NoMatch
            }
        };

        tracing::info!(
            target_slug,
            candidates = candidates.len(),
            decision = ?decision,
            "link resolution decided"
        );
        decision
    }
}

/// Read the verdict out of a decision response. The last recognized
/// decision call wins; a redirect to a slug that was not offered is
/// treated as no match.
pub fn interpret(response: &ModelResponse, candidates: &[PageMatch]) -> Decision {
    let mut decision = Decision::NoMatch;

    for call in &response.tool_calls {
        match ToolKind::from_name(&call.name) {
            Some(ToolKind::RedirectToExisting) => {
                let slug = call.args.get("slug").and_then(Value::as_str).unwrap_or("");
                decision = if candidates.iter().any(|c| c.slug == slug) {
                    Decision::Existing(slug.to_string())
                } else {
                    Decision::NoMatch
                };
            }
            Some(ToolKind::DeclareNoExisting) => decision = Decision::NoMatch,
            _ => {}
        }
    }

    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct Candidates(Vec<PageMatch>);

    #[async_trait]
    impl SemanticMatcher for Candidates {
        async fn search(&self, _q: &str, top_k: usize, _t: f32) -> Result<Vec<PageMatch>> {
            Ok(self.0.iter().take(top_k).cloned().collect())
        }
    }

    struct OneShot {
        reply: Option<ModelResponse>,
        seen: Mutex<Vec<ModelRequest>>,
    }

    #[async_trait]
    impl LanguageModel for OneShot {
        fn model_name(&self) -> &str {
            "one-shot"
        }

        async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply
                .clone()
                .ok_or_else(|| anyhow::anyhow!("model unavailable"))
        }
    }

    fn candidate(slug: &str, title: &str, summary: &str) -> PageMatch {
        PageMatch {
            slug: slug.to_string(),
            title: title.to_string(),
            summary: summary.to_string(),
            score: 0.81,
        }
    }

    fn decider(matches: Vec<PageMatch>, reply: Option<ModelResponse>) -> (Decider, Arc<OneShot>) {
        let model = Arc::new(OneShot {
            reply,
            seen: Mutex::new(Vec::new()),
        });
        let d = Decider::new(
            Arc::new(Candidates(matches)),
            model.clone(),
            &ResolutionConfig::default(),
            &DraftingConfig::default(),
            &crate::config::ModelConfig::default(),
        );
        (d, model)
    }

    #[tokio::test]
    async fn test_no_candidates_skips_model() {
        let (d, model) = decider(vec![], Some(ModelResponse::text("unused")));
        assert_eq!(d.decide("돔 도시", "dome-city", "ctx").await, Decision::NoMatch);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redirect_to_offered_candidate() {
        let reply = ModelResponse::calls(vec![ToolCall::new(
            "redirect_to_existing",
            json!({ "slug": "generation-ship" }),
        )]);
        let (d, model) = decider(
            vec![candidate("generation-ship", "세대 항해선", "수 세대에 걸쳐 항해하는 우주선")],
            Some(reply),
        );

        let decision = d.decide("세대 항해선", "generation-ships", "ctx").await;
        assert_eq!(decision, Decision::Existing("generation-ship".to_string()));

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tool_mode, ToolMode::Auto);
        assert_eq!(seen[0].tools.len(), 2);
    }

    #[tokio::test]
    async fn test_declare_no_existing() {
        let reply = ModelResponse::calls(vec![ToolCall::new("declare_no_existing", json!({}))]);
        let (d, _) = decider(
            vec![candidate("mars-city-states", "화성 독립 도시국가", "돔 도시나 지하 도시")],
            Some(reply),
        );
        assert_eq!(d.decide("돔 도시", "dome-city", "ctx").await, Decision::NoMatch);
    }

    #[tokio::test]
    async fn test_model_error_fails_open() {
        let (d, _) = decider(vec![candidate("a", "A", "a")], None);
        assert_eq!(d.decide("a", "a", "ctx").await, Decision::NoMatch);
    }

    #[tokio::test]
    async fn test_summaries_are_shortened() {
        let long = "가".repeat(1000);
        let (d, _) = decider(vec![candidate("a", "A", &long)], None);
        let c = d.candidates("a").await;
        assert_eq!(c[0].summary.chars().count(), 400);
    }

    #[test]
    fn test_interpret_unknown_slug_and_last_call_wins() {
        let offered = vec![candidate("titan", "타이탄", "s")];

        let unknown = ModelResponse::calls(vec![ToolCall::new(
            "redirect_to_existing",
            json!({ "slug": "europa" }),
        )]);
        assert_eq!(interpret(&unknown, &offered), Decision::NoMatch);

        let flip = ModelResponse::calls(vec![
            ToolCall::new("declare_no_existing", json!({})),
            ToolCall::new("redirect_to_existing", json!({ "slug": "titan" })),
        ]);
        assert_eq!(interpret(&flip, &offered), Decision::Existing("titan".to_string()));

        assert_eq!(interpret(&ModelResponse::text("hmm"), &offered), Decision::NoMatch);
    }
}
