//! Drafting Orchestrator: the bounded tool loop.
//!
//! Each turn sends the whole conversation plus the mode's tool set to the
//! model with tool calling forced on. The model's calls are run strictly in
//! order; their responses go back as one user message. The loop ends when
//! the model answers with text only, calls `finish_session`, the model call
//! fails, or the turn budget runs out (exhaustion).
//!
//! Job bookkeeping happens inline: a successful `persist_new_page` marks
//! the job succeeded at once, and the first tool error marks it failed at
//! once. Both transitions are guarded by the ledger, so whichever lands
//! first is final.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::{DraftingConfig, ResolutionConfig};
use crate::jobs::JobLedger;
use crate::llm::{LanguageModel, Message, ModelRequest, Part, Role, ToolCall, ToolMode};
use crate::models::{LogLevel, LogPhase, NewLogEntry, PersistedPage};
use crate::prompts::{self, DraftBrief};
use crate::tools::{
    declarations, SessionDefaults, ToolInvocation, ToolKind, ToolSurface, EXISTING_MODE_TOOLS,
    NEW_MODE_TOOLS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftMode {
    /// Patch the source page to point at an existing page.
    Existing { slug: String },
    /// Write a new page for the link target.
    New,
}

impl DraftMode {
    pub fn tools(&self) -> &'static [ToolKind] {
        match self {
            DraftMode::Existing { .. } => EXISTING_MODE_TOOLS,
            DraftMode::New => NEW_MODE_TOOLS,
        }
    }
}

/// Everything one drafting run needs to know.
#[derive(Debug, Clone)]
pub struct DraftSession {
    pub source_slug: String,
    pub source_title: String,
    pub source_markdown: String,
    pub target_slug: String,
    pub link_text: String,
    pub context: String,
    pub mode: DraftMode,
}

impl DraftSession {
    fn brief(&self) -> DraftBrief<'_> {
        DraftBrief {
            source_slug: &self.source_slug,
            source_title: &self.source_title,
            source_markdown: &self.source_markdown,
            target_slug: &self.target_slug,
            link_text: &self.link_text,
            context: &self.context,
        }
    }

    fn system_prompt(&self) -> String {
        match &self.mode {
            DraftMode::Existing { slug } => prompts::existing_mode_system_prompt(&self.brief(), slug),
            DraftMode::New => prompts::new_mode_system_prompt(&self.brief()),
        }
    }

    fn user_prompt(&self) -> String {
        let existing = match &self.mode {
            DraftMode::Existing { slug } => Some(slug.as_str()),
            DraftMode::New => None,
        };
        prompts::drafting_user_prompt(&self.brief(), existing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// `finish_session` was called.
    Finished,
    /// The model answered without tool calls.
    Text,
    /// The turn budget ran out.
    Exhausted,
    ModelError(String),
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub end: EndReason,
    pub turns: usize,
    pub created: Option<PersistedPage>,
    /// The source page was rewritten through `persist_page_update`.
    pub source_patched: bool,
    /// Display text of the first tool error.
    pub tool_failure: Option<String>,
}

impl RunOutcome {
    fn new() -> Self {
        Self {
            end: EndReason::Exhausted,
            turns: 0,
            created: None,
            source_patched: false,
            tool_failure: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Succeeded(String),
    Failed(String),
}

/// Map a finished run to the job's terminal state.
pub fn resolve_terminal(mode: &DraftMode, outcome: &RunOutcome) -> Terminal {
    if let Some(message) = &outcome.tool_failure {
        return Terminal::Failed(message.clone());
    }

    match mode {
        DraftMode::New => {
            if let Some(page) = &outcome.created {
                return Terminal::Succeeded(page.canonical_slug.clone());
            }
            match &outcome.end {
                EndReason::ModelError(m) => Terminal::Failed(format!("model error: {}", m)),
                EndReason::Exhausted => Terminal::Failed(
                    "exhausted turn budget without persisting a page".to_string(),
                ),
                EndReason::Finished | EndReason::Text => {
                    Terminal::Failed("session ended without creating a page".to_string())
                }
            }
        }
        DraftMode::Existing { slug } => match &outcome.end {
            EndReason::ModelError(m) => Terminal::Failed(format!("model error: {}", m)),
            EndReason::Exhausted if !outcome.source_patched => Terminal::Failed(
                "exhausted turn budget without patching the source page".to_string(),
            ),
            _ => Terminal::Succeeded(slug.clone()),
        },
    }
}

/// JSON text of `value`, cut to `max_chars` characters with a trailing
/// `...` when cut.
pub fn snippet(value: &Value, max_chars: usize) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let cut = prompts::truncate_chars(&text, max_chars);
    if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        text
    }
}

/// Where run events go: the job's durable log when a job is attached,
/// `tracing` otherwise.
pub struct RunLog<'a> {
    ledger: &'a JobLedger,
    job_id: Option<&'a str>,
}

impl<'a> RunLog<'a> {
    pub fn new(ledger: &'a JobLedger, job_id: Option<&'a str>) -> Self {
        Self { ledger, job_id }
    }

    pub async fn write(&self, entry: NewLogEntry) {
        let Some(job_id) = self.job_id else {
            let tool = entry.tool_name.as_deref().unwrap_or("-");
            match entry.level {
                LogLevel::Info => tracing::info!(phase = entry.phase.as_str(), tool, "{}", entry.message),
                LogLevel::Warn => tracing::warn!(phase = entry.phase.as_str(), tool, "{}", entry.message),
                LogLevel::Error => tracing::error!(phase = entry.phase.as_str(), tool, "{}", entry.message),
            }
            return;
        };
        if let Err(e) = self.ledger.append_log(job_id, &entry).await {
            tracing::warn!(job_id, error = %e, "failed to append creation log");
        }
    }

    async fn succeed(&self, slug: &str) {
        if let Some(job_id) = self.job_id {
            if let Err(e) = self.ledger.mark_succeeded(job_id, slug).await {
                tracing::warn!(job_id, error = %e, "failed to mark job succeeded");
            }
        }
    }

    async fn fail(&self, message: &str) {
        if let Some(job_id) = self.job_id {
            if let Err(e) = self.ledger.mark_failed(job_id, message).await {
                tracing::warn!(job_id, error = %e, "failed to mark job failed");
            }
        }
    }
}

pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    tools: Arc<ToolSurface>,
    ledger: Arc<JobLedger>,
    resolution: ResolutionConfig,
    drafting: DraftingConfig,
    temperature: f32,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        tools: Arc<ToolSurface>,
        ledger: Arc<JobLedger>,
        resolution: ResolutionConfig,
        drafting: DraftingConfig,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            tools,
            ledger,
            resolution,
            drafting,
            temperature,
        }
    }

    /// Drive one session to its end. Job status changes caused by tool
    /// results are applied along the way; the caller settles the rest from
    /// the returned outcome.
    pub async fn run(&self, session: &DraftSession, job_id: Option<&str>) -> RunOutcome {
        let log = RunLog::new(&self.ledger, job_id);
        let tool_set = session.mode.tools();
        let defaults = SessionDefaults {
            source_slug: session.source_slug.clone(),
            source_markdown: session.source_markdown.clone(),
            target_slug: session.target_slug.clone(),
            link_text: session.link_text.clone(),
            resolution: self.resolution.clone(),
        };

        let system = session.system_prompt();
        let mut messages = vec![Message::user_text(session.user_prompt())];
        let mut outcome = RunOutcome::new();

        for turn in 1..=self.drafting.max_turns {
            outcome.turns = turn;

            let request = ModelRequest {
                system: system.clone(),
                messages: messages.clone(),
                tools: declarations(tool_set),
                tool_mode: ToolMode::Any,
                temperature: self.temperature,
            };

            let response = match self.model.generate(&request).await {
                Ok(r) => r,
                Err(e) => {
                    let message = format!("{:#}", e);
                    log.write(NewLogEntry::new(
                        LogLevel::Error,
                        LogPhase::Model,
                        format!("turn {}: model call failed: {}", turn, message),
                    ))
                    .await;
                    outcome.end = EndReason::ModelError(message);
                    return outcome;
                }
            };

            log.write(NewLogEntry::new(
                LogLevel::Info,
                LogPhase::Model,
                format!("turn {}: {} tool call(s)", turn, response.tool_calls.len()),
            ))
            .await;

            if response.tool_calls.is_empty() {
                outcome.end = EndReason::Text;
                return outcome;
            }

            let mut model_parts = Vec::new();
            if let Some(text) = response.text.as_ref().filter(|t| !t.trim().is_empty()) {
                model_parts.push(Part::Text(text.clone()));
            }
            model_parts.extend(response.tool_calls.iter().cloned().map(Part::Call));
            messages.push(Message {
                role: Role::Model,
                parts: model_parts,
            });

            let mut responses = Vec::new();
            let mut finished = false;
            for call in &response.tool_calls {
                let (payload, terminal) = self
                    .dispatch(call, tool_set, &defaults, &mut outcome, &log)
                    .await;
                responses.push(Part::Response {
                    name: call.name.clone(),
                    response: payload,
                });
                if terminal {
                    finished = true;
                    break;
                }
            }
            messages.push(Message {
                role: Role::User,
                parts: responses,
            });

            if finished {
                outcome.end = EndReason::Finished;
                return outcome;
            }
        }

        log.write(NewLogEntry::new(
            LogLevel::Warn,
            LogPhase::Model,
            format!("turn budget of {} exhausted", self.drafting.max_turns),
        ))
        .await;
        outcome.end = EndReason::Exhausted;
        outcome
    }

    /// Run one call. Returns the function response and whether the call
    /// ends the session.
    async fn dispatch(
        &self,
        call: &ToolCall,
        tool_set: &[ToolKind],
        defaults: &SessionDefaults,
        outcome: &mut RunOutcome,
        log: &RunLog<'_>,
    ) -> (Value, bool) {
        let args_snip = snippet(&call.args, self.drafting.args_snip_chars);

        let Some(kind) = ToolKind::from_name(&call.name).filter(|k| tool_set.contains(k)) else {
            log.write(
                NewLogEntry::new(
                    LogLevel::Warn,
                    LogPhase::Tool,
                    format!("unrecognized tool {}", call.name),
                )
                .tool(call.name.clone())
                .args(args_snip),
            )
            .await;
            return (json!({ "result": null }), false);
        };

        if kind == ToolKind::PersistNewPage {
            if let Some(existing) = &outcome.created {
                log.write(
                    NewLogEntry::new(
                        LogLevel::Warn,
                        LogPhase::Tool,
                        "rejected second persist_new_page",
                    )
                    .tool(kind.name())
                    .args(args_snip),
                )
                .await;
                return (
                    json!({
                        "result": {
                            "rejected": true,
                            "reason": "a page was already created in this session",
                            "canonicalSlug": existing.canonical_slug,
                        }
                    }),
                    false,
                );
            }
        }

        let result = match ToolInvocation::parse(kind, call, defaults) {
            Ok(invocation) => self.tools.execute(&invocation).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(tool_outcome) => {
                log.write(
                    NewLogEntry::new(LogLevel::Info, LogPhase::Tool, format!("{} ok", kind.name()))
                        .tool(kind.name())
                        .args(args_snip)
                        .result(snippet(&tool_outcome.response, self.drafting.result_snip_chars)),
                )
                .await;

                if let Some(page) = tool_outcome.created {
                    log.succeed(&page.canonical_slug).await;
                    outcome.created = Some(page);
                }
                if tool_outcome.updated_slug.as_deref() == Some(defaults.source_slug.as_str()) {
                    outcome.source_patched = true;
                }
                (tool_outcome.response, kind.is_terminal())
            }
            Err(e) => {
                let message = e.to_string();
                log.write(
                    NewLogEntry::new(LogLevel::Error, LogPhase::Tool, message.clone())
                        .tool(kind.name())
                        .args(args_snip),
                )
                .await;
                log.fail(&message).await;
                outcome.tool_failure.get_or_insert(message.clone());
                (json!({ "error": message }), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn persisted(slug: &str) -> PersistedPage {
        PersistedPage {
            page_id: "p1".to_string(),
            canonical_slug: slug.to_string(),
            storage_object_path: format!("pages/{}.md", slug),
        }
    }

    fn outcome(end: EndReason) -> RunOutcome {
        RunOutcome {
            end,
            ..RunOutcome::new()
        }
    }

    #[test]
    fn test_snippet_truncates_with_ellipsis() {
        let v = json!({ "query": "타이탄".repeat(10) });
        let s = snippet(&v, 8);
        assert!(s.ends_with("..."));
        assert_eq!(s.chars().count(), 11);

        assert_eq!(snippet(&json!({"a": 1}), 800), "{\"a\":1}");
        assert_eq!(snippet(&json!("plain"), 800), "plain");
    }

    #[test]
    fn test_new_mode_created_page_succeeds() {
        let mut o = outcome(EndReason::Exhausted);
        o.created = Some(persisted("titan-1"));
        assert_eq!(
            resolve_terminal(&DraftMode::New, &o),
            Terminal::Succeeded("titan-1".to_string())
        );
    }

    #[test]
    fn test_new_mode_without_page_fails() {
        match resolve_terminal(&DraftMode::New, &outcome(EndReason::Exhausted)) {
            Terminal::Failed(m) => assert!(m.contains("exhausted")),
            other => panic!("unexpected {:?}", other),
        }
        match resolve_terminal(&DraftMode::New, &outcome(EndReason::Finished)) {
            Terminal::Failed(m) => assert!(m.contains("without creating")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tool_failure_wins() {
        let mut o = outcome(EndReason::Finished);
        o.created = Some(persisted("titan"));
        o.tool_failure = Some("get_page failed: boom".to_string());
        assert_eq!(
            resolve_terminal(&DraftMode::New, &o),
            Terminal::Failed("get_page failed: boom".to_string())
        );
    }

    #[test]
    fn test_existing_mode_resolution() {
        let mode = DraftMode::Existing {
            slug: "generation-ship".to_string(),
        };
        assert_eq!(
            resolve_terminal(&mode, &outcome(EndReason::Text)),
            Terminal::Succeeded("generation-ship".to_string())
        );
        assert!(matches!(
            resolve_terminal(&mode, &outcome(EndReason::Exhausted)),
            Terminal::Failed(_)
        ));

        let mut patched = outcome(EndReason::Exhausted);
        patched.source_patched = true;
        assert_eq!(
            resolve_terminal(&mode, &patched),
            Terminal::Succeeded("generation-ship".to_string())
        );
        assert!(matches!(
            resolve_terminal(&mode, &outcome(EndReason::ModelError("x".into()))),
            Terminal::Failed(_)
        ));
    }

    #[test]
    fn test_mode_tool_sets() {
        assert!(!DraftMode::Existing { slug: "x".into() }
            .tools()
            .contains(&ToolKind::PersistNewPage));
        assert!(DraftMode::New.tools().contains(&ToolKind::PersistNewPage));
    }
}
