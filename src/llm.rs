//! Language model capability.
//!
//! The resolver and the drafting loop talk to the model through the
//! [`LanguageModel`] trait: a [`ModelRequest`] carries the system prompt,
//! the conversation so far, the declared tools and the tool-calling mode;
//! a [`ModelResponse`] carries free text, tool calls, or both.
//!
//! Implementations:
//! - **[`DisabledModel`]**: always errors; used when `[model] provider = "disabled"`.
//! - **[`GeminiModel`]**: the Gemini REST `generateContent` endpoint with
//!   function declarations, using the same retry/backoff policy as the
//!   embedding provider.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// A structured tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
    /// Opaque signature some models attach to calls; echoed back verbatim.
    pub signature: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
            signature: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Call(ToolCall),
    Response { name: String, response: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }
}

/// A tool the model may call. `parameters` is a JSON Schema object.
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    /// The model must call a tool.
    Any,
    /// The model chooses between text and tool calls.
    Auto,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDeclaration>,
    pub tool_mode: ToolMode,
    pub temperature: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse>;
}

// ============ Disabled ============

pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &ModelRequest) -> Result<ModelResponse> {
        bail!("Language model is disabled. Set [model] provider in config.")
    }
}

// ============ Gemini ============

/// Gemini `generateContent` client. Requires `GEMINI_API_KEY`.
pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl GeminiModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.name.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let url = format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model);
        let body = build_gemini_body(request);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_gemini_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, "Gemini request failed, retrying");
                        last_err = Some(anyhow::anyhow!("Gemini API error {}: {}", status, body_text));
                        continue;
                    }

                    bail!("Gemini API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Model call failed after retries")))
    }
}

/// Build the JSON body for `generateContent`.
pub fn build_gemini_body(request: &ModelRequest) -> Value {
    let contents: Vec<Value> = request
        .messages
        .iter()
        .map(|m| {
            let parts: Vec<Value> = m
                .parts
                .iter()
                .map(|p| match p {
                    Part::Text(t) => json!({ "text": t }),
                    Part::Call(call) => {
                        let mut part = json!({
                            "functionCall": { "name": call.name, "args": call.args }
                        });
                        if let Some(sig) = &call.signature {
                            part["thoughtSignature"] = json!(sig);
                        }
                        part
                    }
                    Part::Response { name, response } => json!({
                        "functionResponse": { "name": name, "response": response }
                    }),
                })
                .collect();
            json!({ "role": m.role.as_str(), "parts": parts })
        })
        .collect();

    let mut body = json!({
        "systemInstruction": { "parts": [{ "text": request.system }] },
        "contents": contents,
        "generationConfig": { "temperature": request.temperature },
    });

    if !request.tools.is_empty() {
        let decls: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": to_gemini_schema(&t.parameters),
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": decls }]);
        let mode = match request.tool_mode {
            ToolMode::Any => "ANY",
            ToolMode::Auto => "AUTO",
        };
        body["toolConfig"] = json!({ "functionCallingConfig": { "mode": mode } });
    }

    body
}

/// Gemini's schema dialect spells `type` values in upper case.
pub fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                let converted = match (k.as_str(), v) {
                    ("type", Value::String(s)) => Value::String(s.to_uppercase()),
                    _ => to_gemini_schema(v),
                };
                out.insert(k.clone(), converted);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}

/// Extract text and function calls from the first candidate. Thought
/// parts are skipped.
pub fn parse_gemini_response(json: &Value) -> Result<ModelResponse> {
    let Some(candidate) = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    else {
        if let Some(reason) = json.pointer("/promptFeedback/blockReason") {
            bail!("Gemini blocked the prompt: {}", reason);
        }
        bail!("Invalid Gemini response: no candidates");
    };

    let parts = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .cloned()
        .unwrap_or_default();

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in &parts {
        if part.get("thought").and_then(|t| t.as_bool()) == Some(true) {
            continue;
        }
        if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: functionCall without name"))?;
            tool_calls.push(ToolCall {
                name: name.to_string(),
                args: call.get("args").cloned().unwrap_or_else(|| json!({})),
                signature: part
                    .get("thoughtSignature")
                    .and_then(|s| s.as_str())
                    .map(str::to_string),
            });
        } else if let Some(t) = part.get("text").and_then(|t| t.as_str()) {
            text.push_str(t);
        }
    }

    Ok(ModelResponse {
        text: (!text.trim().is_empty()).then_some(text),
        tool_calls,
    })
}

/// Create the configured [`LanguageModel`].
pub fn create_model(config: &ModelConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "gemini" => Ok(Arc::new(GeminiModel::new(config)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_types_uppercased_recursively() {
        let schema = json!({
            "type": "object",
            "properties": {
                "candidates": {
                    "type": "array",
                    "items": { "type": "object", "properties": { "term": { "type": "string" } } }
                }
            },
            "required": ["candidates"]
        });
        let out = to_gemini_schema(&schema);
        assert_eq!(out["type"], "OBJECT");
        assert_eq!(out["properties"]["candidates"]["type"], "ARRAY");
        assert_eq!(out["properties"]["candidates"]["items"]["type"], "OBJECT");
        assert_eq!(
            out["properties"]["candidates"]["items"]["properties"]["term"]["type"],
            "STRING"
        );
        assert_eq!(out["required"], json!(["candidates"]));
    }

    #[test]
    fn test_body_carries_tools_and_mode() {
        let req = ModelRequest {
            system: "sys".to_string(),
            messages: vec![
                Message::user_text("hello"),
                Message {
                    role: Role::Model,
                    parts: vec![Part::Call(ToolCall::new("get_page", json!({"slug": "a"})))],
                },
                Message {
                    role: Role::User,
                    parts: vec![Part::Response {
                        name: "get_page".to_string(),
                        response: json!({"result": null}),
                    }],
                },
            ],
            tools: vec![ToolDeclaration {
                name: "get_page",
                description: "Get a page",
                parameters: json!({"type": "object", "properties": {}}),
            }],
            tool_mode: ToolMode::Any,
            temperature: 0.7,
        };

        let body = build_gemini_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["contents"].as_array().unwrap().len(), 3);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][1]["parts"][0]["functionCall"]["name"], "get_page");
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["name"],
            "get_page"
        );
        assert_eq!(body["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["parameters"]["type"],
            "OBJECT"
        );
    }

    #[test]
    fn test_parse_response_skips_thoughts() {
        let json = json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "thinking...", "thought": true },
                        { "functionCall": { "name": "declare_no_existing", "args": {} }, "thoughtSignature": "abc" },
                        { "text": "done" }
                    ]
                }
            }]
        });
        let resp = parse_gemini_response(&json).unwrap();
        assert_eq!(resp.text.as_deref(), Some("done"));
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "declare_no_existing");
        assert_eq!(resp.tool_calls[0].signature.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_response_without_candidates() {
        let json = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = parse_gemini_response(&json).unwrap_err().to_string();
        assert!(err.contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_disabled_model_errors() {
        let req = ModelRequest {
            system: String::new(),
            messages: vec![],
            tools: vec![],
            tool_mode: ToolMode::Auto,
            temperature: 0.0,
        };
        assert!(DisabledModel.generate(&req).await.is_err());
    }
}
