//! Anthropic-native adapter.
//!
//! Implements the Messages API: system text rides in a separate
//! top-level `system` field (with `cache_control` markers on hinted
//! blocks), tool calls are `tool_use` content blocks, and tool results
//! go back as user messages with `tool_result` blocks. This is the
//! structured-tool-call backend; it never needs text recovery.

use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{body_excerpt, from_reqwest};
use px_domain::chat::{FinishReason, LlmResponse, Message, Role, ToolCall, Usage};
use px_domain::config::ProviderConfig;
use px_domain::error::{Error, Result};
use serde_json::Value;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The Messages API requires `max_tokens`; used when the caller did not
/// set one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for the Anthropic Messages API.
#[derive(Debug)]
pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new provider from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.model.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            default_model: cfg.model.clone(),
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_messages_body(&self, req: &ChatRequest) -> Value {
        let requested = req.model.as_deref().unwrap_or(&self.default_model);
        // The API wants the bare model name.
        let model = requested.rsplit('/').next().unwrap_or(requested);

        let mut system_blocks: Vec<Value> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => collect_system_blocks(msg, &mut system_blocks),
                Role::User => {
                    api_messages.push(serde_json::json!({
                        "role": "user",
                        "content": msg.content,
                    }));
                }
                Role::Assistant => api_messages.push(assistant_to_anthropic(msg)),
                Role::Tool => {
                    // Tool results are user messages with tool_result
                    // blocks.
                    api_messages.push(serde_json::json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": msg.tool_call_id.as_deref().unwrap_or(""),
                            "content": msg.content,
                        }],
                    }));
                }
            }
        }

        let mut body = serde_json::json!({
            "model": model,
            "messages": api_messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });

        if !system_blocks.is_empty() {
            body["system"] = Value::Array(system_blocks);
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        if let Some(temp) = req.temperature {
            // The Messages API caps temperature at 1.0; clamp silently.
            body["temperature"] = serde_json::json!(temp.min(1.0));
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn collect_system_blocks(msg: &Message, out: &mut Vec<Value>) {
    match &msg.system_blocks {
        Some(blocks) => {
            for block in blocks {
                let mut v = serde_json::json!({ "type": "text", "text": block.text });
                if block.cache_hint {
                    v["cache_control"] = serde_json::json!({ "type": "ephemeral" });
                }
                out.push(v);
            }
        }
        None => {
            if !msg.content.is_empty() {
                out.push(serde_json::json!({ "type": "text", "text": msg.content }));
            }
        }
    }
}

fn assistant_to_anthropic(msg: &Message) -> Value {
    let mut content: Vec<Value> = Vec::new();
    if !msg.content.is_empty() {
        content.push(serde_json::json!({ "type": "text", "text": msg.content }));
    }
    for tc in &msg.tool_calls {
        let mut block = serde_json::json!({
            "type": "tool_use",
            "id": tc.id,
            "name": tc.name,
            "input": Value::Object(tc.arguments.clone()),
        });
        // Echo any backend extension fields (signature blobs etc.)
        // captured when the call was first parsed.
        if let Some(Value::Object(ext)) = &tc.provider_ext {
            for (k, v) in ext {
                block[k.as_str()] = v.clone();
            }
        }
        content.push(block);
    }
    serde_json::json!({ "role": "assistant", "content": content })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fields of a `tool_use` block that belong to the public schema;
/// anything else is treated as an opaque extension to echo back.
const TOOL_USE_SCHEMA_FIELDS: &[&str] = &["type", "id", "name", "input"];

fn parse_messages_response(body: &Value) -> LlmResponse {
    let blocks = match body.get("content").and_then(|v| v.as_array()) {
        Some(b) => b,
        None => return LlmResponse::empty(),
    };

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block.get("type").and_then(|v| v.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    content.push_str(t);
                }
            }
            Some("thinking") => {
                if let Some(t) = block.get("thinking").and_then(|v| v.as_str()) {
                    reasoning.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let arguments = match block.get("input") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => serde_json::Map::new(),
                };
                let provider_ext = extension_fields(block);
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments,
                    provider_ext,
                });
            }
            _ => {}
        }
    }

    let finish_reason = match body.get("stop_reason").and_then(|v| v.as_str()) {
        Some("end_turn") => FinishReason::Stop,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        _ => FinishReason::Other,
    };

    let usage = body
        .get("usage")
        .map(|u| {
            let input = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let output = u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            Usage {
                prompt_tokens: input,
                completion_tokens: output,
                total_tokens: input + output,
            }
        })
        .unwrap_or_default();

    LlmResponse {
        content,
        reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
        tool_calls,
        finish_reason,
        usage,
    }
}

/// Collect non-schema fields of a `tool_use` block into an opaque
/// extension object.
fn extension_fields(block: &Value) -> Option<Value> {
    let obj = block.as_object()?;
    let ext: serde_json::Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| !TOOL_USE_SCHEMA_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!ext.is_empty()).then_some(Value::Object(ext))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(req);

        tracing::debug!(provider = %self.id, url = %url, "anthropic chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), body_excerpt(&resp_text)),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        Ok(parse_messages_response(&resp_json))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
