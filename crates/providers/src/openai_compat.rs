//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, and aggregator endpoints
//! (OpenRouter, Together, Groq) that follow the chat completions
//! contract. This is also the adapter that exercises text-embedded
//! tool-call recovery: several models served through these endpoints
//! emit tool calls inline instead of through the structured field.

use crate::textcall;
use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{body_excerpt, from_reqwest};
use px_domain::chat::{FinishReason, LlmResponse, Message, Role, ToolCall, ToolDefinition, Usage};
use px_domain::config::ProviderConfig;
use px_domain::error::{Error, Result};
use serde_json::Value;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model-id quirks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregator hosts that require the full `vendor/name` model id.
const AGGREGATOR_HOSTS: &[&str] = &["openrouter.ai", "api.together.xyz", "api.groq.com"];

/// Model families that rename `max_tokens` and pin temperature.
const REASONING_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5"];

fn is_reasoning_model(model: &str) -> bool {
    let bare = model.rsplit('/').next().unwrap_or(model);
    REASONING_PREFIXES.iter().any(|p| bare.starts_with(p))
}

/// Strip a single `vendor/` prefix unless the backend needs it intact.
fn normalize_model_id(model: &str, keep_prefix: bool) -> &str {
    if keep_prefix {
        return model;
    }
    match model.split_once('/') {
        Some((_, bare)) => bare,
        None => model,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for any OpenAI-compatible API endpoint.
#[derive(Debug)]
pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    keep_model_prefix: bool,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new provider from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let keep_model_prefix = cfg.keep_model_prefix
            || AGGREGATOR_HOSTS.iter().any(|h| cfg.base_url.contains(h));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.model.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            default_model: cfg.model.clone(),
            keep_model_prefix,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let requested = req.model.as_deref().unwrap_or(&self.default_model);
        let model = normalize_model_id(requested, self.keep_model_prefix);
        let reasoning = is_reasoning_model(model);

        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(max) = req.max_tokens {
            // Reasoning models renamed the field.
            let field = if reasoning {
                "max_completion_tokens"
            } else {
                "max_tokens"
            };
            body[field] = serde_json::json!(max);
        }
        if let Some(temp) = req.temperature {
            // Reasoning models accept only their fixed default; drop
            // the override silently.
            if !reasoning {
                body["temperature"] = serde_json::json!(temp);
            }
        }
        if let Some(ref key) = req.prompt_cache_key {
            body["prompt_cache_key"] = Value::String(key.clone());
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::System => {
            // Strict backends reject structured system blocks; flatten
            // to plain text.
            let text = match &msg.system_blocks {
                Some(blocks) => blocks
                    .iter()
                    .map(|b| b.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n"),
                None => msg.content.clone(),
            };
            serde_json::json!({ "role": "system", "content": text })
        }
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": Value::Object(tc.arguments.clone()).to_string(),
                        }
                    })
                })
                .collect();
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            serde_json::json!({
                "role": "assistant",
                "content": content,
                "tool_calls": tool_calls,
            })
        }
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(body: &Value) -> LlmResponse {
    let choice = match body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    {
        Some(c) => c,
        // Some gateways return an empty choices array on content
        // filtering; treat it as an empty stop.
        None => return LlmResponse::empty(),
    };

    let message = choice.get("message").cloned().unwrap_or(Value::Null);

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let reasoning_content = message
        .get("reasoning_content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);

    let tool_calls = parse_openai_tool_calls(&message);

    let finish_reason = match choice.get("finish_reason").and_then(|v| v.as_str()) {
        Some("stop") => FinishReason::Stop,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("length") => FinishReason::Length,
        _ => FinishReason::Other,
    };

    let usage = body
        .get("usage")
        .and_then(parse_openai_usage)
        .unwrap_or_default();

    LlmResponse {
        content,
        reasoning_content,
        tool_calls,
        finish_reason,
        usage,
    }
}

fn parse_openai_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
            // Malformed argument JSON never fails the turn; keep the
            // raw string for the tool to untangle.
            let arguments = match serde_json::from_str::<Value>(args_str) {
                Ok(Value::Object(map)) => map,
                _ => {
                    let mut map = serde_json::Map::new();
                    map.insert("raw".into(), Value::String(args_str.to_string()));
                    map
                }
            };
            Some(ToolCall {
                id,
                name,
                arguments,
                provider_ext: None,
            })
        })
        .collect()
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

/// Apply text-embedded tool-call recovery to a parsed response.
///
/// When the backend supplied no structured tool calls but the content
/// carries call tags, the recovered calls replace the content entirely
/// and the finish reason becomes `tool_calls`.
fn finalize_response(mut resp: LlmResponse) -> LlmResponse {
    if resp.tool_calls.is_empty() && textcall::contains_call_tag(&resp.content) {
        let recovered = textcall::recover_tool_calls(&resp.content);
        if !recovered.is_empty() {
            tracing::debug!(count = recovered.len(), "recovered tool calls from text");
            resp.tool_calls = recovered;
            resp.content = String::new();
            resp.finish_reason = FinishReason::ToolCalls;
        }
    }
    resp
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req);

        tracing::debug!(provider = %self.id, url = %url, "openai_compat chat request");

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
        Ok(finalize_response(parse_chat_response(&resp_json)))
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
