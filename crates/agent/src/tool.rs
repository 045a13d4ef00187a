//! The tool surface exposed to the model.
//!
//! A tool is a name, a description, a JSON-Schema parameter object,
//! and an async `execute`. Failures stay inside the conversation: the
//! registry converts them to text results the model can read and react
//! to, never loop-aborting errors.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use px_domain::chat::ToolDefinition;
use px_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-dispatch context handed to every tool.
#[derive(Clone)]
pub struct ToolContext {
    pub session_key: String,
    pub workspace: PathBuf,
    /// Tools running external work must honor this token.
    pub cancel: CancellationToken,
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema object: `{"type":"object","properties":…,"required":…}`.
    fn parameters(&self) -> Value;
    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<String>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The set of tools advertised to the model.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions for the chat request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Execute one tool call. Returns `(content, is_error)`. An
    /// unknown tool or a failed execution becomes an error-flagged
    /// text result, not a loop error.
    pub async fn dispatch(&self, name: &str, ctx: &ToolContext, args: &Value) -> (String, bool) {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            return (format!("unknown tool '{name}'"), true);
        };

        match tool.execute(ctx, args).await {
            Ok(content) => (content, false),
            Err(e) => {
                tracing::debug!(tool = name, error = %e, "tool execution failed");
                (format!("tool '{name}' failed: {e}"), true)
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract a required string argument.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Other(format!("missing required argument '{key}'")))
}

/// Extract an optional string argument, defaulting to empty.
pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
