//! Structured trace events emitted across all praxis crates.
//!
//! Consumers (a TUI, a channel adapter) subscribe by filtering the
//! `px_event` tracing field; the core never blocks on a listener.

use serde::Serialize;

use crate::chat::Usage;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum AgentEvent {
    RoutingDecision {
        session_key: String,
        task: String,
        tier: String,
        model: String,
    },
    SupervisionVerdict {
        session_key: String,
        task: String,
        validated: bool,
        score: f64,
        supervisor_model: String,
    },
    ToolDispatched {
        session_key: String,
        call_id: String,
        tool_name: String,
        is_error: bool,
    },
    TurnCompleted {
        session_key: String,
        iterations: usize,
        usage: Usage,
    },
    MissionStateSaved {
        target: String,
        phase: String,
    },
}

impl AgentEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(px_event = %json, "px_event");
    }
}
