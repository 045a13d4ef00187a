//! Per-iteration classification input assembly.

use std::sync::OnceLock;

use regex::Regex;

use px_domain::chat::{Message, Role};
use px_domain::task::AgentContext;

/// "report" within reach of an imperative verb, either order.
fn report_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:write|generate|create|produce|prepare|make|give)\w*[^.\n]{0,40}\breport\b|\breport\b[^.\n]{0,40}\b(?:write|generate|create|produce|prepare|make|give)\w*",
        )
        .expect("report regex is valid")
    })
}

/// Heuristic: does the user text ask for a report?
pub fn report_requested(user_text: &str) -> bool {
    report_regex().is_match(user_text)
}

/// Build the classification input for one loop iteration.
///
/// `turn_count` is the number of prior assistant turns in the stored
/// history; `last_tool_output` is the in-turn cache (largest single
/// output so far); `phase_changed` compares the engine's phase against
/// the value cached at the previous turn.
pub fn build_agent_context(
    history: &[Message],
    user_text: &str,
    last_tool_output: &str,
    phase_changed: bool,
    tools_available: usize,
) -> AgentContext {
    let turn_count = history.iter().filter(|m| m.role == Role::Assistant).count();

    AgentContext {
        turn_count,
        last_tool_output: last_tool_output.to_owned(),
        phase_changed,
        user_message: user_text.to_owned(),
        tools_available,
        report_requested: report_requested(user_text),
        session_started: history.is_empty(),
        dependent_tasks: Vec::new(),
    }
}
