//! Task classification types.
//!
//! A turn is classified into one of a closed set of task types; the
//! label picks a routing tier and decides whether the response needs a
//! supervisor's sign-off. Classification itself lives in `px-providers`
//! and is pure; these are just the shared shapes.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Closed set of task labels used for tier selection and supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Planning,
    Analysis,
    Exploitation,
    ReportWriting,
    Supervision,
    ToolSelection,
    CodeReview,
    JsAnalysis,
    Validation,
    Parsing,
    Summary,
    Formatting,
    Triage,
}

impl TaskType {
    /// The snake_case label used in tier `use_for` lists and logs.
    pub fn label(&self) -> &'static str {
        match self {
            TaskType::Planning => "planning",
            TaskType::Analysis => "analysis",
            TaskType::Exploitation => "exploitation",
            TaskType::ReportWriting => "report_writing",
            TaskType::Supervision => "supervision",
            TaskType::ToolSelection => "tool_selection",
            TaskType::CodeReview => "code_review",
            TaskType::JsAnalysis => "js_analysis",
            TaskType::Validation => "validation",
            TaskType::Parsing => "parsing",
            TaskType::Summary => "summary",
            TaskType::Formatting => "formatting",
            TaskType::Triage => "triage",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification input / output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-iteration snapshot of the conversation handed to the classifier.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    /// Number of prior assistant turns in the session.
    pub turn_count: usize,
    /// Largest tool output produced so far in this turn.
    pub last_tool_output: String,
    /// True when the workflow phase moved since the previous turn.
    pub phase_changed: bool,
    pub user_message: String,
    pub tools_available: usize,
    pub report_requested: bool,
    pub session_started: bool,
    /// Downstream task labels observers may care about; unused by the
    /// classifier itself.
    pub dependent_tasks: Vec<TaskType>,
}

/// The classifier's verdict for one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub task: TaskType,
    /// 1..=10.
    pub complexity: u8,
    /// 0.0..=1.0.
    pub confidence: f64,
    pub requires_supervision: bool,
}
