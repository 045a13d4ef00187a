//! Rule-based task classifier for tier routing.
//!
//! Classifies each loop iteration into a [`TaskType`] with a complexity
//! and confidence estimate. The cascade is deterministic keyword and
//! size rules with zero LLM cost: same input always yields the same
//! output. It runs on every iteration because the size rules depend
//! on tool output produced mid-turn.

use px_domain::config::RoutingConfig;
use px_domain::task::{AgentContext, Classification, TaskType};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Baseline complexity before keyword modifiers.
const DEFAULT_COMPLEXITY: i8 = 5;

/// Tool output larger than this routes to summarization.
const SUMMARY_OUTPUT_LEN: usize = 10_000;

/// Tool output larger than this routes to parsing.
const PARSING_OUTPUT_LEN: usize = 2_000;

/// Any of these in the user text forces supervision on.
const DANGER_KEYWORDS: &[&str] = &["exploit", "vulnerability", "attack", "hack", "breach"];

/// Additive complexity modifiers. The bool marks keywords that also
/// force supervision.
const COMPLEXITY_MODIFIERS: &[(&str, i8, bool)] = &[
    ("deep", 2, false),
    ("thorough", 2, false),
    ("comprehensive", 3, false),
    ("quick", -1, false),
    ("simple", -1, false),
    ("basic", -2, false),
    ("exploit", 3, true),
    ("vulnerability", 3, true),
    ("security", 2, false),
    ("analyze", 1, false),
    ("review", 1, false),
    ("test", 1, false),
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classify one loop iteration. Pure and deterministic; exposed for
/// external callers and tests.
///
/// Rule order (first match wins):
/// 1. explicit report request
/// 2. session start / first turn / phase transition → planning
/// 3. oversized tool output → summary, large tool output → parsing
/// 4. keyword scan of the user text
pub fn classify(ctx: &AgentContext) -> Classification {
    if ctx.report_requested {
        return Classification {
            task: TaskType::ReportWriting,
            complexity: 5,
            confidence: 0.9,
            requires_supervision: false,
        };
    }

    if ctx.turn_count == 0 || ctx.session_started || ctx.phase_changed {
        return Classification {
            task: TaskType::Planning,
            complexity: 8,
            confidence: 0.8,
            requires_supervision: false,
        };
    }

    if ctx.last_tool_output.len() > SUMMARY_OUTPUT_LEN {
        return Classification {
            task: TaskType::Summary,
            complexity: 7,
            confidence: 0.85,
            requires_supervision: false,
        };
    }

    if ctx.last_tool_output.len() > PARSING_OUTPUT_LEN {
        return Classification {
            task: TaskType::Parsing,
            complexity: 4,
            confidence: 0.8,
            requires_supervision: false,
        };
    }

    classify_by_keywords(&ctx.user_message.to_lowercase())
}

fn classify_by_keywords(text: &str) -> Classification {
    let mut complexity = DEFAULT_COMPLEXITY;
    let mut forced = false;

    for (keyword, delta, forces) in COMPLEXITY_MODIFIERS {
        if text.contains(keyword) {
            complexity += delta;
            forced |= forces;
        }
    }
    let complexity = complexity.clamp(1, 10) as u8;

    let (task, confidence, category_forces) =
        if text.contains("analyze") || text.contains("examine") {
            (TaskType::Analysis, 0.7, false)
        } else if text.contains("test") || text.contains("exploit") || text.contains("vulnerability")
        {
            (TaskType::Exploitation, 0.6, true)
        } else if text.contains("javascript") || text.contains("js file") {
            (TaskType::JsAnalysis, 0.75, false)
        } else if text.contains("code") || text.contains("review") {
            (TaskType::CodeReview, 0.7, false)
        } else if text.contains("which tool") || text.contains("what command") {
            (TaskType::ToolSelection, 0.8, false)
        } else {
            (TaskType::Analysis, 0.6, false)
        };

    Classification {
        task,
        complexity,
        confidence,
        requires_supervision: forced || category_forces,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervision policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decide whether this iteration's response needs a supervisor pass.
///
/// Supervision must be enabled; then any single trigger suffices:
/// keyword-forced, complexity at or above the configured floor, low
/// classifier confidence, a danger keyword in the user text, or a long
/// session still working on something hard.
pub fn supervision_required(
    ctx: &AgentContext,
    cls: &Classification,
    routing: &RoutingConfig,
) -> bool {
    if !routing.enable_supervision {
        return false;
    }

    let text = ctx.user_message.to_lowercase();
    cls.requires_supervision
        || cls.complexity >= routing.min_task_complexity_for_supervision
        || cls.confidence < 0.6
        || DANGER_KEYWORDS.iter().any(|k| text.contains(k))
        || (ctx.turn_count > 5 && cls.complexity > 6)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
