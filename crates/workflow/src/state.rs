//! Mission state: the runtime record of one workflow applied to one
//! target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use px_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Severity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Informational,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Informational => "informational",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "informational" | "info" => Ok(Severity::Informational),
            other => Err(Error::Workflow(format!("unknown severity '{other}'"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A discovery made during the mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    /// Phase name at the moment of creation.
    pub phase: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// An investigative path opened by the model in reaction to a
/// discovery; lives independently of phase progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveBranch {
    pub condition: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Findings scoped to this branch.
    #[serde(default)]
    pub findings: Vec<String>,
}

/// One pass through a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseExecution {
    pub phase: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Set semantics; duplicates are ignored on insert.
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl PhaseExecution {
    pub fn new(phase: &str) -> Self {
        Self {
            phase: phase.to_owned(),
            started_at: Utc::now(),
            ended_at: None,
            completed_steps: Vec::new(),
            notes: String::new(),
        }
    }

    /// Record a completed step; already-recorded ids are ignored.
    pub fn complete_step(&mut self, step_id: &str) {
        if !self.completed_steps.iter().any(|s| s == step_id) {
            self.completed_steps.push(step_id.to_owned());
        }
    }
}

/// The full runtime state of one mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionState {
    pub workflow: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub current_phase: usize,
    #[serde(default)]
    pub phases: Vec<PhaseExecution>,
    #[serde(default)]
    pub active_branches: Vec<ActiveBranch>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MissionState {
    pub fn new(workflow: &str, target: &str) -> Self {
        Self {
            workflow: workflow.to_owned(),
            target: target.to_owned(),
            started_at: Utc::now(),
            current_phase: 0,
            phases: Vec::new(),
            active_branches: Vec::new(),
            findings: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Branches not yet marked complete.
    pub fn open_branches(&self) -> impl Iterator<Item = &ActiveBranch> {
        self.active_branches
            .iter()
            .filter(|b| b.completed_at.is_none())
    }
}
