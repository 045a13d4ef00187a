//! Workflow definition types.
//!
//! A workflow is an ordered list of phases; each phase carries its
//! steps, a completion criterion, and the investigative branches the
//! model may open while working the phase.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub completion: CompletionCriteria,
    #[serde(default)]
    pub branches: Vec<BranchDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Stable slug, derived from the name when the file gives none.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionCriteria {
    pub kind: CompletionKind,
    /// The human phrasing from the workflow file.
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// Every step marked required must be complete.
    AllRequired,
    /// At least one branch must be open.
    AnyBranch,
    /// The model decides; never auto-satisfied.
    #[default]
    Custom,
}

/// A branch the workflow author anticipated. Opening one at runtime
/// creates an [`crate::state::ActiveBranch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchDef {
    /// Condition token (slug) the model uses to open the branch.
    pub condition: String,
    #[serde(default)]
    pub description: String,
    /// Phase to jump to when the branch resolves, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_phase: Option<String>,
    /// Extra steps the branch adds to the investigation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

impl Workflow {
    /// The phase at `index`, if any.
    pub fn phase(&self, index: usize) -> Option<&Phase> {
        self.phases.get(index)
    }
}

impl Phase {
    /// IDs of every step marked required.
    pub fn required_step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .filter(|s| s.required)
            .map(|s| s.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_step_ids_filters() {
        let phase = Phase {
            name: "Recon".into(),
            steps: vec![
                Step {
                    id: "a".into(),
                    name: "A".into(),
                    description: String::new(),
                    required: true,
                },
                Step {
                    id: "b".into(),
                    name: "B".into(),
                    description: String::new(),
                    required: false,
                },
            ],
            completion: CompletionCriteria::default(),
            branches: Vec::new(),
        };
        let ids: Vec<&str> = phase.required_step_ids().collect();
        assert_eq!(ids, vec!["a"]);
    }
}
