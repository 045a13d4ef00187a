//! The workflow engine: one mission, one target, one state file.
//!
//! Every mutating operation persists the mission state before
//! returning, so a crash loses at most the operation in flight. The
//! engine is not concurrency-safe on its own; the agent loop
//! guarantees single-turn ownership.

use std::path::{Path, PathBuf};

use px_domain::error::{Error, Result};
use px_domain::event::AgentEvent;

use crate::definition::{CompletionKind, Workflow};
use crate::state::{ActiveBranch, Finding, MissionState, PhaseExecution, Severity};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WorkflowEngine {
    workflow: Workflow,
    state: MissionState,
    workspace: PathBuf,
}

impl WorkflowEngine {
    /// Start a fresh mission for `target`.
    pub fn new(workflow: Workflow, target: &str, workspace: &Path) -> Self {
        let state = MissionState::new(&workflow.name, target);
        Self {
            workflow,
            state,
            workspace: workspace.to_owned(),
        }
    }

    /// Resume a mission from its persisted state file.
    pub fn resume(workflow: Workflow, target: &str, workspace: &Path) -> Result<Self> {
        let state = load_state(workspace, target)?;
        if state.workflow != workflow.name {
            return Err(Error::Workflow(format!(
                "state file belongs to workflow '{}', not '{}'",
                state.workflow, workflow.name
            )));
        }
        Ok(Self {
            workflow,
            state,
            workspace: workspace.to_owned(),
        })
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn state(&self) -> &MissionState {
        &self.state
    }

    pub fn current_phase_index(&self) -> usize {
        self.state.current_phase
    }

    /// Name of the phase the mission is currently in; empty for a
    /// phaseless workflow.
    pub fn current_phase_name(&self) -> &str {
        self.workflow
            .phase(self.state.current_phase)
            .map(|p| p.name.as_str())
            .unwrap_or("")
    }

    // ── Mutations (each persists before returning) ─────────────────

    /// Record a step as complete. Idempotent; creates the phase
    /// execution record on first touch.
    pub fn mark_step_complete(&mut self, step_id: &str) -> Result<()> {
        let phase_name = self.current_phase_name().to_owned();
        self.current_execution_mut(&phase_name).complete_step(step_id);
        self.save_state()
    }

    /// Open an investigative branch. Duplicate conditions are
    /// permitted; the same lead may be worth a second look.
    pub fn create_branch(&mut self, condition: &str, description: &str) -> Result<()> {
        self.state.active_branches.push(ActiveBranch {
            condition: condition.to_owned(),
            description: description.to_owned(),
            created_at: chrono::Utc::now(),
            completed_at: None,
            findings: Vec::new(),
        });
        self.save_state()
    }

    /// Close the first open branch matching `condition`.
    pub fn complete_branch(&mut self, condition: &str) -> Result<()> {
        let branch = self
            .state
            .active_branches
            .iter_mut()
            .find(|b| b.condition == condition && b.completed_at.is_none())
            .ok_or_else(|| {
                Error::Workflow(format!("no active branch with condition '{condition}'"))
            })?;
        branch.completed_at = Some(chrono::Utc::now());
        self.save_state()
    }

    /// Record a finding against the current phase.
    pub fn add_finding(
        &mut self,
        title: &str,
        description: &str,
        severity: Severity,
        evidence: &str,
    ) -> Result<()> {
        let finding = Finding {
            id: uuid::Uuid::new_v4(),
            title: title.to_owned(),
            description: description.to_owned(),
            severity,
            phase: self.current_phase_name().to_owned(),
            created_at: chrono::Utc::now(),
            evidence: evidence.to_owned(),
            metadata: serde_json::Map::new(),
        };
        tracing::info!(
            severity = %finding.severity,
            title = %finding.title,
            phase = %finding.phase,
            "finding recorded"
        );
        self.state.findings.push(finding);
        self.save_state()
    }

    /// Move to the next phase. Completion criteria are NOT enforced
    /// here; callers consult [`Self::is_phase_complete`] first.
    pub fn advance_phase(&mut self) -> Result<()> {
        let next = self.state.current_phase + 1;
        if next >= self.workflow.phases.len() {
            return Err(Error::Workflow(format!(
                "already at the last phase of '{}'",
                self.workflow.name
            )));
        }

        let phase_name = self.current_phase_name().to_owned();
        self.current_execution_mut(&phase_name).ended_at = Some(chrono::Utc::now());

        self.state.current_phase = next;
        let next_name = self.workflow.phases[next].name.clone();
        self.state.phases.push(PhaseExecution::new(&next_name));

        tracing::info!(phase = %next_name, "phase advanced");
        self.save_state()
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Whether the current phase's completion criteria are satisfied.
    ///
    /// `custom` criteria are never auto-satisfied; the model decides
    /// and advances explicitly.
    pub fn is_phase_complete(&self) -> bool {
        let Some(phase) = self.workflow.phase(self.state.current_phase) else {
            return false;
        };

        match phase.completion.kind {
            CompletionKind::AllRequired => {
                let completed = self
                    .state
                    .phases
                    .iter()
                    .rev()
                    .find(|e| e.phase == phase.name)
                    .map(|e| e.completed_steps.as_slice())
                    .unwrap_or(&[]);
                phase
                    .required_step_ids()
                    .all(|id| completed.iter().any(|c| c == id))
            }
            CompletionKind::AnyBranch => !self.state.active_branches.is_empty(),
            CompletionKind::Custom => false,
        }
    }

    /// The markdown block injected into the system prompt each turn.
    pub fn context_prompt(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::new();
        let _ = writeln!(out, "## Active Mission: {}", self.workflow.name);
        let _ = writeln!(out, "Target: {}", self.state.target);
        let _ = writeln!(
            out,
            "Started: {}",
            self.state.started_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        );

        if let Some(phase) = self.workflow.phase(self.state.current_phase) {
            let _ = writeln!(
                out,
                "\n### Current Phase: {} ({}/{})",
                phase.name,
                self.state.current_phase + 1,
                self.workflow.phases.len()
            );

            if !phase.steps.is_empty() {
                let completed = self
                    .state
                    .phases
                    .iter()
                    .rev()
                    .find(|e| e.phase == phase.name)
                    .map(|e| e.completed_steps.clone())
                    .unwrap_or_default();
                for step in &phase.steps {
                    let mark = if completed.iter().any(|c| c == &step.id) {
                        '✓'
                    } else {
                        '○'
                    };
                    let req = if step.required { " (required)" } else { "" };
                    let _ = writeln!(out, "- {mark} {} [{}]{req}", step.name, step.id);
                }
            }

            if !phase.completion.description.is_empty() {
                let _ = writeln!(out, "Completion: {}", phase.completion.description);
            }

            if !phase.branches.is_empty() {
                let _ = writeln!(out, "Possible branches:");
                for b in &phase.branches {
                    let _ = writeln!(out, "- {}: {}", b.condition, b.description);
                }
            }
        }

        if !self.state.active_branches.is_empty() {
            let _ = writeln!(out, "\n### Active Branches");
            for b in &self.state.active_branches {
                let status = if b.completed_at.is_some() {
                    "complete"
                } else {
                    "investigating"
                };
                let _ = writeln!(out, "- {}: {} ({status})", b.condition, b.description);
            }
        }

        if !self.state.findings.is_empty() {
            let _ = writeln!(out, "\n### Recent Findings");
            for f in self.state.findings.iter().rev().take(3) {
                let _ = writeln!(out, "- [{}] {} ({})", f.severity, f.title, f.phase);
            }
        }

        out
    }

    // ── Persistence ────────────────────────────────────────────────

    /// Write the mission state as pretty JSON, replacing the previous
    /// file.
    pub fn save_state(&self) -> Result<()> {
        let dir = self.workspace.join("missions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;

        let path = state_path(&self.workspace, &self.state.target);
        let json = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&path, json).map_err(Error::Io)?;

        AgentEvent::MissionStateSaved {
            target: self.state.target.clone(),
            phase: self.current_phase_name().to_owned(),
        }
        .emit();
        Ok(())
    }

    // ── Internal ───────────────────────────────────────────────────

    /// The execution record for the current phase, created on demand.
    fn current_execution_mut(&mut self, phase_name: &str) -> &mut PhaseExecution {
        let missing = !self
            .state
            .phases
            .iter()
            .rev()
            .any(|e| e.phase == phase_name && e.ended_at.is_none());
        if missing {
            self.state.phases.push(PhaseExecution::new(phase_name));
        }
        self.state
            .phases
            .iter_mut()
            .rev()
            .find(|e| e.phase == phase_name)
            .expect("execution record was just ensured")
    }
}

/// Load a persisted mission state for `target`.
pub fn load_state(workspace: &Path, target: &str) -> Result<MissionState> {
    let path = state_path(workspace, target);
    let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
    Ok(serde_json::from_str(&raw)?)
}

fn state_path(workspace: &Path, target: &str) -> PathBuf {
    workspace
        .join("missions")
        .join(format!("{}_state.json", sanitize_target(target)))
}

/// Targets are often URLs or host:port pairs; keep them path-safe.
fn sanitize_target(target: &str) -> String {
    target.replace(['/', ':'], "_")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_workflow;

    const DOC: &str = "\
---
name: web-assessment
---

## Phase: Recon

### Steps
- scope_review: Review the scope (required)
- port_scan: Port scan (required)
- banner_grab: Banner grab

### Completion Criteria
All required steps complete.

### Branches
- sqli_found → Investigate SQL injection

## Phase: Exploitation

### Steps
- poc: Build a proof of concept (required)

### Completion Criteria
Close when a branch is confirmed.
";

    fn engine() -> (WorkflowEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let wf = parse_workflow(DOC).unwrap();
        (
            WorkflowEngine::new(wf, "https://example.test:8443", dir.path()),
            dir,
        )
    }

    #[test]
    fn new_mission_starts_at_phase_zero() {
        let (engine, _dir) = engine();
        assert_eq!(engine.current_phase_index(), 0);
        assert_eq!(engine.current_phase_name(), "Recon");
        assert!(engine.state().phases.is_empty());
    }

    #[test]
    fn all_required_completion_tracks_required_steps_only() {
        let (mut engine, _dir) = engine();
        assert!(!engine.is_phase_complete());

        engine.mark_step_complete("scope_review").unwrap();
        assert!(!engine.is_phase_complete());

        // Optional steps do not matter.
        engine.mark_step_complete("banner_grab").unwrap();
        assert!(!engine.is_phase_complete());

        engine.mark_step_complete("port_scan").unwrap();
        assert!(engine.is_phase_complete());
    }

    #[test]
    fn mark_step_complete_is_idempotent() {
        let (mut engine, _dir) = engine();
        engine.mark_step_complete("scope_review").unwrap();
        engine.mark_step_complete("scope_review").unwrap();
        assert_eq!(engine.state().phases[0].completed_steps, vec!["scope_review"]);
    }

    #[test]
    fn advance_guard_then_advance() {
        let (mut engine, _dir) = engine();
        engine.mark_step_complete("scope_review").unwrap();
        engine.mark_step_complete("port_scan").unwrap();
        assert!(engine.is_phase_complete());

        engine.advance_phase().unwrap();
        assert_eq!(engine.current_phase_index(), 1);
        assert_eq!(engine.current_phase_name(), "Exploitation");
        // The recon execution closed, the exploitation one opened.
        assert!(engine.state().phases[0].ended_at.is_some());
        assert!(engine.state().phases[1].ended_at.is_none());
    }

    #[test]
    fn advance_past_last_phase_errors() {
        let (mut engine, _dir) = engine();
        engine.advance_phase().unwrap();
        let err = engine.advance_phase().unwrap_err();
        assert!(matches!(err, Error::Workflow(_)));
        assert_eq!(engine.current_phase_index(), 1);
    }

    #[test]
    fn any_branch_completion_needs_an_active_branch() {
        let (mut engine, _dir) = engine();
        engine.advance_phase().unwrap();
        assert!(!engine.is_phase_complete());

        engine.create_branch("sqli_found", "SQLi in login").unwrap();
        assert!(engine.is_phase_complete());
    }

    #[test]
    fn complete_branch_requires_an_open_match() {
        let (mut engine, _dir) = engine();
        assert!(engine.complete_branch("ghost").is_err());

        engine.create_branch("sqli_found", "SQLi in login").unwrap();
        engine.complete_branch("sqli_found").unwrap();
        assert!(engine.state().active_branches[0].completed_at.is_some());
        // A second completion finds nothing open.
        assert!(engine.complete_branch("sqli_found").is_err());
    }

    #[test]
    fn findings_carry_the_creation_phase() {
        let (mut engine, _dir) = engine();
        engine
            .add_finding("Default creds", "admin/admin works", Severity::High, "login 200")
            .unwrap();
        engine.mark_step_complete("scope_review").unwrap();
        engine.mark_step_complete("port_scan").unwrap();
        engine.advance_phase().unwrap();
        engine
            .add_finding("SQLi", "boolean-based", Severity::Critical, "payload")
            .unwrap();

        assert_eq!(engine.state().findings[0].phase, "Recon");
        assert_eq!(engine.state().findings[1].phase, "Exploitation");
        assert_ne!(engine.state().findings[0].id, engine.state().findings[1].id);
    }

    #[test]
    fn state_round_trips_through_disk() {
        let (mut engine, dir) = engine();
        engine.mark_step_complete("scope_review").unwrap();
        engine.create_branch("sqli_found", "SQLi").unwrap();
        engine
            .add_finding("t", "d", Severity::Medium, "e")
            .unwrap();

        let loaded = load_state(dir.path(), "https://example.test:8443").unwrap();
        assert_eq!(loaded.workflow, engine.state().workflow);
        assert_eq!(loaded.current_phase, engine.state().current_phase);
        assert_eq!(loaded.phases[0].completed_steps, vec!["scope_review"]);
        assert_eq!(loaded.active_branches.len(), 1);
        assert_eq!(loaded.findings.len(), 1);
    }

    #[test]
    fn resume_restores_the_mission() {
        let (mut engine, dir) = engine();
        engine.mark_step_complete("scope_review").unwrap();
        engine.mark_step_complete("port_scan").unwrap();
        engine.advance_phase().unwrap();

        let wf = parse_workflow(DOC).unwrap();
        let resumed =
            WorkflowEngine::resume(wf, "https://example.test:8443", dir.path()).unwrap();
        assert_eq!(resumed.current_phase_index(), 1);
        assert_eq!(resumed.current_phase_name(), "Exploitation");
    }

    #[test]
    fn resume_rejects_wrong_workflow() {
        let (engine, dir) = engine();
        engine.save_state().unwrap();

        let other = parse_workflow("---\nname: other\n---\n").unwrap();
        assert!(WorkflowEngine::resume(other, "https://example.test:8443", dir.path()).is_err());
    }

    #[test]
    fn sanitized_state_file_name() {
        let (engine, dir) = engine();
        engine.save_state().unwrap();
        assert!(dir
            .path()
            .join("missions")
            .join("https___example.test_8443_state.json")
            .exists());
    }

    #[test]
    fn context_prompt_shows_marks_and_findings() {
        let (mut engine, _dir) = engine();
        engine.mark_step_complete("scope_review").unwrap();
        engine
            .add_finding("Default creds", "admin/admin", Severity::High, "")
            .unwrap();

        let prompt = engine.context_prompt();
        assert!(prompt.contains("## Active Mission: web-assessment"));
        assert!(prompt.contains("✓ Review the scope [scope_review]"));
        assert!(prompt.contains("○ Port scan [port_scan]"));
        assert!(prompt.contains("sqli_found: Investigate SQL injection"));
        assert!(prompt.contains("[high] Default creds"));
    }

    #[test]
    fn phaseless_workflow_has_header_only_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let wf = parse_workflow("---\nname: hollow\n---\n").unwrap();
        let mut engine = WorkflowEngine::new(wf, "t", dir.path());

        let prompt = engine.context_prompt();
        assert!(prompt.contains("## Active Mission: hollow"));
        assert!(!prompt.contains("Current Phase"));

        // Bookkeeping still works; only advancing is impossible.
        engine.mark_step_complete("anything").unwrap();
        engine.create_branch("c", "d").unwrap();
        assert!(engine.advance_phase().is_err());
        assert!(!engine.is_phase_complete());
    }
}
