//! The five workflow bookkeeping tools.
//!
//! Tools resolve the engine through a shared [`EngineHandle`] rather
//! than holding it directly, so one registry serves agents whose
//! mission attaches (or detaches) mid-session. With no engine attached
//! every tool answers with a plain-text notice; the model may call
//! them unconditionally.

use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use px_domain::error::Result;
use px_workflow::{Severity, WorkflowEngine};

use crate::tool::{optional_str, require_str, Tool, ToolContext, ToolRegistry};

/// Late-binding accessor to the session's workflow engine.
pub type EngineHandle = Arc<RwLock<Option<WorkflowEngine>>>;

pub fn new_engine_handle() -> EngineHandle {
    Arc::new(RwLock::new(None))
}

const NO_MISSION: &str = "No active mission/workflow";

/// Register all five workflow tools against one engine handle.
pub fn register_workflow_tools(registry: &mut ToolRegistry, engine: &EngineHandle) {
    registry.register(Arc::new(StepCompleteTool {
        engine: engine.clone(),
    }));
    registry.register(Arc::new(CreateBranchTool {
        engine: engine.clone(),
    }));
    registry.register(Arc::new(CompleteBranchTool {
        engine: engine.clone(),
    }));
    registry.register(Arc::new(AddFindingTool {
        engine: engine.clone(),
    }));
    registry.register(Arc::new(AdvancePhaseTool {
        engine: engine.clone(),
    }));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// workflow_step_complete
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StepCompleteTool {
    engine: EngineHandle,
}

#[async_trait::async_trait]
impl Tool for StepCompleteTool {
    fn name(&self) -> &str {
        "workflow_step_complete"
    }
    fn description(&self) -> &str {
        "Mark a workflow step as complete in the current phase."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "step_id": { "type": "string", "description": "ID of the completed step" }
            },
            "required": ["step_id"]
        })
    }
    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> Result<String> {
        let step_id = require_str(args, "step_id")?;
        let mut guard = self.engine.write();
        let Some(engine) = guard.as_mut() else {
            return Ok(NO_MISSION.into());
        };
        engine.mark_step_complete(step_id)?;
        Ok(format!("Step '{step_id}' marked complete"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// workflow_create_branch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CreateBranchTool {
    engine: EngineHandle,
}

#[async_trait::async_trait]
impl Tool for CreateBranchTool {
    fn name(&self) -> &str {
        "workflow_create_branch"
    }
    fn description(&self) -> &str {
        "Open an investigative branch in reaction to a discovery."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "condition": { "type": "string", "description": "Branch condition slug" },
                "description": { "type": "string", "description": "What to investigate" }
            },
            "required": ["condition", "description"]
        })
    }
    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> Result<String> {
        let condition = require_str(args, "condition")?;
        let description = require_str(args, "description")?;
        let mut guard = self.engine.write();
        let Some(engine) = guard.as_mut() else {
            return Ok(NO_MISSION.into());
        };
        engine.create_branch(condition, description)?;
        Ok(format!("Created branch: {condition} - {description}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// workflow_complete_branch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CompleteBranchTool {
    engine: EngineHandle,
}

#[async_trait::async_trait]
impl Tool for CompleteBranchTool {
    fn name(&self) -> &str {
        "workflow_complete_branch"
    }
    fn description(&self) -> &str {
        "Mark an investigative branch as complete."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "condition": { "type": "string", "description": "Branch condition slug" }
            },
            "required": ["condition"]
        })
    }
    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> Result<String> {
        let condition = require_str(args, "condition")?;
        let mut guard = self.engine.write();
        let Some(engine) = guard.as_mut() else {
            return Ok(NO_MISSION.into());
        };
        engine.complete_branch(condition)?;
        Ok(format!("Branch '{condition}' marked complete"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// workflow_add_finding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AddFindingTool {
    engine: EngineHandle,
}

#[async_trait::async_trait]
impl Tool for AddFindingTool {
    fn name(&self) -> &str {
        "workflow_add_finding"
    }
    fn description(&self) -> &str {
        "Record a finding with severity and evidence against the current phase."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Short finding title" },
                "description": { "type": "string", "description": "Full description" },
                "severity": {
                    "type": "string",
                    "enum": ["critical", "high", "medium", "low", "informational"],
                    "description": "Finding severity"
                },
                "evidence": { "type": "string", "description": "Supporting evidence" }
            },
            "required": ["title", "description", "severity"]
        })
    }
    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> Result<String> {
        let title = require_str(args, "title")?;
        let description = require_str(args, "description")?;
        let severity = Severity::from_str(require_str(args, "severity")?)?;
        let evidence = optional_str(args, "evidence");

        let mut guard = self.engine.write();
        let Some(engine) = guard.as_mut() else {
            return Ok(NO_MISSION.into());
        };
        engine.add_finding(title, description, severity, evidence)?;
        Ok(format!("Added {severity} finding: {title}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// workflow_advance_phase
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct AdvancePhaseTool {
    engine: EngineHandle,
}

#[async_trait::async_trait]
impl Tool for AdvancePhaseTool {
    fn name(&self) -> &str {
        "workflow_advance_phase"
    }
    fn description(&self) -> &str {
        "Advance to the next workflow phase once the current phase's completion criteria are met."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }
    async fn execute(&self, _ctx: &ToolContext, _args: &Value) -> Result<String> {
        let mut guard = self.engine.write();
        let Some(engine) = guard.as_mut() else {
            return Ok(NO_MISSION.into());
        };

        if !engine.is_phase_complete() {
            let phase = engine.current_phase_name().to_owned();
            return Ok(format!(
                "Cannot advance: completion criteria for phase '{phase}' are not met. \
                 Complete the required steps (or open the required branch) first."
            ));
        }

        engine.advance_phase()?;
        Ok(format!("Advanced to phase: {}", engine.current_phase_name()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use px_workflow::parser::parse_workflow;
    use std::path::PathBuf;
    use tokio_util::sync::CancellationToken;

    const DOC: &str = "\
---
name: web-assessment
---

## Phase: Recon

### Steps
- s1: First step (required)
- s2: Second step (required)

### Completion Criteria
All required steps complete.

## Phase: Exploitation

### Steps
- poc: Proof of concept (required)

### Completion Criteria
All required steps complete.
";

    fn ctx() -> ToolContext {
        ToolContext {
            session_key: "test".into(),
            workspace: PathBuf::from("."),
            cancel: CancellationToken::new(),
        }
    }

    fn registry_with_engine() -> (ToolRegistry, EngineHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let handle = new_engine_handle();
        *handle.write() = Some(WorkflowEngine::new(
            parse_workflow(DOC).unwrap(),
            "target",
            dir.path(),
        ));
        let mut registry = ToolRegistry::new();
        register_workflow_tools(&mut registry, &handle);
        (registry, handle, dir)
    }

    #[tokio::test]
    async fn tools_without_engine_report_no_mission() {
        let handle = new_engine_handle();
        let mut registry = ToolRegistry::new();
        register_workflow_tools(&mut registry, &handle);

        for (name, args) in [
            ("workflow_step_complete", serde_json::json!({ "step_id": "x" })),
            (
                "workflow_create_branch",
                serde_json::json!({ "condition": "c", "description": "d" }),
            ),
            ("workflow_complete_branch", serde_json::json!({ "condition": "c" })),
            (
                "workflow_add_finding",
                serde_json::json!({ "title": "t", "description": "d", "severity": "low" }),
            ),
            ("workflow_advance_phase", serde_json::json!({})),
        ] {
            let (content, is_error) = registry.dispatch(name, &ctx(), &args).await;
            assert_eq!(content, NO_MISSION, "{name}");
            assert!(!is_error, "{name} must not error without an engine");
        }
    }

    #[tokio::test]
    async fn advance_refuses_until_criteria_met_then_advances() {
        let (registry, handle, _dir) = registry_with_engine();

        let (content, is_error) = registry
            .dispatch(
                "workflow_step_complete",
                &ctx(),
                &serde_json::json!({ "step_id": "s1" }),
            )
            .await;
        assert!(!is_error);
        assert_eq!(content, "Step 's1' marked complete");

        // Only s1 of the two required steps is done.
        let (content, is_error) = registry
            .dispatch("workflow_advance_phase", &ctx(), &serde_json::json!({}))
            .await;
        assert!(!is_error);
        assert!(content.contains("Cannot advance"));
        assert_eq!(handle.read().as_ref().unwrap().current_phase_index(), 0);

        registry
            .dispatch(
                "workflow_step_complete",
                &ctx(),
                &serde_json::json!({ "step_id": "s2" }),
            )
            .await;

        let (content, _) = registry
            .dispatch("workflow_advance_phase", &ctx(), &serde_json::json!({}))
            .await;
        assert_eq!(content, "Advanced to phase: Exploitation");
        assert_eq!(handle.read().as_ref().unwrap().current_phase_index(), 1);
    }

    #[tokio::test]
    async fn add_finding_rejects_unknown_severity() {
        let (registry, handle, _dir) = registry_with_engine();
        let (content, is_error) = registry
            .dispatch(
                "workflow_add_finding",
                &ctx(),
                &serde_json::json!({
                    "title": "t", "description": "d", "severity": "catastrophic"
                }),
            )
            .await;
        assert!(is_error);
        assert!(content.contains("unknown severity"));
        assert!(handle.read().as_ref().unwrap().state().findings.is_empty());
    }

    #[tokio::test]
    async fn branch_lifecycle_round_trips() {
        let (registry, handle, _dir) = registry_with_engine();

        let (content, _) = registry
            .dispatch(
                "workflow_create_branch",
                &ctx(),
                &serde_json::json!({ "condition": "sqli_found", "description": "SQLi in login" }),
            )
            .await;
        assert_eq!(content, "Created branch: sqli_found - SQLi in login");

        let (content, _) = registry
            .dispatch(
                "workflow_complete_branch",
                &ctx(),
                &serde_json::json!({ "condition": "sqli_found" }),
            )
            .await;
        assert_eq!(content, "Branch 'sqli_found' marked complete");
        assert!(handle.read().as_ref().unwrap().state().active_branches[0]
            .completed_at
            .is_some());
    }

    #[tokio::test]
    async fn add_finding_reports_severity_and_title() {
        let (registry, _handle, _dir) = registry_with_engine();
        let (content, is_error) = registry
            .dispatch(
                "workflow_add_finding",
                &ctx(),
                &serde_json::json!({
                    "title": "Default creds",
                    "description": "admin/admin accepted",
                    "severity": "high",
                    "evidence": "login returned 200"
                }),
            )
            .await;
        assert!(!is_error);
        assert_eq!(content, "Added high finding: Default creds");
    }
}
