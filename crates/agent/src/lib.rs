//! The agent loop and its tool surface.
//!
//! [`turn::Agent::process`] drives one user turn: assemble context,
//! classify, route (optionally under supervision), dispatch tool calls
//! sequentially, and persist the conversation. Workflow bookkeeping
//! tools bind to the engine through a late-binding handle so the same
//! registry serves sessions whose mission attaches later.

pub mod context;
pub mod tool;
pub mod turn;
pub mod workflow_tools;

pub use tool::{Tool, ToolContext, ToolRegistry};
pub use turn::Agent;
pub use workflow_tools::{new_engine_handle, register_workflow_tools, EngineHandle};
