//! Shared domain types for the praxis engine.
//!
//! Everything that crosses a crate boundary lives here: the chat data
//! model, task classification types, configuration structs, the shared
//! error type, and structured trace events.

pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod task;
