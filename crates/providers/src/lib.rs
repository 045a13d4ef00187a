//! LLM backends, tiered routing, supervision, and cost accounting.
//!
//! The [`traits::LlmProvider`] contract hides backend wire formats from
//! the rest of the engine; the [`router::TierRouter`] picks a model per
//! classified task and the [`supervisor`] optionally validates worker
//! output with a second model.

pub mod anthropic;
pub mod classifier;
pub mod cost;
pub mod openai_compat;
pub mod registry;
pub mod router;
pub mod supervisor;
pub mod textcall;
pub mod traits;
mod util;

pub use registry::ProviderRegistry;
pub use router::TierRouter;
pub use traits::{ChatRequest, LlmProvider};
