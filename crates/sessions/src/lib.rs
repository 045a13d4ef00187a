//! Session message logs.
//!
//! One [`store::MessageStore`] owns every session's conversation
//! history, keyed by an opaque session key supplied by the caller.

pub mod store;

pub use store::MessageStore;
