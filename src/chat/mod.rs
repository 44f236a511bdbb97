//! Conversational chat on top of the session registry.

pub mod orchestrator;
pub mod state;

pub use orchestrator::{ChatOrchestrator, SendOutcome};
pub use state::{ChatRecord, ChatSnapshot, TopK};
