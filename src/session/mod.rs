//! Chat sessions: the local index, the conversation state and reconciliation
//! with the backend's session store.

pub mod reconciler;
pub mod registry;
pub mod state;
pub mod title;

pub use reconciler::{SelectOutcome, SessionReconciler};
pub use registry::{MAX_SESSIONS, SessionRegistry, SessionSummary};
pub use state::{ChatMessage, EXPIRED_NOTICE, MessageKind, SessionState};
pub use title::derive_title;
