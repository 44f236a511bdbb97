//! Backend API: wire types, the backend trait and its HTTP implementation.

pub mod backend;
pub mod client;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use backend::{BackendFuture, RagBackend, StartTask, StartedTask};
pub use client::RagClient;
pub use types::{
    ChatRequest, ChatResponse, DocumentResult, HealthResponse, HealthStatus, HistoryMessage,
    MessageRole, SearchRequest, SearchResponse, SessionResponse,
};
