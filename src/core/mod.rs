//! Core types shared across the client: configuration, errors, identifiers.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::ClientConfig;
pub use errors::{ClientError, ClientResult};
pub use ids::{IdError, MessageId, SessionId, TaskId};
