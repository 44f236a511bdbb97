//! Ephemeral conversation state: the message buffer and the session index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::types::{DocumentResult, MessageRole};
use crate::core::ids::{MessageId, SessionId};
use crate::session::registry::SessionRegistry;

/// Notice shown when a selected session no longer exists on the backend.
pub const EXPIRED_NOTICE: &str = "This conversation has expired on the server. \
     Send a message to start a new one.";

/// Whether a message is a real turn or a client-generated notice.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A user utterance or an assistant reply.
    Turn,
    /// Synthetic assistant message (failure or expiry).
    Notice,
}

/// One message of the local buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Local identifier.
    pub id: MessageId,
    /// Speaker.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
    /// Supporting documents of an assistant reply.
    #[serde(default)]
    pub sources: Vec<DocumentResult>,
    /// When the message was created or, for restored turns, reconstructed.
    pub timestamp: DateTime<Utc>,
    /// Real turn or synthetic notice.
    pub kind: MessageKind,
}

impl ChatMessage {
    fn build(role: MessageRole, content: String, timestamp: DateTime<Utc>, kind: MessageKind) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            sources: Vec::new(),
            timestamp,
            kind,
        }
    }

    /// Optimistic user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::build(MessageRole::User, content.into(), Utc::now(), MessageKind::Turn)
    }

    /// Assistant reply with its sources.
    #[must_use]
    pub fn assistant(content: impl Into<String>, sources: Vec<DocumentResult>) -> Self {
        let mut message =
            Self::build(MessageRole::Assistant, content.into(), Utc::now(), MessageKind::Turn);
        message.sources = sources;
        message
    }

    /// Synthetic assistant notice.
    #[must_use]
    pub fn notice(content: impl Into<String>) -> Self {
        Self::build(MessageRole::Assistant, content.into(), Utc::now(), MessageKind::Notice)
    }

    /// Turn restored from server history.
    #[must_use]
    pub fn restored(role: MessageRole, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::build(role, content.into(), timestamp, MessageKind::Turn)
    }

    /// Whether this is a synthetic notice rather than a real turn.
    #[must_use]
    pub fn is_notice(&self) -> bool {
        self.kind == MessageKind::Notice
    }
}

/// Conversation state owned by the chat orchestrator.
///
/// The active session id lives in the registry, so there is one pointer to
/// keep consistent. `epoch` changes whenever the conversation is switched or
/// reset; asynchronous results carry the epoch they were issued under and
/// are dropped when it no longer matches.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Saved sessions and the active pointer.
    pub registry: SessionRegistry,
    /// Buffer of the active conversation.
    pub messages: Vec<ChatMessage>,
    /// History of a selected session is being fetched.
    pub loading: bool,
    epoch: u64,
}

impl SessionState {
    /// Wrap a registry restored from storage; no session is active.
    #[must_use]
    pub fn with_registry(mut registry: SessionRegistry) -> Self {
        registry.clear_active();
        Self {
            registry,
            ..Self::default()
        }
    }

    /// Active session id.
    #[must_use]
    pub const fn session_id(&self) -> Option<&SessionId> {
        self.registry.active()
    }

    /// Current conversation epoch.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Start a different conversation: bump the epoch, empty the buffer and
    /// drop any loading flag owned by a superseded selection.
    pub fn switch_conversation(&mut self, active: Option<SessionId>) -> u64 {
        self.epoch = self.epoch.wrapping_add(1);
        self.messages.clear();
        self.loading = false;
        match active {
            Some(id) => self.registry.set_active(id),
            None => self.registry.clear_active(),
        }
        self.epoch
    }
}
