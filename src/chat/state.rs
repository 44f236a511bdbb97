//! Chat preferences and the durable chat record.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::core::ids::SessionId;
use crate::session::registry::SessionSummary;
use crate::session::state::ChatMessage;
use crate::storage::persisted::DurableRecord;

/// Number of documents retrieved per turn, clamped to `1..=20`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct TopK(u8);

impl TopK {
    /// Smallest accepted value.
    pub const MIN: u8 = 1;
    /// Largest accepted value.
    pub const MAX: u8 = 20;
    /// Value used until the user picks one.
    pub const DEFAULT: u8 = 5;

    /// Build a value, clamping out-of-range input.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        if value < Self::MIN {
            Self(Self::MIN)
        } else if value > Self::MAX {
            Self(Self::MAX)
        } else {
            Self(value)
        }
    }

    /// The raw count.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for TopK {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl From<u8> for TopK {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl From<TopK> for u8 {
    fn from(value: TopK) -> Self {
        value.0
    }
}

/// What the chat store keeps across restarts. The active session and the
/// message buffer are never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Saved sessions, most recent first. Unreadable entries are dropped on load.
    #[serde(default, deserialize_with = "readable_sessions")]
    pub sessions: Vec<SessionSummary>,
    /// Result count preference.
    #[serde(default)]
    pub top_k: TopK,
}

fn readable_sessions<'de, D>(deserializer: D) -> Result<Vec<SessionSummary>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable saved session");
                None
            }
        })
        .collect())
}

impl DurableRecord for ChatRecord {
    const KEY: &'static str = "chat-storage";
    const VERSION: u32 = 1;
}

/// Read-only copy of the chat state for presentation.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatSnapshot {
    /// Active session, if any.
    pub session_id: Option<SessionId>,
    /// Conversation buffer.
    pub messages: Vec<ChatMessage>,
    /// Saved sessions, most recent first.
    pub sessions: Vec<SessionSummary>,
    /// Result count preference.
    pub top_k: TopK,
    /// A selection is loading history.
    pub loading: bool,
    /// A chat turn is in flight.
    pub sending: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_clamps() {
        assert_eq!(TopK::new(0).get(), 1);
        assert_eq!(TopK::new(7).get(), 7);
        assert_eq!(TopK::new(99).get(), 20);
        assert_eq!(TopK::default().get(), 5);
    }

    #[test]
    fn test_record_clamps_top_k_on_load() {
        let record: ChatRecord = serde_json::from_str(r#"{"sessions":[],"top_k":50}"#).unwrap();
        assert_eq!(record.top_k.get(), 20);

        let empty: ChatRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, ChatRecord::default());
    }

    #[test]
    fn test_record_skips_unreadable_sessions() {
        let raw = r#"{
            "sessions": [
                {"id": "sess-1", "title": "Concerts", "created_at": "2024-01-15T14:30:00Z"},
                {"id": "", "title": "Broken", "created_at": "2024-01-15T14:31:00Z"},
                {"id": "sess-3", "title": "Expos"}
            ],
            "top_k": 8
        }"#;
        let record: ChatRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.sessions.len(), 1);
        assert_eq!(record.sessions[0].id, SessionId::new("sess-1").unwrap());
        assert_eq!(record.top_k.get(), 8);
    }
}
