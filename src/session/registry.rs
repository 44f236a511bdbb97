//! Client-side index of chat sessions.
//!
//! Entries reference conversations held by the backend; they are not checked
//! against it until selected, so an entry may point at an expired session.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::ids::SessionId;

/// Maximum number of retained sessions.
pub const MAX_SESSIONS: usize = 50;

/// Summary of one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Server-assigned identifier.
    pub id: SessionId,
    /// Title derived from the first user utterance.
    pub title: String,
    /// When the client first saw the session.
    pub created_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Create a summary stamped now.
    #[must_use]
    pub fn new(id: SessionId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}

/// Ordered session index, most recent first, plus the active pointer.
///
/// The active pointer is never persisted and may name a session that is not
/// listed (a selection kept after expiry, for instance).
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    entries: VecDeque<SessionSummary>,
    active: Option<SessionId>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries, dropping duplicates and overflow.
    #[must_use]
    pub fn from_entries(entries: Vec<SessionSummary>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            if registry.contains(&entry.id) || registry.entries.len() >= MAX_SESSIONS {
                continue;
            }
            registry.entries.push_back(entry);
        }
        registry
    }

    /// Insert `entry` at the front.
    ///
    /// An id already present is moved to the front and keeps its original
    /// title and creation time. Overflow beyond [`MAX_SESSIONS`] evicts the
    /// oldest entries. Returns `true` when the id was not listed before.
    pub fn add(&mut self, entry: SessionSummary) -> bool {
        if let Some(pos) = self.position(&entry.id) {
            if let Some(existing) = self.entries.remove(pos) {
                self.entries.push_front(existing);
            }
            return false;
        }

        self.entries.push_front(entry);
        while self.entries.len() > MAX_SESSIONS {
            if let Some(evicted) = self.entries.pop_back() {
                debug!(session_id = %evicted.id, "Evicted oldest session");
            }
        }
        true
    }

    /// Remove an entry, clearing the active pointer if it named it.
    pub fn remove(&mut self, id: &SessionId) -> Option<SessionSummary> {
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
        let pos = self.position(id)?;
        self.entries.remove(pos)
    }

    /// Entries, most recent first.
    pub fn list(&self) -> impl ExactSizeIterator<Item = &SessionSummary> {
        self.entries.iter()
    }

    /// Owned copy of the entries, for persistence.
    #[must_use]
    pub fn to_entries(&self) -> Vec<SessionSummary> {
        self.entries.iter().cloned().collect()
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<&SessionSummary> {
        self.entries.iter().find(|s| &s.id == id)
    }

    /// Whether the session is listed.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.position(id).is_some()
    }

    /// Number of listed sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no session is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Active session, if any.
    #[must_use]
    pub const fn active(&self) -> Option<&SessionId> {
        self.active.as_ref()
    }

    /// Point at a session, listed or not.
    pub fn set_active(&mut self, id: SessionId) {
        self.active = Some(id);
    }

    /// No session is active.
    pub fn clear_active(&mut self) {
        self.active = None;
    }

    fn position(&self, id: &SessionId) -> Option<usize> {
        self.entries.iter().position(|s| &s.id == id)
    }
}
