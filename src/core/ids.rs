// File: src/core/ids.rs

//! Identifier types for the RAG console.
//!
//! Session and task identifiers are minted by the backend and treated as
//! opaque strings: the client validates their shape (non-empty, bounded,
//! printable) but never interprets them. Message identifiers are local and
//! random.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors returned when parsing/validating an opaque identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Empty (or whitespace-only) identifier.
    Empty,
    /// Leading or trailing whitespace. Identifiers are never rewritten.
    Padded,
    /// Exceeds the maximum accepted length.
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        got: usize,
    },
    /// Contains a control character.
    ControlChar {
        /// The index where it was found.
        index: usize,
    },
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "identifier must not be empty"),
            Self::Padded => write!(f, "identifier has surrounding whitespace"),
            Self::TooLong { max, got } => write!(f, "identifier too long: got {got}, max {max}"),
            Self::ControlChar { index } => {
                write!(f, "identifier contains a control character at index {index}")
            }
        }
    }
}

impl std::error::Error for IdError {}

/// Hard ceiling to prevent pathological payloads.
const MAX_OPAQUE_LEN: usize = 256;

fn validate_opaque(s: &str) -> Result<String, IdError> {
    if s.trim().is_empty() {
        return Err(IdError::Empty);
    }
    if s.trim() != s {
        return Err(IdError::Padded);
    }
    if s.len() > MAX_OPAQUE_LEN {
        return Err(IdError::TooLong {
            max: MAX_OPAQUE_LEN,
            got: s.len(),
        });
    }
    if let Some(index) = s.chars().position(char::is_control) {
        return Err(IdError::ControlChar { index });
    }

    Ok(s.to_owned())
}

/// Declare a server-minted, opaque string identifier with a consistent API.
macro_rules! define_opaque_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Build a validated identifier.
            ///
            /// # Errors
            /// Returns `IdError` if the input is empty, padded with whitespace, too long,
            /// or contains control characters.
            pub fn new(raw: impl AsRef<str>) -> Result<Self, IdError> {
                validate_opaque(raw.as_ref()).map(Self)
            }

            /// Borrow as `&str`.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume into `String`.
            #[inline]
            #[must_use]
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.into_string()
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }
    };
}

define_opaque_id!(
    /// Identifier of a server-held conversation session.
    ///
    /// Minted by the backend on the first successful chat turn.
    SessionId
);

define_opaque_id!(
    /// Identifier of a backend-owned long-running task (rebuild, evaluation).
    TaskId
);

/// Identifier of a message in the local conversation buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Create a new random identifier.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Borrow the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
