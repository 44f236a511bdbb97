//! Console command parsing.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::ids::{IdError, SessionId};

/// Reference to a listed session: its 1-based position (`#2`) or its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionRef {
    /// 1-based position in `/sessions`.
    Index(usize),
    /// Explicit session id.
    Id(SessionId),
}

/// A parsed console line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Plain text: one chat turn.
    Chat(String),
    /// Semantic search outside the conversation.
    Search(String),
    /// Backend health.
    Health,
    /// List saved conversations.
    Sessions,
    /// Switch conversation.
    Select(SessionRef),
    /// Start a fresh conversation.
    New,
    /// Delete the active conversation on the backend.
    Clear,
    /// Forget a saved conversation.
    Remove(SessionRef),
    /// Show (`None`) or set the result count.
    TopK(Option<u8>),
    /// Rebuild the vector index.
    Rebuild {
        /// Key overriding the configured one.
        api_key: Option<String>,
    },
    /// Run an evaluation.
    Evaluate {
        /// Question file on the backend side.
        test_file: Option<String>,
    },
    /// Show a report file, or the last evaluation report without a path.
    Report(Option<PathBuf>),
    /// Command summary.
    Help,
    /// Leave the console.
    Quit,
    /// Blank line.
    Nothing,
}

/// Console input errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Unrecognized `/name`.
    #[error("unknown command /{0}, type /help")]
    Unknown(String),
    /// A required argument is absent.
    #[error("/{command} expects {argument}")]
    MissingArgument {
        /// Command name.
        command: &'static str,
        /// What was expected.
        argument: &'static str,
    },
    /// An argument could not be parsed.
    #[error("invalid argument for /{command}: {value}")]
    InvalidArgument {
        /// Command name.
        command: &'static str,
        /// Raw argument.
        value: String,
    },
    /// Malformed session id.
    #[error("invalid session: {0}")]
    InvalidSession(#[from] IdError),
}

/// Parse one input line.
///
/// # Errors
/// Returns an error for unknown commands and missing or malformed arguments.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Nothing);
    }
    let Some(body) = line.strip_prefix('/') else {
        return Ok(Command::Chat(line.to_string()));
    };

    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };
    let argument = (!rest.is_empty()).then(|| rest.to_string());

    match name.to_ascii_lowercase().as_str() {
        "search" | "s" => argument
            .map(Command::Search)
            .ok_or(CommandError::MissingArgument {
                command: "search",
                argument: "a query",
            }),
        "health" => Ok(Command::Health),
        "sessions" | "history" => Ok(Command::Sessions),
        "select" => Ok(Command::Select(parse_session_ref("select", rest)?)),
        "new" => Ok(Command::New),
        "clear" => Ok(Command::Clear),
        "remove" | "rm" => Ok(Command::Remove(parse_session_ref("remove", rest)?)),
        "topk" => match argument {
            None => Ok(Command::TopK(None)),
            Some(value) => value
                .parse::<u8>()
                .map(|k| Command::TopK(Some(k)))
                .map_err(|_| CommandError::InvalidArgument {
                    command: "topk",
                    value,
                }),
        },
        "rebuild" => Ok(Command::Rebuild { api_key: argument }),
        "evaluate" | "eval" => Ok(Command::Evaluate {
            test_file: argument,
        }),
        "report" => Ok(Command::Report(argument.map(PathBuf::from))),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn parse_session_ref(command: &'static str, raw: &str) -> Result<SessionRef, CommandError> {
    if raw.is_empty() {
        return Err(CommandError::MissingArgument {
            command,
            argument: "a session id or #index",
        });
    }
    if let Some(index) = raw.strip_prefix('#') {
        return match index.parse::<usize>() {
            Ok(n) if n > 0 => Ok(SessionRef::Index(n)),
            _ => Err(CommandError::InvalidArgument {
                command,
                value: raw.to_string(),
            }),
        };
    }
    Ok(SessionRef::Id(SessionId::new(raw)?))
}
