use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error types for ordfw
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input validation failed (malformed address, bad enum, missing field, bad index)
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// A rule id, anchor id or address set name is absent from the store
    #[error("{what} not found: {id}")]
    NotFound { what: String, id: String },

    /// A concurrent mutation invalidated the caller's assumed prior state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The boundary collaborator failed to reach the store
    #[error("Transport error: {0}")]
    Transport(String),

    /// A remote store answered with an error response
    #[error("Remote error ({status}): {message}")]
    Remote {
        kind: ErrorKind,
        status: u16,
        message: String,
    },

    /// Persisted state could not be loaded or saved
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Persistence-specific errors
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("State file corrupted: {0}")]
    Corrupted(String),

    #[error("State format version mismatch: found v{found}, expected v{expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("{list} list contains {count} rules (max: {max})")]
    TooManyRules {
        list: &'static str,
        count: usize,
        max: usize,
    },

    #[error("Data directory not available")]
    DataDirUnavailable,
}

/// Coarse classification callers use to decide how to react to a failure
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Transport,
    Internal,
    Unknown,
}

impl ErrorKind {
    /// Not-found and conflict failures mean the caller's view of the list is stale.
    pub const fn requires_reload(self) -> bool {
        matches!(self, ErrorKind::NotFound | ErrorKind::Conflict)
    }

    /// Validation failures can be fixed by the user without refreshing.
    pub const fn is_user_correctable(self) -> bool {
        matches!(self, ErrorKind::Validation)
    }

    pub const fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Transport => 502,
            ErrorKind::Internal | ErrorKind::Unknown => 500,
        }
    }
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>, id: impl ToString) -> Self {
        Error::NotFound {
            what: what.into(),
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Remote { kind, .. } => *kind,
            Error::Io(_) | Error::Serialization(_) | Error::Persist(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Error::Remote { status, .. } => *status,
            other => other.kind().status_code(),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Turns an error into a message the operator can act on.
    ///
    /// Validation failures point at the offending field; not-found and conflict
    /// failures tell the caller to reload before retrying.
    pub fn for_error(err: &Error) -> Self {
        match err {
            Error::Validation { field, message } => {
                ErrorTranslation::new(format!("Invalid {field}: {message}"))
                    .with_suggestion("Correct the value and submit again")
            }
            Error::NotFound { what, id } => {
                ErrorTranslation::new(format!("No {what} with id {id}"))
                    .with_suggestion("Reload the list; another client may have removed it")
            }
            Error::Conflict(message) => ErrorTranslation::new(format!(
                "The list changed since it was loaded: {message}"
            ))
            .with_suggestion("Reload the list and retry the edit"),
            Error::Transport(message) => {
                ErrorTranslation::new(format!("Could not reach the rule store: {message}"))
                    .with_suggestion("Check that the store is running and reachable")
            }
            Error::Remote { kind, message, .. } => {
                let translation = ErrorTranslation::new(message.clone());
                if kind.requires_reload() {
                    translation.with_suggestion("Reload the list and retry the edit")
                } else if *kind == ErrorKind::Unknown {
                    translation.with_suggestion("The store returned no readable error details")
                } else {
                    translation
                }
            }
            Error::Persist(PersistError::Corrupted(_)) => {
                ErrorTranslation::new(err.to_string())
                    .with_suggestion("Restore the state file from an export")
                    .with_suggestion("Or move it aside to start with an empty store")
            }
            other => ErrorTranslation::new(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
