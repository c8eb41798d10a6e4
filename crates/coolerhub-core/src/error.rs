//! Error taxonomy shared by every CoolerHub crate.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while interpreting, validating or answering messages.
///
/// None of these is fatal to the process: a failing message is dropped (or
/// answered with an error response) and processing continues with the next one.
#[derive(Debug, Error)]
pub enum Error {
    /// The body is not well-formed structured data.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A required field is absent.
    #[error("Missing field '{field}'")]
    MissingField { field: String },

    /// A field is present but has the wrong type or value.
    #[error("Invalid field '{field}' for action '{action}': {reason}")]
    InvalidField {
        action: String,
        field: String,
        reason: String,
    },

    /// Missing or unknown command action.
    #[error("Unrecognized action '{0}'")]
    UnrecognizedAction(String),

    /// Topic outside the known grammar.
    #[error("Unrecognized topic '{0}'")]
    UnrecognizedTopic(String),

    /// The storage collaborator failed.
    #[error("Storage failure: {0}")]
    Storage(String),

    /// The transport collaborator failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encoding an outbound payload failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedPayload(_) => "MalformedPayload",
            Error::MissingField { .. } => "MissingField",
            Error::InvalidField { .. } => "InvalidField",
            Error::UnrecognizedAction(_) => "UnrecognizedAction",
            Error::UnrecognizedTopic(_) => "UnrecognizedTopic",
            Error::Storage(_) => "StorageFailure",
            Error::Transport(_) => "Transport",
            Error::Config(_) => "Config",
            Error::Serialization(_) => "Serialization",
        }
    }

    /// Shorthand for [`Error::InvalidField`].
    pub fn invalid_field(
        action: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidField {
            action: action.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            Error::Serialization(e.to_string())
        } else {
            Error::MalformedPayload(e.to_string())
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(format!("IO error: {}", e))
    }
}
