use std::fmt;

/// Structured error type for the engine. Replaces stringly-typed errors so
/// callers can match on the failure kind instead of parsing messages.
#[derive(Debug, Clone)]
pub enum ShowError {
    /// Malformed selector, bad discriminator, missing JSON field, or a
    /// mode mismatch on a parameter operation.
    Validation { message: String },
    /// Unknown device id, cue number, or timeline id.
    NotFound { what: String },
    /// Structural mutation attempted while the tick loop is running, or a
    /// duplicate id.
    InvariantViolation { message: String },
    /// The color solver returned a clamped solution.
    OutOfGamut { param: String },
    /// Show document written by a different library version.
    VersionSkew { file: String, library: String },
    /// Internal type-system invariant broken. Not recoverable.
    Fatal { message: String },
    Io { message: String },
    Json { message: String },
}

impl fmt::Display for ShowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShowError::Validation { message } => write!(f, "{message}"),
            ShowError::NotFound { what } => write!(f, "{what} not found"),
            ShowError::InvariantViolation { message } => write!(f, "{message}"),
            ShowError::OutOfGamut { param } => {
                write!(f, "color for {param} may be out of gamut")
            }
            ShowError::VersionSkew { file, library } => {
                write!(f, "show file version {file} differs from library version {library}")
            }
            ShowError::Fatal { message } => write!(f, "fatal: {message}"),
            ShowError::Io { message } => write!(f, "I/O error: {message}"),
            ShowError::Json { message } => write!(f, "JSON error: {message}"),
        }
    }
}

impl std::error::Error for ShowError {}

impl From<std::io::Error> for ShowError {
    fn from(e: std::io::Error) -> Self {
        ShowError::Io {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ShowError {
    fn from(e: serde_json::Error) -> Self {
        ShowError::Json {
            message: e.to_string(),
        }
    }
}

impl From<String> for ShowError {
    fn from(s: String) -> Self {
        ShowError::Validation { message: s }
    }
}

impl From<&str> for ShowError {
    fn from(s: &str) -> Self {
        ShowError::Validation {
            message: s.to_string(),
        }
    }
}
