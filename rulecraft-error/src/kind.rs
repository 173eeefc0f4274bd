//! Error kinds for rulecraft operations

use std::fmt;

/// The kind of error that occurred.
///
/// Users match on ErrorKind to decide how to handle specific error cases.
/// `InvalidInput` and `ExternalService` abort a refinement; `Tracing` is
/// only ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// Invalid configuration or parameters
    ConfigInvalid,

    // =========================================================================
    // Refinement errors
    // =========================================================================
    /// Library document is empty, unreadable or malformed
    InvalidInput,

    /// The text-generation service failed or returned an unusable response
    ExternalService,

    /// Recording a span, run or artifact failed
    Tracing,

    // =========================================================================
    // Storage errors
    // =========================================================================
    /// Artifact or trace storage failed
    StorageFailed,

    /// Serialization/deserialization failed
    SerializationFailed,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::ConfigInvalid => "ConfigInvalid",

            // Refinement
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::ExternalService => "ExternalService",
            ErrorKind::Tracing => "Tracing",

            // Storage
            ErrorKind::StorageFailed => "StorageFailed",
            ErrorKind::SerializationFailed => "SerializationFailed",

            // IO
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ExternalService)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::InvalidInput.to_string(), "InvalidInput");
        assert_eq!(ErrorKind::ExternalService.to_string(), "ExternalService");
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorKind::ExternalService.is_retryable());
        assert!(!ErrorKind::InvalidInput.is_retryable());
        assert!(!ErrorKind::Tracing.is_retryable());
    }
}
