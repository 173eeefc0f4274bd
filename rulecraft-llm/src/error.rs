//! Gateway error types
//!
//! Re-exports rulecraft-error and maps provider failures onto it.

pub use rulecraft_error::{Error, ErrorKind, ErrorStatus, Result};

use crate::provider::ProviderError;
use std::time::Duration;

/// Context key carrying a server-requested wait, in seconds
pub const RETRY_AFTER_SECS: &str = "retry_after_secs";

/// Wrap a provider failure as an `ExternalService` error.
///
/// Transient failures (network, rate limit, 5xx) stay retryable; everything
/// else is marked permanent so a retry wrapper gives up immediately.
pub fn external_service(provider: &str, err: ProviderError) -> Error {
    let status = if err.is_transient() {
        ErrorStatus::Temporary
    } else {
        ErrorStatus::Permanent
    };

    let mut error = Error::external_service(err.to_string())
        .with_status(status)
        .with_operation("gateway::send")
        .with_context("provider", provider);
    if let ProviderError::RateLimited { retry_after: Some(secs) } = &err {
        error = error.with_context(RETRY_AFTER_SECS, secs.to_string());
    }
    error.set_source(err)
}

/// The wait a rate-limited provider asked for, if any
pub fn retry_after(err: &Error) -> Option<Duration> {
    err.context_value(RETRY_AFTER_SECS)?
        .parse()
        .ok()
        .map(Duration::from_secs)
}

/// A response arrived but carried no usable text
pub fn empty_response(provider: &str) -> Error {
    Error::external_service("gateway returned an empty response")
        .permanent()
        .with_operation("gateway::send")
        .with_context("provider", provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_provider_error_is_retryable() {
        let err = external_service("internal", ProviderError::Network("connection reset".into()));
        assert_eq!(err.kind(), ErrorKind::ExternalService);
        assert!(err.is_retryable());
        assert_eq!(err.context_value("provider"), Some("internal"));
        assert!(err.source_ref().is_some());
    }

    #[test]
    fn test_rate_limit_keeps_retry_after() {
        let err = external_service("openai", ProviderError::RateLimited { retry_after: Some(12) });
        assert!(err.is_retryable());
        assert_eq!(err.context_value(RETRY_AFTER_SECS), Some("12"));
        assert_eq!(retry_after(&err), Some(Duration::from_secs(12)));

        let err = external_service("openai", ProviderError::RateLimited { retry_after: None });
        assert_eq!(retry_after(&err), None);
    }

    #[test]
    fn test_auth_failure_is_permanent() {
        let err = external_service("openai", ProviderError::AuthenticationFailed);
        assert_eq!(err.kind(), ErrorKind::ExternalService);
        assert_eq!(err.status(), ErrorStatus::Permanent);
    }

    #[test]
    fn test_empty_response() {
        let err = empty_response("ollama");
        assert_eq!(err.kind(), ErrorKind::ExternalService);
        assert!(!err.is_retryable());
    }
}
