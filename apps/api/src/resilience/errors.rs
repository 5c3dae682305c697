//! Error taxonomy for generation calls and the retryability classifier.
//!
//! Every failure produced on the path retry → raw text → JSON recovery → schema
//! validation is a `GenerationError`. `is_retryable` decides whether the Retry
//! Orchestrator may re-roll the call or must surface the failure immediately.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::llm_client::ServiceError;
use crate::resilience::json_recovery::RecoveryError;
use crate::resilience::schema::{ValidationError, ViolationKind};

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Network failure, timeout or 5xx from the service.
    #[error("transport error: {0}")]
    Transport(ServiceError),

    /// 429 from the service; carries the retry-after hint if one was sent.
    #[error("rate limited: {0}")]
    RateLimited(ServiceError),

    /// The service refused the request (auth, bad request, other 4xx).
    #[error("service rejected request: {0}")]
    Rejected(ServiceError),

    /// The service answered, but the text is unusable (empty, malformed).
    #[error("unusable content: {0}")]
    ContentShape(String),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("user {user_id} already has {limit} operations in flight; try again shortly")]
    ConcurrencyLimit { user_id: String, limit: usize },

    #[error("user {user_id} already has a '{operation_type}' operation in flight")]
    OperationConflict {
        user_id: String,
        operation_type: String,
    },

    #[error("operation {operation_id} timed out after {}s", .after.as_secs())]
    Timeout {
        operation_id: String,
        after: Duration,
    },

    #[error("operation {0} was cancelled")]
    Cancelled(String),

    #[error("operation {0} not found")]
    UnknownOperation(String),

    /// Nothing trustworthy was left to build a prompt from.
    #[error("insufficient trusted input: {0}")]
    InsufficientContext(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GenerationError {
    /// Server-provided wait hint, if the failure carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationError::RateLimited(e) | GenerationError::Transport(e) => e.retry_after,
            _ => None,
        }
    }

    /// HTTP-ish status of the underlying service failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GenerationError::Transport(e)
            | GenerationError::RateLimited(e)
            | GenerationError::Rejected(e) => e.status,
            _ => None,
        }
    }
}

impl From<ServiceError> for GenerationError {
    fn from(e: ServiceError) -> Self {
        match e.status {
            Some(429) => GenerationError::RateLimited(e),
            Some(status) if (500..600).contains(&status) => GenerationError::Transport(e),
            Some(_) => GenerationError::Rejected(e),
            None if is_transient_network_message(&e.message) => GenerationError::Transport(e),
            None if is_content_symptom(&e.message) => GenerationError::ContentShape(e.message),
            None => GenerationError::Rejected(e),
        }
    }
}

const TRANSIENT_NETWORK_MARKERS: &[&str] = &[
    "econnreset",
    "connection reset",
    "connection refused",
    "connection closed",
    "connection failed",
    "socket hang up",
    "broken pipe",
    "timed out",
    "timeout",
    "etimedout",
    "aborted",
];

const CONTENT_SYMPTOM_MARKERS: &[&str] = &[
    "empty content",
    "empty response",
    "malformed json",
    "incomplete json",
    "invalid json",
    "unexpected token",
    "unexpected end of json",
    "eof while parsing",
    "missing required field",
    "missing field",
];

/// "expected 5 emails, got 3" and friends.
static WRONG_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)expected\s+\d+\s+\w+(\s+\w+)?,?\s+(but\s+)?got\s+\d+")
        .expect("static regex is valid")
});

fn is_transient_network_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_NETWORK_MARKERS.iter().any(|m| lower.contains(m))
}

fn is_content_symptom(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONTENT_SYMPTOM_MARKERS.iter().any(|m| lower.contains(m)) || WRONG_COUNT.is_match(message)
}

/// Decides whether re-attempting the same logical request could succeed.
///
/// Transport failures, 429/5xx, and the application-level symptoms of a bad
/// sample (empty output, unparseable JSON, missing fields, wrong item counts)
/// are retryable. Auth failures, other 4xx, bookkeeping errors and programmer
/// errors are fatal.
pub fn is_retryable(error: &GenerationError) -> bool {
    match error {
        GenerationError::Transport(_)
        | GenerationError::RateLimited(_)
        | GenerationError::ContentShape(_)
        | GenerationError::Recovery(_) => true,
        GenerationError::Validation(e) => matches!(
            e.kind,
            ViolationKind::MissingField | ViolationKind::WrongCount
        ),
        GenerationError::Internal(e) => {
            let message = format!("{e:#}");
            is_transient_network_message(&message) || is_content_symptom(&message)
        }
        GenerationError::Rejected(_)
        | GenerationError::ConcurrencyLimit { .. }
        | GenerationError::OperationConflict { .. }
        | GenerationError::Timeout { .. }
        | GenerationError::Cancelled(_)
        | GenerationError::UnknownOperation(_)
        | GenerationError::InsufficientContext(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn service(status: Option<u16>, message: &str) -> GenerationError {
        ServiceError::new(status, message).into()
    }

    #[test]
    fn test_rate_limit_is_retryable() {
        let e = service(Some(429), "slow down");
        assert!(matches!(e, GenerationError::RateLimited(_)));
        assert!(is_retryable(&e));
    }

    #[test]
    fn test_server_errors_are_retryable() {
        for status in [500, 502, 503, 529] {
            assert!(is_retryable(&service(Some(status), "upstream")), "{status}");
        }
    }

    #[test]
    fn test_client_errors_are_fatal() {
        for status in [400, 401, 403, 404, 422] {
            let e = service(Some(status), "nope");
            assert!(matches!(e, GenerationError::Rejected(_)));
            assert!(!is_retryable(&e), "{status}");
        }
    }

    #[test]
    fn test_network_failures_without_status_are_retryable() {
        for msg in [
            "read ECONNRESET",
            "Connection reset by peer",
            "request timed out: deadline has elapsed",
            "The operation was aborted",
            "socket hang up",
        ] {
            let e = service(None, msg);
            assert!(matches!(e, GenerationError::Transport(_)), "{msg}");
            assert!(is_retryable(&e), "{msg}");
        }
    }

    #[test]
    fn test_empty_content_is_content_shape() {
        let e = service(None, "LLM returned empty content");
        assert!(matches!(e, GenerationError::ContentShape(_)));
        assert!(is_retryable(&e));
    }

    #[test]
    fn test_unknown_statusless_error_is_fatal() {
        let e = service(None, "invalid x-api-key");
        assert!(!is_retryable(&e));
    }

    #[test]
    fn test_internal_wrong_count_is_retryable() {
        let e = GenerationError::Internal(anyhow!("expected 5 emails, got 3"));
        assert!(is_retryable(&e));
        let e = GenerationError::Internal(anyhow!("Expected 5 items but got 4"));
        assert!(is_retryable(&e));
    }

    #[test]
    fn test_internal_parse_symptoms_are_retryable() {
        let e = GenerationError::Internal(anyhow!("Unexpected token < in JSON at position 0"));
        assert!(is_retryable(&e));
        let e = GenerationError::Internal(anyhow!("missing required field 'subject'"));
        assert!(is_retryable(&e));
    }

    #[test]
    fn test_internal_programmer_error_is_fatal() {
        let e = GenerationError::Internal(anyhow!("index out of bounds"));
        assert!(!is_retryable(&e));
    }

    #[test]
    fn test_bookkeeping_errors_are_fatal() {
        let e = GenerationError::ConcurrencyLimit {
            user_id: "u1".to_string(),
            limit: 3,
        };
        assert!(!is_retryable(&e));
        let e = GenerationError::Timeout {
            operation_id: "op".to_string(),
            after: Duration::from_secs(30),
        };
        assert!(!is_retryable(&e));
        assert_eq!(e.to_string(), "operation op timed out after 30s");
    }

    #[test]
    fn test_retry_after_is_exposed() {
        let e: GenerationError = ServiceError::new(Some(429), "busy")
            .with_retry_after(Duration::from_millis(250))
            .into();
        assert_eq!(e.retry_after(), Some(Duration::from_millis(250)));
        assert_eq!(e.status(), Some(429));
    }
}
