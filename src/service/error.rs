//! Caller-facing error taxonomy.

use serde::Serialize;
use serde_json::{json, Value};

use crate::models::SourceTag;
use crate::sources::SourceError;
use crate::utils::ValidationError;

/// What went wrong, in terms a caller can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Malformed or out-of-range input; never sent upstream
    InvalidRequest,
    /// The ppubs session could not be established
    AuthenticationError,
    /// An ODP key or BigQuery credential was rejected
    InvalidCredential,
    /// The ppubs poll loop ran out of attempts or time
    SearchTimeout,
    /// A single-shot call ran out of time
    UpstreamTimeout,
    /// Transient failures outlasted the retry budget
    UpstreamUnavailable,
    /// The source is not configured
    AdapterUnavailable,
    /// The requested record does not exist
    NotFound,
    /// The upstream answered with something that could not be decoded
    MalformedResponse,
    /// A local failure, such as writing a download to disk
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::AuthenticationError => "AuthenticationError",
            ErrorKind::InvalidCredential => "InvalidCredential",
            ErrorKind::SearchTimeout => "SearchTimeout",
            ErrorKind::UpstreamTimeout => "UpstreamTimeout",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::AdapterUnavailable => "AdapterUnavailable",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::MalformedResponse => "MalformedResponse",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Classify an adapter error
    pub fn of(err: &SourceError) -> Self {
        match err {
            SourceError::InvalidRequest(_) | SourceError::NotImplemented | SourceError::Client { .. } => {
                ErrorKind::InvalidRequest
            }
            SourceError::SessionExpired | SourceError::Authentication(_) => ErrorKind::AuthenticationError,
            SourceError::InvalidCredential(_) => ErrorKind::InvalidCredential,
            SourceError::SearchTimeout { .. } => ErrorKind::SearchTimeout,
            SourceError::Timeout(_) => ErrorKind::UpstreamTimeout,
            SourceError::Unavailable { .. }
            | SourceError::Network(_)
            | SourceError::Server { .. }
            | SourceError::RateLimit { .. } => ErrorKind::UpstreamUnavailable,
            SourceError::AdapterUnavailable { .. } => ErrorKind::AdapterUnavailable,
            SourceError::NotFound(_) => ErrorKind::NotFound,
            SourceError::Parse(_) => ErrorKind::MalformedResponse,
            SourceError::Io(_) | SourceError::Other(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed tool call
///
/// Carries enough context (source, operation, upstream status) to diagnose
/// the failure without retrying blindly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{operation} failed with {kind}: {message}")]
pub struct ToolError {
    pub kind: ErrorKind,
    pub adapter: Option<SourceTag>,
    pub operation: String,
    pub status: Option<u16>,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ErrorKind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            adapter: None,
            operation: operation.into(),
            status: None,
            message: message.into(),
        }
    }

    pub fn with_adapter(mut self, adapter: SourceTag) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn invalid(operation: impl Into<String>, err: ValidationError) -> Self {
        Self::new(ErrorKind::InvalidRequest, operation, err.to_string())
    }

    pub fn from_source(err: SourceError, adapter: SourceTag, operation: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::of(&err),
            adapter: Some(adapter),
            operation: operation.into(),
            status: err.status(),
            message: err.to_string(),
        }
    }

    /// The structured object returned to the caller
    pub fn to_value(&self) -> Value {
        json!({
            "error": true,
            "kind": self.kind.as_str(),
            "source": self.adapter.map(|a| a.id()),
            "operation": self.operation,
            "status": self.status,
            "message": self.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_classification() {
        let unavailable = SourceError::Unavailable {
            attempts: 3,
            last: Box::new(SourceError::Server {
                status: 502,
                message: "bad gateway".into(),
            }),
        };
        assert_eq!(ErrorKind::of(&unavailable), ErrorKind::UpstreamUnavailable);
        assert_eq!(
            ErrorKind::of(&SourceError::Client {
                status: 400,
                message: "bad".into()
            }),
            ErrorKind::InvalidRequest
        );
        assert_eq!(
            ErrorKind::of(&SourceError::SearchTimeout {
                attempts: 10,
                waited: Duration::from_secs(60)
            }),
            ErrorKind::SearchTimeout
        );
        assert_eq!(
            ErrorKind::of(&SourceError::Timeout("slow".into())),
            ErrorKind::UpstreamTimeout
        );
        assert_eq!(
            ErrorKind::of(&SourceError::Authentication("no token".into())),
            ErrorKind::AuthenticationError
        );
        assert_eq!(
            ErrorKind::of(&SourceError::Parse("truncated".into())),
            ErrorKind::MalformedResponse
        );
    }

    #[test]
    fn test_structured_value() {
        let err = ToolError::from_source(
            SourceError::Unavailable {
                attempts: 3,
                last: Box::new(SourceError::Server {
                    status: 503,
                    message: "down".into(),
                }),
            },
            SourceTag::Odp,
            "get_app_metadata",
        );

        let value = err.to_value();
        assert_eq!(value["error"], true);
        assert_eq!(value["kind"], "UpstreamUnavailable");
        assert_eq!(value["source"], "odp");
        assert_eq!(value["operation"], "get_app_metadata");
        assert_eq!(value["status"], 503);
        assert!(value["message"].as_str().unwrap().contains("3 attempt"));
    }

    #[test]
    fn test_validation_error_has_no_source() {
        let err = ToolError::invalid(
            "google_search_patents",
            ValidationError::LimitOutOfRange { got: 501, max: 500 },
        );
        let value = err.to_value();
        assert_eq!(value["kind"], "InvalidRequest");
        assert!(value["source"].is_null());
        assert!(value["status"].is_null());
    }
}
