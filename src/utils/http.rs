//! HTTP client utilities.

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Credential;
use crate::sources::SourceError;

/// Header carrying the ODP API key
pub const API_KEY_HEADER: &str = "X-API-KEY";
/// Header carrying the ppubs session token
pub const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";

/// Longest upstream error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Shared HTTP client with sensible defaults
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Arc<Client>,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self, SourceError> {
        Self::with_user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
    }

    /// Create a new HTTP client with a custom user agent
    pub fn with_user_agent(user_agent: &str) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SourceError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Get the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Attach a resolved credential to an outgoing request
pub fn apply_credential(builder: RequestBuilder, credential: &Credential) -> RequestBuilder {
    match credential {
        Credential::ApiKey(key) => builder.header(API_KEY_HEADER, key),
        Credential::SessionToken(token) => builder.header(ACCESS_TOKEN_HEADER, token),
        Credential::Anonymous | Credential::CloudProject { .. } => builder,
    }
}

/// How a source reports 401/403
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The session expired and can be re-established (ppubs)
    SessionExpired,
    /// The configured credential was rejected (ODP, BigQuery)
    InvalidCredential,
}

/// Turn a non-success response into the matching [`SourceError`]
pub async fn check_status(response: Response, auth: AuthFailure) -> Result<Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    Err(status_error(status, body, retry_after, auth))
}

/// Classify an HTTP status code
pub fn status_error(
    status: StatusCode,
    message: String,
    retry_after: Option<u64>,
    auth: AuthFailure,
) -> SourceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => match auth {
            AuthFailure::SessionExpired => SourceError::SessionExpired,
            AuthFailure::InvalidCredential => SourceError::InvalidCredential(format!(
                "upstream rejected credential ({}): {}",
                status.as_u16(),
                message
            )),
        },
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimit { retry_after },
        StatusCode::REQUEST_TIMEOUT => SourceError::Timeout(message),
        StatusCode::NOT_FOUND => SourceError::NotFound(message),
        s if s.is_server_error() => SourceError::Server {
            status: s.as_u16(),
            message,
        },
        s => SourceError::Client {
            status: s.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = status_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "down".into(),
            None,
            AuthFailure::InvalidCredential,
        );
        assert!(matches!(err, SourceError::Server { status: 503, .. }));

        let err = status_error(
            StatusCode::BAD_REQUEST,
            "bad".into(),
            None,
            AuthFailure::InvalidCredential,
        );
        assert!(matches!(err, SourceError::Client { status: 400, .. }));

        let err = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            String::new(),
            Some(3),
            AuthFailure::InvalidCredential,
        );
        assert!(matches!(
            err,
            SourceError::RateLimit {
                retry_after: Some(3)
            }
        ));
    }

    #[test]
    fn test_auth_failures_depend_on_source() {
        let err = status_error(
            StatusCode::FORBIDDEN,
            String::new(),
            None,
            AuthFailure::SessionExpired,
        );
        assert!(matches!(err, SourceError::SessionExpired));

        let err = status_error(
            StatusCode::UNAUTHORIZED,
            String::new(),
            None,
            AuthFailure::InvalidCredential,
        );
        assert!(matches!(err, SourceError::InvalidCredential(_)));
    }

    #[test]
    fn test_client_builds() {
        assert!(HttpClient::new().is_ok());
    }
}
