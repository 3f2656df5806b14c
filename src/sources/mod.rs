//! Patent source adapters with a shared trait-based interface.
//!
//! Three upstreams are supported:
//!
//! - [`PpubsSource`] - USPTO Patent Public Search. Stateful: every call runs
//!   inside a browsing session owned by [`crate::session::SessionManager`].
//!   Search is a two-phase submit/poll protocol; documents and PDFs are keyed
//!   by the result GUID.
//! - [`OdpSource`] - USPTO Open Data Portal. One REST endpoint per operation,
//!   authenticated with an API key header.
//! - [`BigQuerySource`] - the Google Patents public dataset, queried with
//!   parameterized standard SQL through the BigQuery REST API.
//!
//! Each adapter owns the retry budget for its own failure modes. The
//! [`SourceRegistry`] decides at startup which adapters have the credentials
//! they need; ppubs is always present.

mod bigquery;
mod odp;
mod ppubs;
mod registry;

pub use bigquery::{
    AccessToken, AccessTokenSource, BigQuerySource, MetadataTokenSource, ServiceAccountTokenSource,
    StaticTokenSource, BIGQUERY_MAX_LIMIT,
};
pub use odp::{DatasetParams, DownloadFormat, OdpOperation, OdpSearchParams, OdpSource, ODP_MAX_LIMIT};
pub use ppubs::{PpubsAuthenticator, PpubsSource, PPUBS_MAX_LIMIT};
pub use registry::{SourceCapabilities, SourceRegistry};

use crate::models::{Artifact, PatentRecord, SearchQuery, SearchResult};
use async_trait::async_trait;

/// Source-specific extras for a detail fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailRequest {
    /// Identifier as the source knows it (GUID, application or publication number)
    pub identifier: String,
    /// ppubs collection the GUID belongs to (USPAT or US-PGPUB)
    pub document_type: Option<String>,
}

impl DetailRequest {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            document_type: None,
        }
    }

    pub fn document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }
}

/// The Source trait defines the interface every patent adapter implements.
///
/// Adapters override what they serve and advertise it in `capabilities`;
/// the rest default to [`SourceError::NotImplemented`]. Operations peculiar to
/// one upstream stay inherent methods on the adapter.
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Unique identifier for this source ("ppubs", "odp", "bigquery")
    fn id(&self) -> &str;

    /// Human-readable name of this source
    fn name(&self) -> &str;

    /// Describe the capabilities of this source
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
    }

    /// Largest page size the upstream accepts
    fn max_limit(&self) -> u32;

    /// Search for records matching the query
    async fn search(&self, _query: &SearchQuery) -> Result<SearchResult, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// Fetch one record with its full text
    async fn get_detail(&self, _request: &DetailRequest) -> Result<PatentRecord, SourceError> {
        Err(SourceError::NotImplemented)
    }

    /// Download a binary artifact for a record
    async fn download(&self, _record: &PatentRecord) -> Result<Artifact, SourceError> {
        Err(SourceError::NotImplemented)
    }
}

/// Reject a page size the source cannot serve
pub(crate) fn ensure_limit(query: &SearchQuery, max: u32) -> Result<(), SourceError> {
    if query.limit == 0 || query.limit > max {
        return Err(SourceError::InvalidRequest(format!(
            "limit must be between 1 and {}, got {}",
            max, query.limit
        )));
    }
    Ok(())
}

/// Errors that can occur when interacting with a source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The requested operation is not implemented for this source
    #[error("Operation not implemented for this source")]
    NotImplemented,

    /// Invalid request parameters, caught before sending
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// A single request ran out of time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Upstream 5xx
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Upstream 429
    #[error("Rate limit exceeded")]
    RateLimit { retry_after: Option<u64> },

    /// Upstream 4xx other than auth failures
    #[error("Upstream rejected request ({status}): {message}")]
    Client { status: u16, message: String },

    /// The ppubs session is no longer accepted
    #[error("Session expired")]
    SessionExpired,

    /// The ppubs handshake failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A configured key or project was rejected
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// The submit/poll loop did not see a result in time
    #[error("Results not ready after {attempts} poll attempt(s) ({waited:?})")]
    SearchTimeout {
        attempts: u32,
        waited: std::time::Duration,
    },

    /// Transient failures outlasted the retry budget
    #[error("Upstream unavailable after {attempts} attempt(s): {last}")]
    Unavailable {
        attempts: u32,
        last: Box<SourceError>,
    },

    /// An optional source is not configured
    #[error("{adapter} is not available: {reason}")]
    AdapterUnavailable {
        adapter: crate::models::SourceTag,
        reason: String,
    },

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Parsing error (JSON, HTML, etc.)
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO error (file system)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("Error: {0}")]
    Other(String),
}

impl SourceError {
    /// HTTP status behind this error, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            SourceError::Server { status, .. } | SourceError::Client { status, .. } => {
                Some(*status)
            }
            SourceError::RateLimit { .. } => Some(429),
            SourceError::Unavailable { last, .. } => last.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}
