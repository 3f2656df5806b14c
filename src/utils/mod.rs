//! Utility modules shared by the adapters.
//!
//! - [`HttpClient`]: shared HTTP client with a cookie store
//! - [`with_retry`]: run an operation with exponential backoff on transient errors
//! - [`poll_until`]: bounded submit-then-poll loop
//! - [`validate`]: argument checks that run before any request leaves the process
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use patent_master::utils::{with_retry, RetryConfig};
//! use patent_master::sources::SourceError;
//!
//! # async fn fetch_data() -> Result<String, SourceError> { Ok("data".to_string()) }
//! # #[tokio::main]
//! # async fn main() -> Result<(), SourceError> {
//! let config = RetryConfig::default().max_attempts(3);
//! let result = with_retry(config, || async { fetch_data().await }).await?;
//! # Ok(())
//! # }
//! ```

mod http;
mod poll;
mod retry;
pub mod validate;

pub use http::{
    apply_credential, check_status, status_error, AuthFailure, HttpClient, ACCESS_TOKEN_HEADER,
    API_KEY_HEADER,
};
pub use poll::{poll_until, PollPolicy, PollStatus, Polled};
pub use retry::{with_retry, RetryConfig, TransientError};
pub use validate::{
    normalize_application_number, normalize_publication_number, parse_date, parse_date_range,
    parse_us_patent_number, require_text, sanitize_identifier, validate_country, validate_limit,
    PatentNumber, ValidationError, GOOGLE_COUNTRIES,
};
