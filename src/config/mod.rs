//! Configuration management.
//!
//! Configuration is read from an optional TOML file and layered with
//! environment overrides using the `PATENT_MASTER__SECTION__KEY` form:
//!
//! ```toml
//! [ppubs]
//! session_ttl_secs = 1500
//!
//! [ppubs.poll]
//! max_attempts = 10
//!
//! [odp]
//! api_key = "your-odp-key"
//!
//! [bigquery]
//! project_id = "my-gcp-project"
//! credentials_path = "/path/to/service-account.json"
//!
//! [retry]
//! max_attempts = 3
//! ```
//!
//! The credential variables the USPTO and Google tooling already use
//! (`USPTO_API_KEY`, `GOOGLE_CLOUD_PROJECT`, `GOOGLE_APPLICATION_CREDENTIALS`)
//! fill any credential the file leaves empty.

mod credentials;

pub use credentials::{Credential, CredentialError, CredentialProvider};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{PollPolicy, RetryConfig};

/// Environment variable holding the ODP API key
pub const ODP_API_KEY_VAR: &str = "USPTO_API_KEY";
/// Environment variable holding the Google Cloud project id
pub const GCP_PROJECT_VAR: &str = "GOOGLE_CLOUD_PROJECT";
/// Environment variable holding the service-account key path
pub const GCP_CREDENTIALS_VAR: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ppubs: PpubsConfig,

    #[serde(default)]
    pub odp: OdpConfig,

    #[serde(default)]
    pub bigquery: BigQueryConfig,

    /// Retry budget for transient upstream failures
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub downloads: DownloadConfig,
}

impl Config {
    /// Fill unset credentials from the well-known environment variables
    pub fn with_env_credentials(mut self) -> Self {
        if self.odp.api_key.is_none() {
            self.odp.api_key = non_empty_env(ODP_API_KEY_VAR);
        }
        if self.bigquery.project_id.is_none() {
            self.bigquery.project_id = non_empty_env(GCP_PROJECT_VAR);
        }
        if self.bigquery.credentials_path.is_none() {
            self.bigquery.credentials_path = non_empty_env(GCP_CREDENTIALS_VAR).map(PathBuf::from);
        }
        self
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// USPTO Patent Public Search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PpubsConfig {
    #[serde(default = "default_ppubs_base_url")]
    pub base_url: String,

    /// Session lifetime before a fresh handshake is forced
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Handshake attempts before the session is marked failed
    #[serde(default = "default_handshake_attempts")]
    pub handshake_attempts: u32,

    /// Failed handshakes in a row before the session is invalidated
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Per-call bound for searches (covers the whole submit/poll cycle)
    #[serde(default = "default_ppubs_search_timeout")]
    pub search_timeout_secs: u64,

    /// Per-call bound for document and PDF retrieval
    #[serde(default = "default_ppubs_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub poll: PollSettings,
}

impl Default for PpubsConfig {
    fn default() -> Self {
        Self {
            base_url: default_ppubs_base_url(),
            session_ttl_secs: default_session_ttl(),
            handshake_attempts: default_handshake_attempts(),
            max_consecutive_failures: default_max_consecutive_failures(),
            search_timeout_secs: default_ppubs_search_timeout(),
            request_timeout_secs: default_ppubs_request_timeout(),
            poll: PollSettings::default(),
        }
    }
}

impl PpubsConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_ppubs_base_url() -> String {
    "https://ppubs.uspto.gov".to_string()
}

fn default_session_ttl() -> u64 {
    25 * 60
}

fn default_handshake_attempts() -> u32 {
    3
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_ppubs_search_timeout() -> u64 {
    120
}

fn default_ppubs_request_timeout() -> u64 {
    60
}

/// Submit/poll loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_poll_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_poll_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_poll_total_wait")]
    pub max_total_wait_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_poll_attempts(),
            initial_delay_ms: default_poll_initial_delay(),
            max_delay_ms: default_poll_max_delay(),
            max_total_wait_secs: default_poll_total_wait(),
        }
    }
}

impl PollSettings {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_total_wait: Duration::from_secs(self.max_total_wait_secs),
        }
    }
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_poll_initial_delay() -> u64 {
    250
}

fn default_poll_max_delay() -> u64 {
    4_000
}

fn default_poll_total_wait() -> u64 {
    60
}

/// USPTO Open Data Portal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdpConfig {
    #[serde(default = "default_odp_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_single_shot_timeout")]
    pub timeout_secs: u64,
}

impl Default for OdpConfig {
    fn default() -> Self {
        Self {
            base_url: default_odp_base_url(),
            api_key: None,
            timeout_secs: default_single_shot_timeout(),
        }
    }
}

impl OdpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_odp_base_url() -> String {
    "https://api.uspto.gov".to_string()
}

fn default_single_shot_timeout() -> u64 {
    30
}

/// Google Patents BigQuery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BigQueryConfig {
    #[serde(default = "default_bigquery_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub project_id: Option<String>,

    /// Service-account key file
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,

    /// Fully qualified publications table
    #[serde(default = "default_dataset")]
    pub dataset: String,

    #[serde(default = "default_bigquery_timeout")]
    pub timeout_secs: u64,

    /// Server-side wait before `jobs.query` returns an incomplete job
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Upper bound on bytes a single query may bill
    #[serde(default)]
    pub maximum_bytes_billed: Option<u64>,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            base_url: default_bigquery_base_url(),
            project_id: None,
            credentials_path: None,
            dataset: default_dataset(),
            timeout_secs: default_bigquery_timeout(),
            query_timeout_ms: default_query_timeout_ms(),
            maximum_bytes_billed: None,
        }
    }
}

impl BigQueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_bigquery_base_url() -> String {
    "https://bigquery.googleapis.com/bigquery/v2".to_string()
}

fn default_dataset() -> String {
    "patents-public-data.patents.publications".to_string()
}

fn default_bigquery_timeout() -> u64 {
    60
}

fn default_query_timeout_ms() -> u64 {
    30_000
}

/// Retry settings shared by all adapters (each adapter keeps its own budget)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_retry_initial_delay(),
            max_delay_ms: default_retry_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetrySettings {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_delay() -> u64 {
    500
}

fn default_retry_max_delay() -> u64 {
    8_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory PDFs and bulk exports are written to
    #[serde(default = "default_download_dir")]
    pub default_path: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            default_path: default_download_dir(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

/// Load configuration from a file, with environment overrides
pub fn load_config(path: &Path) -> Result<Config, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(
            config::Environment::with_prefix("PATENT_MASTER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = settings.try_deserialize()?;
    Ok(config.with_env_credentials())
}

/// Get the configuration from environment overrides and defaults only
pub fn get_config() -> Result<Config, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(
            config::Environment::with_prefix("PATENT_MASTER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: Config = settings.try_deserialize()?;
    Ok(config.with_env_credentials())
}

/// Look for a config file in the working directory, then the user config dir
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("patent-master.toml");
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join("patent-master").join("config.toml"))
        .filter(|path| path.is_file())
}
