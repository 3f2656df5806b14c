//! Per-source credential resolution.

use std::path::PathBuf;

use super::{Config, GCP_PROJECT_VAR, ODP_API_KEY_VAR};
use crate::models::SourceTag;

/// A credential for one upstream source
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// ppubs needs nothing configured; its session token comes from the handshake
    Anonymous,
    /// Header API key (ODP)
    ApiKey(String),
    /// Cloud project and service-account key (BigQuery)
    CloudProject {
        project_id: String,
        key_path: Option<PathBuf>,
    },
    /// Pre-established session token
    SessionToken(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Anonymous => f.write_str("Anonymous"),
            Credential::ApiKey(_) => f.write_str("ApiKey(***)"),
            Credential::CloudProject {
                project_id,
                key_path,
            } => f
                .debug_struct("CloudProject")
                .field("project_id", project_id)
                .field("key_path", key_path)
                .finish(),
            Credential::SessionToken(_) => f.write_str("SessionToken(***)"),
        }
    }
}

/// Credential lookup failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("missing credential for {adapter}: set {variable}")]
    Missing {
        adapter: SourceTag,
        variable: &'static str,
    },
}

/// Resolves credentials from a loaded configuration snapshot.
///
/// Resolution only checks presence. Whether a key is accepted is learned on
/// first use against the upstream.
#[derive(Debug, Clone)]
pub struct CredentialProvider {
    odp_api_key: Option<String>,
    gcp_project: Option<String>,
    gcp_key_path: Option<PathBuf>,
}

impl CredentialProvider {
    pub fn from_config(config: &Config) -> Self {
        Self {
            odp_api_key: config.odp.api_key.clone().filter(|k| !k.trim().is_empty()),
            gcp_project: config
                .bigquery
                .project_id
                .clone()
                .filter(|p| !p.trim().is_empty()),
            gcp_key_path: config.bigquery.credentials_path.clone(),
        }
    }

    /// Resolve the credential a source needs
    pub fn resolve(&self, source: SourceTag) -> Result<Credential, CredentialError> {
        match source {
            SourceTag::Ppubs => Ok(Credential::Anonymous),
            SourceTag::Odp => self
                .odp_api_key
                .clone()
                .map(Credential::ApiKey)
                .ok_or(CredentialError::Missing {
                    adapter: source,
                    variable: ODP_API_KEY_VAR,
                }),
            SourceTag::BigQuery => {
                let project_id = self.gcp_project.clone().ok_or(CredentialError::Missing {
                    adapter: source,
                    variable: GCP_PROJECT_VAR,
                })?;
                Ok(Credential::CloudProject {
                    project_id,
                    key_path: self.gcp_key_path.clone(),
                })
            }
        }
    }
}
