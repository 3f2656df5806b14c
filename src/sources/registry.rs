//! Registry of the configured patent sources.

use std::sync::Arc;

use super::{
    bigquery::{AccessTokenSource, BigQuerySource, MetadataTokenSource, ServiceAccountTokenSource},
    odp::OdpSource,
    ppubs::PpubsSource,
    Source, SourceError,
};
use crate::config::{Config, Credential, CredentialProvider};
use crate::models::SourceTag;

bitflags::bitflags! {
    /// Capabilities that a source can support
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceCapabilities: u32 {
        const SEARCH = 1 << 0;
        const DETAIL = 1 << 1;
        const DOWNLOAD = 1 << 2;
        const CLAIMS = 1 << 3;
        const DESCRIPTION = 1 << 4;
        const METADATA = 1 << 5;
        const INVENTOR_SEARCH = 1 << 6;
        const ASSIGNEE_SEARCH = 1 << 7;
        const CPC_SEARCH = 1 << 8;
    }
}

/// An optional source, or the reason it is missing
#[derive(Debug)]
enum Slot<T> {
    Ready(Arc<T>),
    Missing(String),
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Slot::Ready(source) => Slot::Ready(Arc::clone(source)),
            Slot::Missing(reason) => Slot::Missing(reason.clone()),
        }
    }
}

impl<T> Slot<T> {
    fn get(&self, adapter: SourceTag) -> Result<&Arc<T>, SourceError> {
        match self {
            Slot::Ready(source) => Ok(source),
            Slot::Missing(reason) => Err(SourceError::AdapterUnavailable {
                adapter,
                reason: reason.clone(),
            }),
        }
    }

    fn is_ready(&self) -> bool {
        matches!(self, Slot::Ready(_))
    }
}

/// Registry for the three patent sources
///
/// ppubs needs no configuration and is always present. ODP and BigQuery are
/// only registered when their credentials resolve; asking for a missing one
/// yields [`SourceError::AdapterUnavailable`] at call time rather than a
/// startup failure.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    ppubs: Arc<PpubsSource>,
    odp: Slot<OdpSource>,
    bigquery: Slot<BigQuerySource>,
}

impl SourceRegistry {
    /// Build every source the configuration allows
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        let credentials = CredentialProvider::from_config(config);
        let ppubs = Arc::new(PpubsSource::new(config)?);

        let odp = match credentials.resolve(SourceTag::Odp) {
            Ok(credential) => Slot::Ready(Arc::new(OdpSource::new(&config.odp, &config.retry, credential)?)),
            Err(e) => {
                tracing::info!("ODP source disabled: {}", e);
                Slot::Missing(e.to_string())
            }
        };

        let bigquery = match credentials.resolve(SourceTag::BigQuery) {
            Ok(Credential::CloudProject {
                project_id,
                key_path,
            }) => {
                let tokens: Arc<dyn AccessTokenSource> = match key_path {
                    Some(path) => Arc::new(ServiceAccountTokenSource::new(path)),
                    None => Arc::new(MetadataTokenSource::new()),
                };
                Slot::Ready(Arc::new(BigQuerySource::new(
                    &config.bigquery,
                    &config.retry,
                    project_id,
                    tokens,
                )?))
            }
            Ok(other) => Slot::Missing(format!("unexpected credential {:?}", other)),
            Err(e) => {
                tracing::info!("BigQuery source disabled: {}", e);
                Slot::Missing(e.to_string())
            }
        };

        Ok(Self {
            ppubs,
            odp,
            bigquery,
        })
    }

    /// Assemble a registry from already-built sources
    pub fn from_parts(
        ppubs: Arc<PpubsSource>,
        odp: Option<Arc<OdpSource>>,
        bigquery: Option<Arc<BigQuerySource>>,
    ) -> Self {
        let missing = |tag: SourceTag| format!("{} is not configured", tag.name());
        Self {
            ppubs,
            odp: odp.map_or_else(|| Slot::Missing(missing(SourceTag::Odp)), Slot::Ready),
            bigquery: bigquery.map_or_else(|| Slot::Missing(missing(SourceTag::BigQuery)), Slot::Ready),
        }
    }

    pub fn ppubs(&self) -> &Arc<PpubsSource> {
        &self.ppubs
    }

    /// The ODP source, or `AdapterUnavailable`
    pub fn odp(&self) -> Result<&Arc<OdpSource>, SourceError> {
        self.odp.get(SourceTag::Odp)
    }

    /// The BigQuery source, or `AdapterUnavailable`
    pub fn bigquery(&self) -> Result<&Arc<BigQuerySource>, SourceError> {
        self.bigquery.get(SourceTag::BigQuery)
    }

    /// Check if a source is configured
    pub fn has(&self, tag: SourceTag) -> bool {
        match tag {
            SourceTag::Ppubs => true,
            SourceTag::Odp => self.odp.is_ready(),
            SourceTag::BigQuery => self.bigquery.is_ready(),
        }
    }

    /// Get all configured sources
    pub fn all(&self) -> Vec<Arc<dyn Source>> {
        let mut sources: Vec<Arc<dyn Source>> = vec![self.ppubs.clone()];
        if let Slot::Ready(odp) = &self.odp {
            sources.push(odp.clone());
        }
        if let Slot::Ready(bigquery) = &self.bigquery {
            sources.push(bigquery.clone());
        }
        sources
    }

    /// Why each unconfigured source is missing
    pub fn unavailable(&self) -> Vec<(SourceTag, String)> {
        let mut missing = Vec::new();
        if let Slot::Missing(reason) = &self.odp {
            missing.push((SourceTag::Odp, reason.clone()));
        }
        if let Slot::Missing(reason) = &self.bigquery {
            missing.push((SourceTag::BigQuery, reason.clone()));
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_without_credentials() {
        let registry = SourceRegistry::from_config(&Config::default()).unwrap();

        assert!(registry.has(SourceTag::Ppubs));
        assert!(!registry.has(SourceTag::Odp));
        assert!(!registry.has(SourceTag::BigQuery));
        assert_eq!(registry.all().len(), 1);
        assert_eq!(registry.unavailable().len(), 2);

        match registry.odp() {
            Err(SourceError::AdapterUnavailable { adapter, reason }) => {
                assert_eq!(adapter, SourceTag::Odp);
                assert!(reason.contains("USPTO_API_KEY"));
            }
            other => panic!("expected AdapterUnavailable, got {:?}", other),
        }
        assert!(matches!(
            registry.bigquery(),
            Err(SourceError::AdapterUnavailable { .. })
        ));
    }

    #[test]
    fn test_registry_with_all_credentials() {
        let mut config = Config::default();
        config.odp.api_key = Some("key".to_string());
        config.bigquery.project_id = Some("project".to_string());
        config.bigquery.credentials_path = Some("/nonexistent/key.json".into());

        // The key file is only read on first use
        let registry = SourceRegistry::from_config(&config).unwrap();
        assert!(registry.has(SourceTag::Odp));
        assert!(registry.has(SourceTag::BigQuery));
        assert_eq!(registry.all().len(), 3);
        assert!(registry.unavailable().is_empty());
    }

    #[test]
    fn test_configured_capabilities() {
        let mut config = Config::default();
        config.bigquery.project_id = Some("project".to_string());
        let registry = SourceRegistry::from_config(&config).unwrap();

        let sources = registry.all();
        let ids: Vec<_> = sources.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["ppubs", "bigquery"]);

        assert!(sources[0].capabilities().contains(SourceCapabilities::DOWNLOAD));
        assert!(sources[1].capabilities().contains(SourceCapabilities::CPC_SEARCH));
        assert!(!sources[1].capabilities().contains(SourceCapabilities::DOWNLOAD));
    }
}
