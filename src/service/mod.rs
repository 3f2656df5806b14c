//! Orchestration facade: one entry point per tool operation.
//!
//! Each operation validates its arguments, checks that the adapter it needs
//! is configured, runs the adapter call under a per-source time bound and
//! translates whatever goes wrong into a [`ToolError`]. Retries are left to
//! the adapters; nothing here retries across sources.

mod error;
mod requests;

pub use error::{ErrorKind, ToolError};
pub use requests::{
    ApplicationDownloadRequest, ApplicationRequest, AssigneeSearchRequest, CpcSearchRequest,
    DatasetProductRequest, DocumentRequest, GoogleScope, GoogleSearchRequest, InventorSearchRequest,
    PatentNumberRequest, PpubsSearchRequest, PublicationRequest, StatusCodesRequest, TextOrNumber,
};

use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::models::{
    Artifact, Collection, DefaultOperator, OdpDocument, PatentRecord, SearchQuery, SearchResult, SourceTag,
};
use crate::sources::{
    BigQuerySource, DatasetParams, DetailRequest, DownloadFormat, OdpOperation, OdpSearchParams, OdpSource, Source,
    SourceError, SourceRegistry, BIGQUERY_MAX_LIMIT, ODP_MAX_LIMIT, PPUBS_MAX_LIMIT,
};
use crate::utils::{
    normalize_application_number, normalize_publication_number, parse_date, parse_date_range,
    parse_us_patent_number, require_text, sanitize_identifier, validate_country, validate_limit,
    ValidationError,
};

/// Default page sizes when the caller gives none
const PPUBS_DEFAULT_LIMIT: u64 = 100;
const ODP_DEFAULT_LIMIT: u64 = 25;
const GOOGLE_DEFAULT_LIMIT: u64 = 100;

/// Per-call time bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Whole submit/poll cycle of a ppubs search, including by-number lookups
    pub ppubs_search: Duration,
    /// ppubs document and PDF retrieval
    pub ppubs_request: Duration,
    pub odp: Duration,
    pub bigquery: Duration,
}

impl Timeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ppubs_search: config.ppubs.search_timeout(),
            ppubs_request: config.ppubs.request_timeout(),
            odp: config.odp.timeout(),
            bigquery: config.bigquery.timeout(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// An ODP search page with the upstream body (facets, counts) kept alongside
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationPage {
    pub result: SearchResult,
    #[serde(serialize_with = "crate::models::sorted_keys")]
    pub body: Value,
}

/// The service behind every tool
#[derive(Debug, Clone)]
pub struct PatentService {
    registry: Arc<SourceRegistry>,
    timeouts: Timeouts,
}

impl PatentService {
    pub fn new(registry: Arc<SourceRegistry>, config: &Config) -> Self {
        Self::with_timeouts(registry, Timeouts::from_config(config))
    }

    pub fn with_timeouts(registry: Arc<SourceRegistry>, timeouts: Timeouts) -> Self {
        Self { registry, timeouts }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Run one adapter call under a time bound and classify its failure
    async fn call<T, Fut>(
        &self,
        source: SourceTag,
        operation: &'static str,
        bound: Duration,
        on_timeout: ErrorKind,
        work: Fut,
    ) -> Result<T, ToolError>
    where
        Fut: Future<Output = Result<T, SourceError>>,
    {
        tracing::debug!("{} -> {} (bound {:?})", operation, source, bound);
        match tokio::time::timeout(bound, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                tracing::warn!("{} on {} failed: {}", operation, source, err);
                Err(ToolError::from_source(err, source, operation))
            }
            Err(_) => {
                tracing::warn!("{} on {} timed out after {:?}", operation, source, bound);
                Err(ToolError::new(
                    on_timeout,
                    operation,
                    format!("no result from {} within {:?}", source.name(), bound),
                )
                .with_adapter(source))
            }
        }
    }

    fn odp(&self, operation: &'static str) -> Result<&Arc<OdpSource>, ToolError> {
        self.registry
            .odp()
            .map_err(|e| ToolError::from_source(e, SourceTag::Odp, operation))
    }

    fn bigquery(&self, operation: &'static str) -> Result<&Arc<BigQuerySource>, ToolError> {
        self.registry
            .bigquery()
            .map_err(|e| ToolError::from_source(e, SourceTag::BigQuery, operation))
    }

    // ppubs

    pub async fn ppubs_search_patents(&self, request: PpubsSearchRequest) -> Result<SearchResult, ToolError> {
        self.ppubs_search("ppubs_search_patents", Collection::Patents, request)
            .await
    }

    pub async fn ppubs_search_applications(&self, request: PpubsSearchRequest) -> Result<SearchResult, ToolError> {
        self.ppubs_search("ppubs_search_applications", Collection::Applications, request)
            .await
    }

    async fn ppubs_search(
        &self,
        operation: &'static str,
        collection: Collection,
        request: PpubsSearchRequest,
    ) -> Result<SearchResult, ToolError> {
        let query = ppubs_query(collection, &request).map_err(|e| ToolError::invalid(operation, e))?;
        let ppubs = self.registry.ppubs();
        self.call(
            SourceTag::Ppubs,
            operation,
            self.timeouts.ppubs_search,
            ErrorKind::SearchTimeout,
            ppubs.search(&query),
        )
        .await
    }

    pub async fn ppubs_get_full_document(&self, request: DocumentRequest) -> Result<PatentRecord, ToolError> {
        const OP: &str = "ppubs_get_full_document";
        let guid = sanitize_identifier(&request.guid).map_err(|e| ToolError::invalid(OP, e))?;
        let collection = collection_arg(request.source_type.as_deref()).map_err(|e| ToolError::invalid(OP, e))?;

        let ppubs = self.registry.ppubs();
        self.call(
            SourceTag::Ppubs,
            OP,
            self.timeouts.ppubs_request,
            ErrorKind::UpstreamTimeout,
            ppubs.get_detail(&DetailRequest::new(guid).document_type(collection.as_str())),
        )
        .await
    }

    pub async fn ppubs_get_patent_by_number(&self, request: PatentNumberRequest) -> Result<PatentRecord, ToolError> {
        const OP: &str = "ppubs_get_patent_by_number";
        let number = parse_us_patent_number(&request.patent_number.as_text()).map_err(|e| ToolError::invalid(OP, e))?;

        let ppubs = self.registry.ppubs();
        self.call(
            SourceTag::Ppubs,
            OP,
            self.timeouts.ppubs_search,
            ErrorKind::SearchTimeout,
            ppubs.get_by_number(&number),
        )
        .await
    }

    pub async fn ppubs_download_patent_pdf(&self, request: PatentNumberRequest) -> Result<Artifact, ToolError> {
        const OP: &str = "ppubs_download_patent_pdf";
        let number = parse_us_patent_number(&request.patent_number.as_text()).map_err(|e| ToolError::invalid(OP, e))?;

        let ppubs = self.registry.ppubs();
        let resolve = async {
            let record = ppubs.find_by_number(&number).await?;
            if record.image_location.is_some() && record.page_count.is_some() {
                return Ok::<_, SourceError>(record);
            }
            match record.guid.as_deref() {
                Some(guid) => {
                    let document_type = record.document_type.as_deref().unwrap_or(Collection::Patents.as_str());
                    let mut document = ppubs.get_detail(&DetailRequest::new(guid).document_type(document_type)).await?;
                    document.identifier = record.identifier;
                    Ok(document)
                }
                None => Ok(record),
            }
        };
        let record = self
            .call(
                SourceTag::Ppubs,
                OP,
                self.timeouts.ppubs_search,
                ErrorKind::SearchTimeout,
                resolve,
            )
            .await?;

        self.call(
            SourceTag::Ppubs,
            OP,
            self.timeouts.ppubs_request,
            ErrorKind::UpstreamTimeout,
            ppubs.download(&record),
        )
        .await
    }

    // ODP

    /// Any per-application endpoint
    pub async fn get_application(
        &self,
        operation: OdpOperation,
        request: ApplicationRequest,
    ) -> Result<OdpDocument, ToolError> {
        let op = operation.operation_name();
        let app_num = normalize_application_number(&request.app_num.as_text()).map_err(|e| ToolError::invalid(op, e))?;
        let odp = self.odp(op)?;
        self.call(
            SourceTag::Odp,
            op,
            self.timeouts.odp,
            ErrorKind::UpstreamTimeout,
            odp.get_application(operation, &app_num),
        )
        .await
    }

    pub async fn get_app(&self, request: ApplicationRequest) -> Result<OdpDocument, ToolError> {
        self.get_application(OdpOperation::Application, request).await
    }

    pub async fn get_app_metadata(&self, request: ApplicationRequest) -> Result<OdpDocument, ToolError> {
        self.get_application(OdpOperation::MetaData, request).await
    }

    pub async fn get_app_adjustment(&self, request: ApplicationRequest) -> Result<OdpDocument, ToolError> {
        self.get_application(OdpOperation::Adjustment, request).await
    }

    pub async fn get_app_assignment(&self, request: ApplicationRequest) -> Result<OdpDocument, ToolError> {
        self.get_application(OdpOperation::Assignment, request).await
    }

    pub async fn get_app_attorney(&self, request: ApplicationRequest) -> Result<OdpDocument, ToolError> {
        self.get_application(OdpOperation::Attorney, request).await
    }

    pub async fn get_app_continuity(&self, request: ApplicationRequest) -> Result<OdpDocument, ToolError> {
        self.get_application(OdpOperation::Continuity, request).await
    }

    pub async fn get_app_foreign_priority(&self, request: ApplicationRequest) -> Result<OdpDocument, ToolError> {
        self.get_application(OdpOperation::ForeignPriority, request).await
    }

    pub async fn get_app_transactions(&self, request: ApplicationRequest) -> Result<OdpDocument, ToolError> {
        self.get_application(OdpOperation::Transactions, request).await
    }

    pub async fn get_app_documents(&self, request: ApplicationRequest) -> Result<OdpDocument, ToolError> {
        self.get_application(OdpOperation::Documents, request).await
    }

    pub async fn get_app_associated_documents(&self, request: ApplicationRequest) -> Result<OdpDocument, ToolError> {
        self.get_application(OdpOperation::AssociatedDocuments, request).await
    }

    pub async fn search_applications(&self, params: OdpSearchParams) -> Result<ApplicationPage, ToolError> {
        self.odp_search("search_applications", params, false).await
    }

    pub async fn search_applications_post(&self, params: OdpSearchParams) -> Result<ApplicationPage, ToolError> {
        self.odp_search("search_applications_post", params, true).await
    }

    async fn odp_search(
        &self,
        operation: &'static str,
        params: OdpSearchParams,
        post: bool,
    ) -> Result<ApplicationPage, ToolError> {
        validate_limit(u64::from(params.limit), ODP_MAX_LIMIT).map_err(|e| ToolError::invalid(operation, e))?;
        let odp = self.odp(operation)?;
        let (result, body) = self
            .call(
                SourceTag::Odp,
                operation,
                self.timeouts.odp,
                ErrorKind::UpstreamTimeout,
                odp.search_applications(&params, post),
            )
            .await?;
        Ok(ApplicationPage { result, body })
    }

    pub async fn download_applications(&self, request: ApplicationDownloadRequest) -> Result<Artifact, ToolError> {
        self.odp_download("download_applications", request, false).await
    }

    pub async fn download_applications_post(&self, request: ApplicationDownloadRequest) -> Result<Artifact, ToolError> {
        self.odp_download("download_applications_post", request, true).await
    }

    async fn odp_download(
        &self,
        operation: &'static str,
        request: ApplicationDownloadRequest,
        post: bool,
    ) -> Result<Artifact, ToolError> {
        let format = download_format(request.format.as_deref()).map_err(|e| ToolError::invalid(operation, e))?;
        validate_limit(u64::from(request.params.limit), ODP_MAX_LIMIT).map_err(|e| ToolError::invalid(operation, e))?;
        let odp = self.odp(operation)?;
        self.call(
            SourceTag::Odp,
            operation,
            self.timeouts.odp,
            ErrorKind::UpstreamTimeout,
            odp.download_applications(&request.params, format, post),
        )
        .await
    }

    pub async fn get_status_codes(&self, request: StatusCodesRequest) -> Result<OdpDocument, ToolError> {
        self.status_codes("get_status_codes", request, false).await
    }

    pub async fn get_status_codes_post(&self, request: StatusCodesRequest) -> Result<OdpDocument, ToolError> {
        self.status_codes("get_status_codes_post", request, true).await
    }

    async fn status_codes(
        &self,
        operation: &'static str,
        request: StatusCodesRequest,
        post: bool,
    ) -> Result<OdpDocument, ToolError> {
        let limit = validate_limit(request.limit.unwrap_or(ODP_DEFAULT_LIMIT), ODP_MAX_LIMIT)
            .map_err(|e| ToolError::invalid(operation, e))?;
        let q = request.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
        let odp = self.odp(operation)?;
        self.call(
            SourceTag::Odp,
            operation,
            self.timeouts.odp,
            ErrorKind::UpstreamTimeout,
            odp.status_codes(q, request.offset.unwrap_or(0), limit, post),
        )
        .await
    }

    pub async fn search_datasets(&self, params: DatasetParams) -> Result<OdpDocument, ToolError> {
        const OP: &str = "search_datasets";
        if let Some(limit) = params.limit {
            validate_limit(u64::from(limit), ODP_MAX_LIMIT).map_err(|e| ToolError::invalid(OP, e))?;
        }
        let odp = self.odp(OP)?;
        self.call(
            SourceTag::Odp,
            OP,
            self.timeouts.odp,
            ErrorKind::UpstreamTimeout,
            odp.search_datasets(&params),
        )
        .await
    }

    pub async fn get_dataset_product(&self, request: DatasetProductRequest) -> Result<OdpDocument, ToolError> {
        const OP: &str = "get_dataset_product";
        let product_id = sanitize_identifier(&request.product_id).map_err(|e| ToolError::invalid(OP, e))?;
        let mut params = request.params;
        let (from, to) = parse_date_range(
            params.file_data_from_date.as_deref(),
            params.file_data_to_date.as_deref(),
        )
        .map_err(|e| ToolError::invalid(OP, e))?;
        params.file_data_from_date = from.map(|d| d.format("%Y-%m-%d").to_string());
        params.file_data_to_date = to.map(|d| d.format("%Y-%m-%d").to_string());

        let odp = self.odp(OP)?;
        self.call(
            SourceTag::Odp,
            OP,
            self.timeouts.odp,
            ErrorKind::UpstreamTimeout,
            odp.get_dataset_product(&product_id, &params),
        )
        .await
    }

    // Google Patents on BigQuery

    pub async fn google_search_patents(&self, request: GoogleSearchRequest) -> Result<SearchResult, ToolError> {
        const OP: &str = "google_search_patents";
        let text = require_text(Some(&request.query), "query").map_err(|e| ToolError::invalid(OP, e))?;
        let query = google_query(text, &request.scope).map_err(|e| ToolError::invalid(OP, e))?;
        let bigquery = self.bigquery(OP)?;
        self.call(
            SourceTag::BigQuery,
            OP,
            self.timeouts.bigquery,
            ErrorKind::UpstreamTimeout,
            bigquery.search_patents(&query),
        )
        .await
    }

    pub async fn google_search_by_inventor(&self, request: InventorSearchRequest) -> Result<SearchResult, ToolError> {
        const OP: &str = "google_search_by_inventor";
        let name = require_text(Some(&request.inventor_name), "inventor_name").map_err(|e| ToolError::invalid(OP, e))?;
        let query = google_query("", &request.scope).map_err(|e| ToolError::invalid(OP, e))?;
        let bigquery = self.bigquery(OP)?;
        self.call(
            SourceTag::BigQuery,
            OP,
            self.timeouts.bigquery,
            ErrorKind::UpstreamTimeout,
            bigquery.search_by_inventor(name, &query),
        )
        .await
    }

    pub async fn google_search_by_assignee(&self, request: AssigneeSearchRequest) -> Result<SearchResult, ToolError> {
        const OP: &str = "google_search_by_assignee";
        let name = require_text(Some(&request.assignee_name), "assignee_name").map_err(|e| ToolError::invalid(OP, e))?;
        let query = google_query("", &request.scope).map_err(|e| ToolError::invalid(OP, e))?;
        let bigquery = self.bigquery(OP)?;
        self.call(
            SourceTag::BigQuery,
            OP,
            self.timeouts.bigquery,
            ErrorKind::UpstreamTimeout,
            bigquery.search_by_assignee(name, &query),
        )
        .await
    }

    pub async fn google_search_by_cpc(&self, request: CpcSearchRequest) -> Result<SearchResult, ToolError> {
        const OP: &str = "google_search_by_cpc";
        let code = require_text(Some(&request.cpc_code), "cpc_code").map_err(|e| ToolError::invalid(OP, e))?;
        let code = code.to_uppercase().replace(' ', "");
        let query = google_query("", &request.scope).map_err(|e| ToolError::invalid(OP, e))?;
        let bigquery = self.bigquery(OP)?;
        self.call(
            SourceTag::BigQuery,
            OP,
            self.timeouts.bigquery,
            ErrorKind::UpstreamTimeout,
            bigquery.search_by_cpc(&code, &query),
        )
        .await
    }

    pub async fn google_get_patent(&self, request: PublicationRequest) -> Result<PatentRecord, ToolError> {
        const OP: &str = "google_get_patent";
        let number = normalize_publication_number(&request.publication_number).map_err(|e| ToolError::invalid(OP, e))?;
        let bigquery = self.bigquery(OP)?;
        self.call(
            SourceTag::BigQuery,
            OP,
            self.timeouts.bigquery,
            ErrorKind::UpstreamTimeout,
            bigquery.get_detail(&DetailRequest::new(number)),
        )
        .await
    }

    pub async fn google_get_patent_claims(&self, request: PublicationRequest) -> Result<PatentRecord, ToolError> {
        const OP: &str = "google_get_patent_claims";
        let number = normalize_publication_number(&request.publication_number).map_err(|e| ToolError::invalid(OP, e))?;
        let bigquery = self.bigquery(OP)?;
        self.call(
            SourceTag::BigQuery,
            OP,
            self.timeouts.bigquery,
            ErrorKind::UpstreamTimeout,
            bigquery.get_claims(&number),
        )
        .await
    }

    pub async fn google_get_patent_description(&self, request: PublicationRequest) -> Result<PatentRecord, ToolError> {
        const OP: &str = "google_get_patent_description";
        let number = normalize_publication_number(&request.publication_number).map_err(|e| ToolError::invalid(OP, e))?;
        let bigquery = self.bigquery(OP)?;
        self.call(
            SourceTag::BigQuery,
            OP,
            self.timeouts.bigquery,
            ErrorKind::UpstreamTimeout,
            bigquery.get_description(&number),
        )
        .await
    }
}

fn ppubs_query(collection: Collection, request: &PpubsSearchRequest) -> Result<SearchQuery, ValidationError> {
    let text = require_text(Some(&request.query), "query")?;
    let limit = validate_limit(request.limit.unwrap_or(PPUBS_DEFAULT_LIMIT), PPUBS_MAX_LIMIT)?;
    let mut query = SearchQuery::new(text)
        .offset(request.start)
        .limit(limit)
        .collection(collection);

    if let Some(sort) = request.sort.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query.ppubs.sort = sort.to_string();
    }
    if let Some(op) = request.default_operator.as_deref() {
        query.ppubs.default_operator = DefaultOperator::parse(op).ok_or_else(|| ValidationError::InvalidValue {
            field: "default_operator",
            reason: format!("expected AND or OR, got {:?}", op),
        })?;
    }
    if let Some(plurals) = request.expand_plurals {
        query.ppubs.expand_plurals = plurals;
    }
    if let Some(british) = request.british_equivalents {
        query.ppubs.british_equivalents = british;
    }
    Ok(query)
}

fn collection_arg(value: Option<&str>) -> Result<Collection, ValidationError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(Collection::Patents),
        Some(v) => Collection::parse(v).ok_or_else(|| ValidationError::InvalidValue {
            field: "source_type",
            reason: format!("expected USPAT or US-PGPUB, got {:?}", v),
        }),
    }
}

fn download_format(value: Option<&str>) -> Result<DownloadFormat, ValidationError> {
    match value {
        None => Ok(DownloadFormat::default()),
        Some(v) => DownloadFormat::parse(v).ok_or_else(|| ValidationError::InvalidValue {
            field: "format",
            reason: format!("expected json or csv, got {:?}", v),
        }),
    }
}

/// Build the BigQuery query shared by the Google search operations
fn google_query(text: &str, scope: &GoogleScope) -> Result<SearchQuery, ValidationError> {
    let country = validate_country(scope.country.as_deref().unwrap_or("US"))?;
    let limit = validate_limit(scope.limit.unwrap_or(GOOGLE_DEFAULT_LIMIT), BIGQUERY_MAX_LIMIT)?;

    let start = scope.start_date.as_ref().map(|d| parse_date(&d.as_text())).transpose()?;
    let end = scope.end_date.as_ref().map(|d| parse_date(&d.as_text())).transpose()?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(ValidationError::InvertedDateRange { start, end });
        }
    }

    Ok(SearchQuery::new(text)
        .country(country)
        .limit(limit)
        .offset(scope.offset.unwrap_or(0))
        .date_range(start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BigQueryConfig, Credential, OdpConfig, PpubsConfig, RetrySettings};
    use crate::sources::{PpubsSource, StaticTokenSource};
    use crate::utils::HttpClient;
    use mockito::{Matcher, Server, ServerGuard};
    use std::io::Write;

    fn retry() -> RetrySettings {
        RetrySettings {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        }
    }

    fn service(server: &ServerGuard, with_optional: bool, timeouts: Timeouts) -> PatentService {
        let http = HttpClient::new().unwrap();
        let ppubs = PpubsConfig {
            base_url: server.url(),
            ..Default::default()
        };
        let ppubs = Arc::new(PpubsSource::with_client(http.clone(), &ppubs, &retry()));

        let (odp, bigquery) = if with_optional {
            let odp = OdpConfig {
                base_url: server.url(),
                ..Default::default()
            };
            let bigquery = BigQueryConfig {
                base_url: server.url(),
                ..Default::default()
            };
            (
                Some(Arc::new(OdpSource::with_client(
                    http.clone(),
                    &odp,
                    &retry(),
                    Credential::ApiKey("key".to_string()),
                ))),
                Some(Arc::new(
                    BigQuerySource::with_client(
                        http,
                        &bigquery,
                        &retry(),
                        "test-project".to_string(),
                        Arc::new(StaticTokenSource::new("token")),
                    )
                    .unwrap(),
                )),
            )
        } else {
            (None, None)
        };

        PatentService::with_timeouts(Arc::new(SourceRegistry::from_parts(ppubs, odp, bigquery)), timeouts)
    }

    /// Fails the test if anything reaches the upstream
    async fn no_traffic(server: &mut ServerGuard) -> Vec<mockito::Mock> {
        let mut guards = Vec::new();
        for method in ["GET", "POST"] {
            guards.push(
                server
                    .mock(method, Matcher::Any)
                    .match_query(Matcher::Any)
                    .with_status(500)
                    .expect(0)
                    .create_async()
                    .await,
            );
        }
        guards
    }

    #[tokio::test]
    async fn test_limits_are_checked_before_dispatch() {
        let mut server = Server::new_async().await;
        let guards = no_traffic(&mut server).await;
        let service = service(&server, true, Timeouts::default());

        let mut ppubs = PpubsSearchRequest::new("widget");
        ppubs.limit = Some(501);
        let err = service.ppubs_search_patents(ppubs).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let odp = OdpSearchParams {
            limit: 101,
            ..OdpSearchParams::query("widget")
        };
        let err = service.search_applications(odp).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert_eq!(err.operation, "search_applications");

        let google = GoogleSearchRequest {
            query: "widget".into(),
            scope: GoogleScope {
                limit: Some(501),
                ..Default::default()
            },
        };
        let err = service.google_search_patents(google).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        for guard in guards {
            guard.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_malformed_arguments_never_leave_the_process() {
        let mut server = Server::new_async().await;
        let guards = no_traffic(&mut server).await;
        let service = service(&server, true, Timeouts::default());

        let cases = vec![
            service
                .ppubs_get_patent_by_number(PatentNumberRequest::new("not a number"))
                .await,
            service
                .ppubs_get_full_document(DocumentRequest {
                    guid: "../etc/passwd".into(),
                    source_type: None,
                })
                .await,
            service
                .google_get_patent(PublicationRequest::new("???"))
                .await,
        ];
        for result in cases {
            assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidRequest);
        }

        let err = service
            .get_app_metadata(ApplicationRequest::new("12"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let err = service
            .google_search_by_inventor(InventorSearchRequest {
                inventor_name: "Jane Doe".into(),
                scope: GoogleScope {
                    country: Some("XX".into()),
                    ..Default::default()
                },
            })
            .await
            .unwrap_err();
        assert!(err.message.contains("country"));

        let err = service
            .download_applications(ApplicationDownloadRequest {
                format: Some("xml".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        for guard in guards {
            guard.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_optional_adapters_report_unavailable() {
        let server = Server::new_async().await;
        let service = service(&server, false, Timeouts::default());

        let err = service
            .get_app_metadata(ApplicationRequest::new("14412875"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AdapterUnavailable);
        assert_eq!(err.adapter, Some(SourceTag::Odp));

        let err = service
            .google_get_patent(PublicationRequest::new("US10000000B2"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AdapterUnavailable);
        assert_eq!(err.to_value()["source"], "bigquery");
    }

    #[tokio::test]
    async fn test_slow_upstream_is_upstream_timeout() {
        let mut server = Server::new_async().await;
        let _slow = server
            .mock("GET", "/api/v1/patent/applications/14412875/meta-data")
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(500));
                w.write_all(b"{}")
            })
            .create_async()
            .await;

        let timeouts = Timeouts {
            odp: Duration::from_millis(50),
            ..Timeouts::default()
        };
        let service = service(&server, true, timeouts);
        let err = service
            .get_app_metadata(ApplicationRequest::new("14412875"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamTimeout);
        assert_eq!(err.operation, "get_app_metadata");
    }

    #[tokio::test]
    async fn test_pdf_lookup_phase_is_search_timeout() {
        let mut server = Server::new_async().await;
        let _slow_landing = server
            .mock("GET", "/pubwebapp/")
            .with_status(200)
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(500));
                w.write_all(b"<html></html>")
            })
            .create_async()
            .await;

        let timeouts = Timeouts {
            ppubs_search: Duration::from_millis(50),
            ..Timeouts::default()
        };
        let service = service(&server, false, timeouts);
        let err = service
            .ppubs_download_patent_pdf(PatentNumberRequest::new("US10000000B2"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::SearchTimeout);
        assert_eq!(err.operation, "ppubs_download_patent_pdf");
    }

    #[test]
    fn test_google_query_scope() {
        let scope = GoogleScope {
            country: Some("ep".into()),
            limit: Some(10),
            offset: Some(20),
            start_date: Some(TextOrNumber::Number(20220101)),
            end_date: Some("2025-12-31".into()),
        };
        let query = google_query("widget", &scope).unwrap();
        assert_eq!(query.filters.country.as_deref(), Some("EP"));
        assert_eq!(query.limit, 10);
        assert_eq!(query.offset, 20);
        let range = query.filters.date_range.unwrap();
        assert_eq!(range.start, chrono::NaiveDate::from_ymd_opt(2022, 1, 1));

        let inverted = GoogleScope {
            start_date: Some(TextOrNumber::Number(20250101)),
            end_date: Some(TextOrNumber::Number(20220101)),
            ..Default::default()
        };
        assert!(matches!(
            google_query("widget", &inverted),
            Err(ValidationError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn test_ppubs_query_options() {
        let request = PpubsSearchRequest {
            query: "widget".into(),
            start: 50,
            limit: None,
            sort: Some("date_publ asc".into()),
            default_operator: Some("and".into()),
            expand_plurals: Some(false),
            british_equivalents: None,
        };
        let query = ppubs_query(Collection::Applications, &request).unwrap();
        assert_eq!(query.limit, 100);
        assert_eq!(query.offset, 50);
        assert_eq!(query.ppubs.collection, Collection::Applications);
        assert_eq!(query.ppubs.default_operator, DefaultOperator::And);
        assert!(!query.ppubs.expand_plurals);
        assert!(query.ppubs.british_equivalents);

        let bad = PpubsSearchRequest {
            default_operator: Some("XOR".into()),
            ..PpubsSearchRequest::new("widget")
        };
        assert!(ppubs_query(Collection::Patents, &bad).is_err());
    }
}
