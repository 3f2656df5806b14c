//! USPTO Open Data Portal source implementation.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{Source, SourceCapabilities, SourceError};
use crate::config::{Credential, OdpConfig, RetrySettings};
use crate::models::{Artifact, OdpDocument, SearchQuery, SearchResult, SourceTag};
use crate::normalize::odp_records;
use crate::utils::{apply_credential, check_status, with_retry, AuthFailure, HttpClient, RetryConfig};

/// Largest page the search endpoints serve
pub const ODP_MAX_LIMIT: u32 = 100;

const APPLICATIONS_PATH: &str = "/api/v1/patent/applications";
const STATUS_CODES_PATH: &str = "/api/v1/patent/status-codes";
const DATASETS_PATH: &str = "/api/v1/datasets/products";

/// Per-application endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OdpOperation {
    Application,
    MetaData,
    Adjustment,
    Assignment,
    Attorney,
    Continuity,
    ForeignPriority,
    Transactions,
    Documents,
    AssociatedDocuments,
}

impl OdpOperation {
    pub const ALL: [OdpOperation; 10] = [
        OdpOperation::Application,
        OdpOperation::MetaData,
        OdpOperation::Adjustment,
        OdpOperation::Assignment,
        OdpOperation::Attorney,
        OdpOperation::Continuity,
        OdpOperation::ForeignPriority,
        OdpOperation::Transactions,
        OdpOperation::Documents,
        OdpOperation::AssociatedDocuments,
    ];

    /// Path segment after the application number
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            OdpOperation::Application => None,
            OdpOperation::MetaData => Some("meta-data"),
            OdpOperation::Adjustment => Some("adjustment"),
            OdpOperation::Assignment => Some("assignment"),
            OdpOperation::Attorney => Some("attorney"),
            OdpOperation::Continuity => Some("continuity"),
            OdpOperation::ForeignPriority => Some("foreign-priority"),
            OdpOperation::Transactions => Some("transactions"),
            OdpOperation::Documents => Some("documents"),
            OdpOperation::AssociatedDocuments => Some("associated-documents"),
        }
    }

    /// Name of the tool that exposes this endpoint
    pub fn operation_name(&self) -> &'static str {
        match self {
            OdpOperation::Application => "get_app",
            OdpOperation::MetaData => "get_app_metadata",
            OdpOperation::Adjustment => "get_app_adjustment",
            OdpOperation::Assignment => "get_app_assignment",
            OdpOperation::Attorney => "get_app_attorney",
            OdpOperation::Continuity => "get_app_continuity",
            OdpOperation::ForeignPriority => "get_app_foreign_priority",
            OdpOperation::Transactions => "get_app_transactions",
            OdpOperation::Documents => "get_app_documents",
            OdpOperation::AssociatedDocuments => "get_app_associated_documents",
        }
    }

    pub fn from_operation_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.operation_name() == name)
    }

    fn path(&self, application_number: &str) -> String {
        let number = urlencoding::encode(application_number);
        match self.suffix() {
            Some(suffix) => format!("{}/{}/{}", APPLICATIONS_PATH, number, suffix),
            None => format!("{}/{}", APPLICATIONS_PATH, number),
        }
    }
}

/// Export format of the bulk download endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    #[default]
    Json,
    Csv,
}

impl DownloadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadFormat::Json => "json",
            DownloadFormat::Csv => "csv",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "json" => Some(DownloadFormat::Json),
            "csv" => Some(DownloadFormat::Csv),
            _ => None,
        }
    }

    fn content_type(&self) -> &'static str {
        match self {
            DownloadFormat::Json => "application/json",
            DownloadFormat::Csv => "text/csv",
        }
    }
}

/// Parameters of the application search endpoints
///
/// The GET form takes the `String` filters in the endpoint's query syntax;
/// the POST form takes the structured `*_list` variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdpSearchParams {
    pub q: Option<String>,
    pub sort: Option<String>,
    pub offset: u64,
    pub limit: u32,
    pub facets: Option<String>,
    pub fields: Option<String>,
    pub filters: Option<String>,
    pub range_filters: Option<String>,
    pub filters_list: Option<Vec<Value>>,
    pub range_filters_list: Option<Vec<Value>>,
    pub sort_list: Option<Vec<Value>>,
    pub fields_list: Option<Vec<String>>,
    pub facets_list: Option<Vec<String>>,
}

impl Default for OdpSearchParams {
    fn default() -> Self {
        Self {
            q: None,
            sort: None,
            offset: 0,
            limit: 25,
            facets: None,
            fields: None,
            filters: None,
            range_filters: None,
            filters_list: None,
            range_filters_list: None,
            sort_list: None,
            fields_list: None,
            facets_list: None,
        }
    }
}

impl OdpSearchParams {
    pub fn query(q: impl Into<String>) -> Self {
        Self {
            q: Some(q.into()),
            ..Default::default()
        }
    }

    fn query_pairs(&self, with_facets: bool) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "q", &self.q);
        push_opt(&mut pairs, "sort", &self.sort);
        pairs.push(("offset", self.offset.to_string()));
        pairs.push(("limit", self.limit.to_string()));
        if with_facets {
            push_opt(&mut pairs, "facets", &self.facets);
        }
        push_opt(&mut pairs, "fields", &self.fields);
        push_opt(&mut pairs, "filters", &self.filters);
        push_opt(&mut pairs, "rangeFilters", &self.range_filters);
        pairs
    }

    fn post_body(&self, with_facets: bool) -> Map<String, Value> {
        let mut body = Map::new();
        insert_opt(&mut body, "q", &self.q);
        insert_opt(&mut body, "filters", &self.filters_list);
        insert_opt(&mut body, "rangeFilters", &self.range_filters_list);
        insert_opt(&mut body, "sort", &self.sort_list);
        insert_opt(&mut body, "fields", &self.fields_list);
        if with_facets {
            insert_opt(&mut body, "facets", &self.facets_list);
        }
        body.insert(
            "pagination".to_string(),
            json!({"offset": self.offset, "limit": self.limit}),
        );
        body
    }

    fn cursor_query(&self) -> SearchQuery {
        SearchQuery::new(self.q.clone().unwrap_or_default())
            .offset(self.offset)
            .limit(self.limit)
    }
}

/// Parameters of the bulk dataset endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetParams {
    pub q: Option<String>,
    pub product_title: Option<String>,
    pub product_description: Option<String>,
    pub product_short_name: Option<String>,
    pub offset: Option<u64>,
    pub limit: Option<u32>,
    pub facets: Option<String>,
    pub include_files: Option<bool>,
    pub latest: Option<bool>,
    pub labels: Option<String>,
    pub categories: Option<String>,
    pub datasets: Option<String>,
    pub file_types: Option<String>,
    pub file_data_from_date: Option<String>,
    pub file_data_to_date: Option<String>,
}

impl DatasetParams {
    fn search_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "q", &self.q);
        push_opt(&mut pairs, "productTitle", &self.product_title);
        push_opt(&mut pairs, "productDescription", &self.product_description);
        push_opt(&mut pairs, "productShortName", &self.product_short_name);
        push_opt(&mut pairs, "offset", &self.offset);
        push_opt(&mut pairs, "limit", &self.limit);
        push_opt(&mut pairs, "facets", &self.facets);
        push_opt(&mut pairs, "includeFiles", &self.include_files);
        push_opt(&mut pairs, "latest", &self.latest);
        push_opt(&mut pairs, "labels", &self.labels);
        push_opt(&mut pairs, "categories", &self.categories);
        push_opt(&mut pairs, "datasets", &self.datasets);
        push_opt(&mut pairs, "fileTypes", &self.file_types);
        pairs
    }

    fn product_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "fileDataFromDate", &self.file_data_from_date);
        push_opt(&mut pairs, "fileDataToDate", &self.file_data_to_date);
        push_opt(&mut pairs, "offset", &self.offset);
        push_opt(&mut pairs, "limit", &self.limit);
        push_opt(&mut pairs, "includeFiles", &self.include_files);
        push_opt(&mut pairs, "latest", &self.latest);
        pairs
    }
}

fn push_opt<T: ToString>(pairs: &mut Vec<(&'static str, String)>, key: &'static str, value: &Option<T>) {
    if let Some(value) = value {
        pairs.push((key, value.to_string()));
    }
}

fn insert_opt<T: Serialize>(body: &mut Map<String, Value>, key: &str, value: &Option<T>) {
    if let Some(value) = value.as_ref().and_then(|v| serde_json::to_value(v).ok()) {
        body.insert(key.to_string(), value);
    }
}

/// USPTO Open Data Portal source
///
/// Stateless apart from the API key sent with every request. 401/403 means
/// the key was rejected and is reported as an invalid credential.
#[derive(Debug, Clone)]
pub struct OdpSource {
    http: HttpClient,
    base_url: String,
    credential: Credential,
    retry: RetryConfig,
}

impl OdpSource {
    pub fn new(config: &OdpConfig, retry: &RetrySettings, credential: Credential) -> Result<Self, SourceError> {
        Ok(Self::with_client(HttpClient::new()?, config, retry, credential))
    }

    pub fn with_client(
        http: HttpClient,
        config: &OdpConfig,
        retry: &RetrySettings,
        credential: Credential,
    ) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential,
            retry: retry.retry_config(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send with the API key attached, retrying transient failures
    async fn send<F>(&self, build: F) -> Result<Response, SourceError>
    where
        F: Fn() -> RequestBuilder,
    {
        let this = self;
        let build = &build;
        with_retry(self.retry, move || async move {
            let request = apply_credential(build(), &this.credential).header(ACCEPT, "application/json");
            let response = request.send().await?;
            check_status(response, AuthFailure::InvalidCredential).await
        })
        .await
    }

    async fn get_json(&self, path: &str, query: &[(&'static str, String)]) -> Result<Value, SourceError> {
        tracing::debug!("ODP GET {} {:?}", path, query);
        let url = self.url(path);
        let response = self.send(|| self.http.client().get(&url).query(query)).await?;
        Ok(response.json().await?)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, SourceError> {
        tracing::debug!("ODP POST {}", path);
        let url = self.url(path);
        let response = self
            .send(|| {
                self.http
                    .client()
                    .post(&url)
                    .header(CONTENT_TYPE, "application/json")
                    .json(body)
            })
            .await?;
        Ok(response.json().await?)
    }

    /// Call one per-application endpoint
    pub async fn get_application(
        &self,
        operation: OdpOperation,
        application_number: &str,
    ) -> Result<OdpDocument, SourceError> {
        let body = self.get_json(&operation.path(application_number), &[]).await?;
        let record = odp_records(&body).records.into_iter().next();

        Ok(OdpDocument {
            operation: operation.operation_name().to_string(),
            application_number: Some(application_number.to_string()),
            record,
            body,
        })
    }

    /// Application search, GET or POST form
    pub async fn search_applications(
        &self,
        params: &OdpSearchParams,
        post: bool,
    ) -> Result<(SearchResult, Value), SourceError> {
        let path = format!("{}/search", APPLICATIONS_PATH);
        let body = if post {
            self.post_json(&path, &Value::Object(params.post_body(true))).await?
        } else {
            self.get_json(&path, &params.query_pairs(true)).await?
        };

        let batch = odp_records(&body);
        let total = body.get("count").and_then(Value::as_u64);
        let returned = batch.records.len() + batch.dropped;

        let mut result = SearchResult::new(SourceTag::Odp, batch.records);
        result.dropped = batch.dropped;
        result.total = total;
        result.next_cursor = params.cursor_query().cursor().next(returned, total);
        Ok((result, body))
    }

    /// Bulk export of an application search
    pub async fn download_applications(
        &self,
        params: &OdpSearchParams,
        format: DownloadFormat,
        post: bool,
    ) -> Result<Artifact, SourceError> {
        let url = self.url(&format!("{}/search/download", APPLICATIONS_PATH));
        tracing::debug!("ODP download ({}) {}", format.as_str(), url);

        let response = if post {
            let mut body = params.post_body(false);
            body.insert("format".to_string(), Value::from(format.as_str()));
            let body = Value::Object(body);
            self.send(|| self.http.client().post(&url).json(&body)).await?
        } else {
            let mut pairs = params.query_pairs(false);
            pairs.push(("format", format.as_str().to_string()));
            self.send(|| self.http.client().get(&url).query(&pairs)).await?
        };

        let bytes = response.bytes().await?.to_vec();
        Ok(Artifact {
            file_name: format!("applications.{}", format.as_str()),
            content_type: format.content_type().to_string(),
            bytes,
        })
    }

    /// Status code lookup, GET or POST form
    pub async fn status_codes(
        &self,
        q: Option<&str>,
        offset: u64,
        limit: u32,
        post: bool,
    ) -> Result<OdpDocument, SourceError> {
        let body = if post {
            let mut body = Map::new();
            if let Some(q) = q {
                body.insert("q".to_string(), Value::from(q));
            }
            body.insert("pagination".to_string(), json!({"offset": offset, "limit": limit}));
            self.post_json(STATUS_CODES_PATH, &Value::Object(body)).await?
        } else {
            let mut pairs = Vec::new();
            if let Some(q) = q {
                pairs.push(("q", q.to_string()));
            }
            pairs.push(("offset", offset.to_string()));
            pairs.push(("limit", limit.to_string()));
            self.get_json(STATUS_CODES_PATH, &pairs).await?
        };

        Ok(OdpDocument {
            operation: (if post { "get_status_codes_post" } else { "get_status_codes" }).to_string(),
            application_number: None,
            record: None,
            body,
        })
    }

    /// Search the bulk data product catalog
    pub async fn search_datasets(&self, params: &DatasetParams) -> Result<OdpDocument, SourceError> {
        let body = self
            .get_json(&format!("{}/search", DATASETS_PATH), &params.search_pairs())
            .await?;
        Ok(OdpDocument {
            operation: "search_datasets".to_string(),
            application_number: None,
            record: None,
            body,
        })
    }

    /// One bulk data product and its files
    pub async fn get_dataset_product(
        &self,
        product_id: &str,
        params: &DatasetParams,
    ) -> Result<OdpDocument, SourceError> {
        let path = format!("{}/{}", DATASETS_PATH, urlencoding::encode(product_id));
        let body = self.get_json(&path, &params.product_pairs()).await?;
        Ok(OdpDocument {
            operation: "get_dataset_product".to_string(),
            application_number: None,
            record: None,
            body,
        })
    }
}

#[async_trait]
impl Source for OdpSource {
    fn id(&self) -> &str {
        SourceTag::Odp.id()
    }

    fn name(&self) -> &str {
        SourceTag::Odp.name()
    }

    /// Application data only; every ODP operation is an inherent method
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::METADATA
    }

    fn max_limit(&self) -> u32 {
        ODP_MAX_LIMIT
    }
}
