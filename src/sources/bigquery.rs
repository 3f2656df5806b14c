//! Google Patents public dataset, queried through the BigQuery REST API.
//!
//! Every query is standard SQL with named parameters; user input never ends
//! up in the SQL text. Authentication is an OAuth2 bearer token minted from
//! a service-account key, or fetched from the GCE metadata server when no
//! key file is configured.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{ensure_limit, DetailRequest, Source, SourceCapabilities, SourceError};
use crate::config::{BigQueryConfig, RetrySettings};
use crate::models::{PatentRecord, SearchQuery, SearchResult, SourceTag};
use crate::normalize::{bigquery_record, decode_rows, normalize_batch};
use crate::utils::{check_status, poll_until, with_retry, AuthFailure, HttpClient, PollPolicy, PollStatus, RetryConfig};

/// Largest page a single query returns
pub const BIGQUERY_MAX_LIMIT: u32 = 500;

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Assertions are valid for one hour, the maximum Google accepts
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Publication date bounds used when only one end of a range is given
const DATE_FLOOR: i64 = 0;
const DATE_CEILING: i64 = 99_991_231;

/// A bearer token and the instant it stops being accepted
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Instant::now() + lifetime,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Usable for at least the refresh margin
    pub fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Where BigQuery bearer tokens come from
#[async_trait]
pub trait AccessTokenSource: Send + Sync + std::fmt::Debug {
    async fn fetch(&self, http: &HttpClient) -> Result<AccessToken, SourceError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

impl TokenResponse {
    fn into_token(self) -> AccessToken {
        AccessToken::new(self.access_token, Duration::from_secs(self.expires_in))
    }
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Mints tokens from a service-account key file with the JWT bearer grant.
///
/// The key file is read on every fetch, which only happens when the cached
/// token is about to expire. A missing or unreadable key surfaces as an
/// invalid credential at query time, not at startup.
#[derive(Debug, Clone)]
pub struct ServiceAccountTokenSource {
    key_path: PathBuf,
}

impl ServiceAccountTokenSource {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
        }
    }

    async fn load_key(&self) -> Result<ServiceAccountKey, SourceError> {
        let raw = tokio::fs::read_to_string(&self.key_path).await.map_err(|e| {
            SourceError::InvalidCredential(format!(
                "cannot read service account key {}: {}",
                self.key_path.display(),
                e
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            SourceError::InvalidCredential(format!(
                "malformed service account key {}: {}",
                self.key_path.display(),
                e
            ))
        })
    }

    fn assertion(key: &ServiceAccountKey, issued_at: i64) -> Result<String, SourceError> {
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: BIGQUERY_SCOPE,
            aud: &key.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| SourceError::InvalidCredential(format!("unusable private key: {}", e)))?;
        encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
            .map_err(|e| SourceError::InvalidCredential(format!("cannot sign assertion: {}", e)))
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn fetch(&self, http: &HttpClient) -> Result<AccessToken, SourceError> {
        let key = self.load_key().await?;
        let assertion = Self::assertion(&key, Utc::now().timestamp())?;
        tracing::debug!("Exchanging service account assertion for {}", key.client_email);

        let response = http
            .client()
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        // The token endpoint answers a bad grant with 400
        let response = check_status(response, AuthFailure::InvalidCredential)
            .await
            .map_err(|e| match e {
                SourceError::Client { status, message } => SourceError::InvalidCredential(format!(
                    "token endpoint rejected assertion ({}): {}",
                    status, message
                )),
                other => other,
            })?;
        Ok(response.json::<TokenResponse>().await?.into_token())
    }
}

/// Fetches tokens for the attached service account from the GCE metadata server
#[derive(Debug, Clone)]
pub struct MetadataTokenSource {
    url: String,
}

impl MetadataTokenSource {
    pub fn new() -> Self {
        Self::with_url(METADATA_TOKEN_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Default for MetadataTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccessTokenSource for MetadataTokenSource {
    async fn fetch(&self, http: &HttpClient) -> Result<AccessToken, SourceError> {
        let response = http
            .client()
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .query(&[("scopes", BIGQUERY_SCOPE)])
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| {
                SourceError::InvalidCredential(format!(
                    "no service account key configured and the metadata server is unreachable: {}",
                    e
                ))
            })?;
        let response = check_status(response, AuthFailure::InvalidCredential).await?;
        Ok(response.json::<TokenResponse>().await?.into_token())
    }
}

/// A fixed token, for tests and for callers that manage tokens themselves
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn fetch(&self, _http: &HttpClient) -> Result<AccessToken, SourceError> {
        Ok(AccessToken::new(self.token.clone(), Duration::from_secs(86_400)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ParamValue {
    String(String),
    Int64(i64),
}

#[derive(Debug, Clone, PartialEq)]
struct QueryParam {
    name: &'static str,
    value: ParamValue,
}

impl QueryParam {
    fn string(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: ParamValue::String(value.into()),
        }
    }

    fn int64(name: &'static str, value: i64) -> Self {
        Self {
            name,
            value: ParamValue::Int64(value),
        }
    }

    fn to_json(&self) -> Value {
        let (kind, value) = match &self.value {
            ParamValue::String(s) => ("STRING", s.clone()),
            ParamValue::Int64(n) => ("INT64", n.to_string()),
        };
        json!({
            "name": self.name,
            "parameterType": {"type": kind},
            "parameterValue": {"value": value}
        })
    }
}

/// SQL text plus its bound parameters
#[derive(Debug, Clone, PartialEq)]
struct SqlQuery {
    sql: String,
    params: Vec<QueryParam>,
}

const SUMMARY_COLUMNS: &str = "\
publication_number,
  application_number,
  country_code,
  kind_code,
  (SELECT t.text FROM UNNEST(title_localized) AS t WHERE t.language = 'en' LIMIT 1) AS title,
  (SELECT a.text FROM UNNEST(abstract_localized) AS a WHERE a.language = 'en' LIMIT 1) AS abstract,
  ARRAY(SELECT i.name FROM UNNEST(inventor_harmonized) AS i) AS inventors,
  ARRAY(SELECT a.name FROM UNNEST(assignee_harmonized) AS a) AS assignees,
  filing_date,
  publication_date,
  grant_date,
  ARRAY(SELECT c.code FROM UNNEST(cpc) AS c) AS cpc_codes";

const TITLE_COLUMN: &str =
    "(SELECT t.text FROM UNNEST(title_localized) AS t WHERE t.language = 'en' LIMIT 1) AS title";
const CLAIMS_COLUMN: &str =
    "(SELECT c.text FROM UNNEST(claims_localized) AS c WHERE c.language = 'en' LIMIT 1) AS claims";
const DESCRIPTION_COLUMN: &str =
    "(SELECT d.text FROM UNNEST(description_localized) AS d WHERE d.language = 'en' LIMIT 1) AS description";

/// Which columns a single-publication lookup selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    Full,
    Claims,
    Description,
}

impl Projection {
    fn columns(&self) -> String {
        match self {
            Projection::Full => format!("{},\n  {},\n  {}", SUMMARY_COLUMNS, CLAIMS_COLUMN, DESCRIPTION_COLUMN),
            Projection::Claims => format!("publication_number,\n  {},\n  {}", TITLE_COLUMN, CLAIMS_COLUMN),
            Projection::Description => {
                format!("publication_number,\n  {},\n  {}", TITLE_COLUMN, DESCRIPTION_COLUMN)
            }
        }
    }
}

fn yyyymmdd(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

/// Build the search statement for a query.
///
/// Free text is matched against titles and abstracts; inventor, assignee and
/// CPC filters each add a predicate. At least one of them must be present.
fn search_sql(table: &str, query: &SearchQuery) -> Result<SqlQuery, SourceError> {
    let filters = &query.filters;
    let country = filters.country.as_deref().unwrap_or("US");

    let mut predicates = vec!["country_code = @country"];
    let mut params = vec![QueryParam::string("country", country)];

    let text = query.query.trim();
    if !text.is_empty() {
        predicates.push(
            "(EXISTS (SELECT 1 FROM UNNEST(title_localized) AS t WHERE CONTAINS_SUBSTR(t.text, @query))\n    \
             OR EXISTS (SELECT 1 FROM UNNEST(abstract_localized) AS a WHERE CONTAINS_SUBSTR(a.text, @query)))",
        );
        params.push(QueryParam::string("query", text));
    }
    if let Some(inventor) = filters.inventor.as_deref() {
        predicates.push("EXISTS (SELECT 1 FROM UNNEST(inventor_harmonized) AS i WHERE CONTAINS_SUBSTR(i.name, @inventor))");
        params.push(QueryParam::string("inventor", inventor));
    }
    if let Some(assignee) = filters.assignee.as_deref() {
        predicates.push("EXISTS (SELECT 1 FROM UNNEST(assignee_harmonized) AS a WHERE CONTAINS_SUBSTR(a.name, @assignee))");
        params.push(QueryParam::string("assignee", assignee));
    }
    if let Some(code) = filters.classification.as_deref() {
        predicates.push("EXISTS (SELECT 1 FROM UNNEST(cpc) AS c WHERE STARTS_WITH(c.code, @cpc))");
        params.push(QueryParam::string("cpc", code));
    }
    if params.len() == 1 {
        return Err(SourceError::InvalidRequest(
            "a search needs query text or an inventor, assignee or CPC filter".to_string(),
        ));
    }

    if let Some(range) = filters.date_range {
        predicates.push("publication_date BETWEEN @start_date AND @end_date");
        params.push(QueryParam::int64("start_date", range.start.map_or(DATE_FLOOR, yyyymmdd)));
        params.push(QueryParam::int64("end_date", range.end.map_or(DATE_CEILING, yyyymmdd)));
    }

    params.push(QueryParam::int64("limit", i64::from(query.limit)));
    params.push(QueryParam::int64("offset", i64::try_from(query.offset).unwrap_or(i64::MAX)));

    let sql = format!(
        "SELECT\n  {}\nFROM `{}`\nWHERE {}\nORDER BY publication_date DESC\nLIMIT @limit OFFSET @offset",
        SUMMARY_COLUMNS,
        table,
        predicates.join("\n  AND ")
    );
    Ok(SqlQuery { sql, params })
}

fn lookup_sql(table: &str, projection: Projection, publication_number: &str) -> SqlQuery {
    SqlQuery {
        sql: format!(
            "SELECT\n  {}\nFROM `{}`\nWHERE publication_number = @publication_number\nLIMIT @limit OFFSET @offset",
            projection.columns(),
            table
        ),
        params: vec![
            QueryParam::string("publication_number", publication_number),
            QueryParam::int64("limit", 1),
            QueryParam::int64("offset", 0),
        ],
    }
}

/// Project and dataset names are spliced into SQL, so keep them to table-name characters
fn validate_table(table: &str) -> Result<(), SourceError> {
    let valid = !table.is_empty()
        && table.split('.').count() == 3
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SourceError::InvalidRequest(format!(
            "dataset must be a fully qualified table (project.dataset.table), got {:?}",
            table
        )))
    }
}

fn job_complete(body: &Value) -> bool {
    body.get("jobComplete").and_then(Value::as_bool).unwrap_or(false)
}

/// Google Patents public data on BigQuery
#[derive(Debug)]
pub struct BigQuerySource {
    http: HttpClient,
    base_url: String,
    project_id: String,
    table: String,
    query_timeout_ms: u64,
    maximum_bytes_billed: Option<u64>,
    request_timeout: Duration,
    tokens: Arc<dyn AccessTokenSource>,
    cached_token: Mutex<Option<AccessToken>>,
    retry: RetryConfig,
    poll: PollPolicy,
}

impl BigQuerySource {
    pub fn new(
        config: &BigQueryConfig,
        retry: &RetrySettings,
        project_id: String,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, SourceError> {
        Self::with_client(HttpClient::new()?, config, retry, project_id, tokens)
    }

    pub fn with_client(
        http: HttpClient,
        config: &BigQueryConfig,
        retry: &RetrySettings,
        project_id: String,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, SourceError> {
        validate_table(&config.dataset)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project_id,
            table: config.dataset.clone(),
            query_timeout_ms: config.query_timeout_ms,
            maximum_bytes_billed: config.maximum_bytes_billed,
            request_timeout: config.timeout(),
            tokens,
            cached_token: Mutex::new(None),
            retry: retry.retry_config(),
            poll: PollPolicy {
                max_attempts: 30,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(4),
                max_total_wait: config.timeout(),
            },
        })
    }

    /// Override how long an incomplete job is polled
    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// A fresh bearer token, fetched at most once per expiry
    async fn access_token(&self) -> Result<String, SourceError> {
        let mut cached = self.cached_token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value().to_string());
        }
        let token = self.tokens.fetch(&self.http).await?;
        let value = token.value().to_string();
        *cached = Some(token);
        Ok(value)
    }

    async fn send_json<F>(&self, build: F) -> Result<Value, SourceError>
    where
        F: Fn() -> RequestBuilder,
    {
        let this = self;
        let build = &build;
        with_retry(self.retry, move || async move {
            let token = this.access_token().await?;
            let response = build()
                .bearer_auth(token)
                .timeout(this.request_timeout)
                .send()
                .await?;
            let response = check_status(response, AuthFailure::InvalidCredential).await?;
            Ok(response.json::<Value>().await?)
        })
        .await
    }

    fn request_body(&self, query: &SqlQuery) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), Value::from(query.sql.as_str()));
        body.insert("useLegacySql".to_string(), Value::Bool(false));
        body.insert("parameterMode".to_string(), Value::from("NAMED"));
        body.insert(
            "queryParameters".to_string(),
            Value::Array(query.params.iter().map(QueryParam::to_json).collect()),
        );
        body.insert("timeoutMs".to_string(), Value::from(self.query_timeout_ms));
        if let Some(bytes) = self.maximum_bytes_billed {
            // int64 fields travel as strings in the REST API
            body.insert("maximumBytesBilled".to_string(), Value::from(bytes.to_string()));
        }
        Value::Object(body)
    }

    /// Run a statement and return its rows as plain JSON objects
    async fn run(&self, query: &SqlQuery) -> Result<Vec<Value>, SourceError> {
        let url = format!(
            "{}/projects/{}/queries",
            self.base_url,
            urlencoding::encode(&self.project_id)
        );
        let body = self.request_body(query);
        tracing::debug!("BigQuery query with {} parameter(s)", query.params.len());

        let response = self.send_json(|| self.http.client().post(&url).json(&body)).await?;
        let response = if job_complete(&response) {
            response
        } else {
            self.wait_for_job(&response).await?
        };

        let schema = response.get("schema").unwrap_or(&Value::Null);
        let rows = response
            .get("rows")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(decode_rows(schema, rows))
    }

    async fn wait_for_job(&self, pending: &Value) -> Result<Value, SourceError> {
        let job_id = pending
            .pointer("/jobReference/jobId")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Parse("incomplete query without a job reference".to_string()))?;
        tracing::debug!("BigQuery job {} still running, polling", job_id);

        let url = format!(
            "{}/projects/{}/queries/{}",
            self.base_url,
            urlencoding::encode(&self.project_id),
            urlencoding::encode(job_id)
        );
        let mut pairs = vec![("timeoutMs", self.query_timeout_ms.to_string())];
        if let Some(location) = pending.pointer("/jobReference/location").and_then(Value::as_str) {
            pairs.push(("location", location.to_string()));
        }

        let this = self;
        let url = &url;
        let pairs = &pairs;
        let polled = poll_until(&self.poll, move |_| async move {
            let body = this.send_json(|| this.http.client().get(url).query(pairs)).await?;
            Ok(if job_complete(&body) {
                PollStatus::Ready(body)
            } else {
                PollStatus::Pending
            })
        })
        .await
        .map_err(|e| match e {
            SourceError::SearchTimeout { attempts, waited } => SourceError::Timeout(format!(
                "BigQuery job {} not complete after {} poll(s) ({:?})",
                job_id, attempts, waited
            )),
            other => other,
        })?;
        Ok(polled.value)
    }

    async fn lookup(&self, projection: Projection, publication_number: &str) -> Result<PatentRecord, SourceError> {
        let rows = self
            .run(&lookup_sql(&self.table, projection, publication_number))
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| SourceError::NotFound(format!("publication {}", publication_number)))?;
        bigquery_record(row).map_err(|e| SourceError::Parse(e.to_string()))
    }

    /// Title and abstract search
    pub async fn search_patents(&self, query: &SearchQuery) -> Result<SearchResult, SourceError> {
        ensure_limit(query, BIGQUERY_MAX_LIMIT)?;
        let sql = search_sql(&self.table, query)?;
        let rows = self.run(&sql).await?;

        let batch = normalize_batch(SourceTag::BigQuery, &rows, bigquery_record);
        let mut result = SearchResult::new(SourceTag::BigQuery, batch.records);
        result.dropped = batch.dropped;
        result.next_cursor = query.cursor().next(rows.len(), None);
        Ok(result)
    }

    pub async fn search_by_inventor(&self, inventor: &str, query: &SearchQuery) -> Result<SearchResult, SourceError> {
        let query = SearchQuery {
            query: String::new(),
            ..query.clone()
        }
        .inventor(inventor);
        self.search_patents(&query).await
    }

    pub async fn search_by_assignee(&self, assignee: &str, query: &SearchQuery) -> Result<SearchResult, SourceError> {
        let query = SearchQuery {
            query: String::new(),
            ..query.clone()
        }
        .assignee(assignee);
        self.search_patents(&query).await
    }

    pub async fn search_by_cpc(&self, cpc_code: &str, query: &SearchQuery) -> Result<SearchResult, SourceError> {
        let query = SearchQuery {
            query: String::new(),
            ..query.clone()
        }
        .classification(cpc_code);
        self.search_patents(&query).await
    }

    /// Full record including claims and description
    pub async fn get_patent(&self, publication_number: &str) -> Result<PatentRecord, SourceError> {
        self.lookup(Projection::Full, publication_number).await
    }

    pub async fn get_claims(&self, publication_number: &str) -> Result<PatentRecord, SourceError> {
        self.lookup(Projection::Claims, publication_number).await
    }

    pub async fn get_description(&self, publication_number: &str) -> Result<PatentRecord, SourceError> {
        self.lookup(Projection::Description, publication_number).await
    }
}

#[async_trait]
impl Source for BigQuerySource {
    fn id(&self) -> &str {
        SourceTag::BigQuery.id()
    }

    fn name(&self) -> &str {
        SourceTag::BigQuery.name()
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
            | SourceCapabilities::DETAIL
            | SourceCapabilities::CLAIMS
            | SourceCapabilities::DESCRIPTION
            | SourceCapabilities::INVENTOR_SEARCH
            | SourceCapabilities::ASSIGNEE_SEARCH
            | SourceCapabilities::CPC_SEARCH
    }

    fn max_limit(&self) -> u32 {
        BIGQUERY_MAX_LIMIT
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResult, SourceError> {
        self.search_patents(query).await
    }

    async fn get_detail(&self, request: &DetailRequest) -> Result<PatentRecord, SourceError> {
        self.get_patent(&request.identifier).await
    }
}
