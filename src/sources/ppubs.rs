//! USPTO Patent Public Search (ppubs) source implementation.
//!
//! ppubs is the browser backend of the USPTO search UI. It has no API key:
//! a session is bootstrapped with a handshake, searches are filed under the
//! session's case and answered asynchronously.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{ensure_limit, DetailRequest, Source, SourceCapabilities, SourceError};
use crate::config::{Config, PpubsConfig, RetrySettings};
use crate::models::{Artifact, Collection, PatentRecord, SearchQuery, SearchResult, SourceTag};
use crate::normalize::{normalize_batch, ppubs_record};
use crate::session::{Authenticator, Session, SessionGrant, SessionManager, SessionSettings};
use crate::utils::validate::{parse_us_patent_number, PatentNumber};
use crate::utils::{
    apply_credential, check_status, poll_until, with_retry, AuthFailure, HttpClient, PollPolicy,
    Polled, PollStatus, RetryConfig, ACCESS_TOKEN_HEADER,
};

/// Largest page the search endpoint serves
pub const PPUBS_MAX_LIMIT: u32 = 500;

const LANDING_PATH: &str = "/pubwebapp/";
const SESSION_PATH: &str = "/dirsearch-public/users/me/session";
const COUNTS_PATH: &str = "/dirsearch-public/searches/counts";
const SEARCH_PATH: &str = "/dirsearch-public/searches/searchWithBeFamily";
const PRINT_JOB_PATH: &str = "/dirsearch-public/print/imageviewer";
const PRINT_STATUS_PATH: &str = "/dirsearch-public/print/print-process";
const PRINT_SAVE_PATH: &str = "/dirsearch-public/print/save";

/// Handshake against the ppubs web application
#[derive(Debug, Clone)]
pub struct PpubsAuthenticator {
    http: HttpClient,
    base_url: String,
}

impl PpubsAuthenticator {
    /// The client must be the one the source uses, so the bootstrap cookies
    /// travel with later requests.
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Authenticator for PpubsAuthenticator {
    async fn handshake(&self) -> Result<SessionGrant, SourceError> {
        let client = self.http.client();

        // Landing page sets the cookies the session endpoint expects
        let landing = client
            .get(format!("{}{}", self.base_url, LANDING_PATH))
            .send()
            .await?;
        check_status(landing, AuthFailure::InvalidCredential).await?;

        let response = client
            .post(format!("{}{}", self.base_url, SESSION_PATH))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body("-1")
            .send()
            .await?;
        let response = check_status(response, AuthFailure::InvalidCredential).await?;

        let token = response
            .headers()
            .get(ACCESS_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                SourceError::Authentication("handshake response carried no access token".to_string())
            })?;

        let body: Value = response.json().await?;
        let case_id = body.pointer("/userCase/caseId").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Ok(SessionGrant { token, case_id })
    }
}

/// USPTO Patent Public Search source
///
/// Every request runs inside the shared session. Transient failures are
/// retried per request; a 401/403 ends the session and the whole operation
/// is replayed once under a fresh one.
#[derive(Debug, Clone)]
pub struct PpubsSource {
    http: HttpClient,
    base_url: String,
    session: Arc<SessionManager>,
    retry: RetryConfig,
    poll: PollPolicy,
}

impl PpubsSource {
    /// Create a new ppubs source
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        Ok(Self::with_client(HttpClient::new()?, &config.ppubs, &config.retry))
    }

    /// Create a source on an existing client
    pub fn with_client(http: HttpClient, ppubs: &PpubsConfig, retry: &RetrySettings) -> Self {
        let base_url = ppubs.base_url.trim_end_matches('/').to_string();
        let authenticator = Arc::new(PpubsAuthenticator::new(http.clone(), base_url.clone()));
        let session = Arc::new(SessionManager::new(
            authenticator,
            SessionSettings::from_config(ppubs, retry),
        ));

        Self {
            http,
            base_url,
            session,
            retry: retry.retry_config(),
            poll: ppubs.poll.policy(),
        }
    }

    /// The session this source runs under
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json(&self, session: &Session, path: &str, body: &Value) -> Result<Response, SourceError> {
        let request = self.http.client().post(self.url(path)).json(body);
        let response = apply_credential(request, &session.credential()).send().await?;
        check_status(response, AuthFailure::SessionExpired).await
    }

    async fn get(&self, session: &Session, url: &str) -> Result<Response, SourceError> {
        let request = self.http.client().get(url);
        let response = apply_credential(request, &session.credential()).send().await?;
        check_status(response, AuthFailure::SessionExpired).await
    }

    /// Search request body in the shape the web UI sends
    fn search_payload(query: &SearchQuery, case_id: Option<&str>) -> Value {
        let options = &query.ppubs;
        let case_id = case_id
            .and_then(|id| id.parse::<i64>().ok().map(Value::from))
            .or_else(|| case_id.map(Value::from))
            .unwrap_or(Value::Null);

        json!({
            "start": query.offset,
            "pageCount": query.limit,
            "sort": options.sort,
            "docFamilyFiltering": "familyIdFiltering",
            "searchType": 1,
            "familyIdEnglishOnly": true,
            "familyIdFirstPreferred": "US-PGPUB",
            "familyIdSecondPreferred": "USPAT",
            "familyIdThirdPreferred": "FPRS",
            "showDocPerFamilyPref": "showEnglish",
            "queryId": 0,
            "tagDocSearch": false,
            "query": {
                "caseId": case_id,
                "hl_snippets": "2",
                "op": options.default_operator.as_str(),
                "q": query.query,
                "queryName": query.query,
                "highlights": "1",
                "qt": "brs",
                "spellCheck": false,
                "viewName": "tile",
                "plurals": options.expand_plurals,
                "britishEquivalents": options.british_equivalents,
                "databaseFilters": [
                    {"databaseName": options.collection.as_str(), "countryCodes": []}
                ],
                "searchType": 1,
                "ignorePersist": true,
                "userEnteredQuery": query.query,
            }
        })
    }

    /// Submit a search and poll until the page is ready.
    ///
    /// Returns the page body, the submit response and the number of polls.
    async fn run_search(&self, query: &SearchQuery) -> Result<(Value, Value, u32), SourceError> {
        let this = self;
        self.session
            .with_session(move |session| async move {
                let payload = Self::search_payload(query, session.case_id());
                let (session, payload) = (&session, &payload);

                let counts: Value = with_retry(this.retry, move || async move {
                    let response = this.post_json(session, COUNTS_PATH, payload).await?;
                    Ok(response.json::<Value>().await?)
                })
                .await?;

                let polled = poll_until(&this.poll, move |attempt| async move {
                    let response = with_retry(this.retry, move || {
                        this.post_json(session, SEARCH_PATH, payload)
                    })
                    .await?;

                    if response.status() == StatusCode::ACCEPTED {
                        tracing::debug!("ppubs search pending (poll {})", attempt);
                        return Ok(PollStatus::Pending);
                    }
                    Ok(PollStatus::Ready(response.json::<Value>().await?))
                })
                .await?;

                tracing::debug!("ppubs search ready after {} poll(s)", polled.attempts);
                Ok((polled.value, counts, polled.attempts))
            })
            .await
    }

    /// Search and report how many poll requests the page took
    pub async fn search_polled(&self, query: &SearchQuery) -> Result<Polled<SearchResult>, SourceError> {
        ensure_limit(query, PPUBS_MAX_LIMIT)?;

        let (page, counts, attempts) = self.run_search(query).await?;
        let hits = page
            .get("patents")
            .or_else(|| page.get("docs"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let batch = normalize_batch(SourceTag::Ppubs, hits, ppubs_record);
        let total = reported_total(&page, &counts);

        let mut result = SearchResult::new(SourceTag::Ppubs, batch.records);
        result.dropped = batch.dropped;
        result.total = total;
        result.next_cursor = query.cursor().next(hits.len(), total);
        Ok(Polled {
            value: result,
            attempts,
        })
    }

    /// Fetch a full document by GUID
    pub async fn get_document(&self, guid: &str, document_type: &str) -> Result<PatentRecord, SourceError> {
        let url = format!(
            "{}/dirsearch-public/patents/{}/highlight?queryId=1&source={}&includeSections=true&uniqueId=",
            self.base_url,
            urlencoding::encode(guid),
            urlencoding::encode(document_type)
        );
        let this = self;
        let url = url.as_str();

        let body: Value = self
            .session
            .with_session(move |session| async move {
                let session = &session;
                with_retry(this.retry, move || async move {
                    let response = this.get(session, url).await?;
                    Ok(response.json::<Value>().await?)
                })
                .await
            })
            .await?;

        let mut record = ppubs_record(&body)
            .map_err(|e| SourceError::Parse(format!("ppubs document {}: {}", guid, e)))?;
        record.guid.get_or_insert_with(|| guid.to_string());
        record.document_type.get_or_insert_with(|| document_type.to_string());
        Ok(record)
    }

    /// Find a granted patent by number, trying the field query first
    ///
    /// A hit only counts when its own number is the requested one; the
    /// returned record carries the number as the caller spelled it.
    pub async fn find_by_number(&self, number: &PatentNumber) -> Result<PatentRecord, SourceError> {
        let queries = [
            format!("patentNumber:\"{}\"", number.number),
            format!("\"{}\".pn.", number.number),
        ];

        for q in queries {
            tracing::debug!("ppubs lookup by number: {}", q);
            let query = SearchQuery::new(q).limit(1).collection(Collection::Patents);
            let result = self.search(&query).await?;
            match result.records.into_iter().next() {
                Some(record) if is_same_patent(&record, number) => return Ok(with_requested_number(record, number)),
                Some(record) => tracing::debug!("ppubs lookup for {} matched {}, ignoring", number.canonical(), record.identifier),
                None => {}
            }
        }

        Err(SourceError::NotFound(format!(
            "Patent {} not found",
            number.canonical()
        )))
    }

    /// Resolve a patent number and fetch its full text
    pub async fn get_by_number(&self, number: &PatentNumber) -> Result<PatentRecord, SourceError> {
        let hit = self.find_by_number(number).await?;
        let guid = hit
            .guid
            .as_deref()
            .ok_or_else(|| SourceError::Parse(format!("search hit for {} has no guid", number.canonical())))?;
        let document_type = hit.document_type.as_deref().unwrap_or(Collection::Patents.as_str());

        let document = self.get_document(guid, document_type).await?;
        if !is_same_patent(&document, number) {
            return Err(SourceError::NotFound(format!(
                "Patent {} not found (document {} is {})",
                number.canonical(),
                guid,
                document.identifier
            )));
        }
        Ok(with_requested_number(document, number))
    }

    /// Assemble the page images of a record into a PDF
    pub async fn download_pdf(&self, record: &PatentRecord) -> Result<Artifact, SourceError> {
        let (Some(guid), Some(image_location), Some(pages)) = (
            record.guid.as_deref(),
            record.image_location.as_deref(),
            record.page_count.filter(|p| *p > 0),
        ) else {
            return Err(SourceError::Parse(format!(
                "record {} is missing image location or page count",
                record.identifier
            )));
        };
        let document_type = record.document_type.as_deref().unwrap_or(Collection::Patents.as_str());

        let job_request = json!({
            "pageKeys": (1..=pages)
                .map(|n| format!("{}/{:08}.tif", image_location, n))
                .collect::<Vec<_>>(),
            "patentGuid": guid,
            "saveOrPrint": "save",
            "source": document_type,
        });
        let this = self;
        let job_request = &job_request;

        let bytes = self
            .session
            .with_session(move |session| async move {
                let session = &session;

                let job_id = with_retry(this.retry, move || async move {
                    let response = this.post_json(session, PRINT_JOB_PATH, job_request).await?;
                    Ok(response.text().await?)
                })
                .await?;
                let job_id = job_id.trim().trim_matches('"').to_string();
                if job_id.is_empty() {
                    return Err(SourceError::Parse("print job id missing".to_string()));
                }
                tracing::debug!("ppubs print job {} submitted", job_id);

                let status_request = json!([job_id]);
                let status_request = &status_request;
                let polled = poll_until(&this.poll, move |_| async move {
                    let status: Value = with_retry(this.retry, move || async move {
                        let response = this.post_json(session, PRINT_STATUS_PATH, status_request).await?;
                        Ok(response.json::<Value>().await?)
                    })
                    .await?;

                    let entry = status.get(0).unwrap_or(&status);
                    let done = entry.get("printStatus").and_then(Value::as_str) == Some("COMPLETED");
                    match entry.get("pdfName").and_then(Value::as_str) {
                        Some(name) if done => Ok(PollStatus::Ready(name.to_string())),
                        _ => Ok(PollStatus::Pending),
                    }
                })
                .await?;

                let url = format!("{}{}/{}", this.base_url, PRINT_SAVE_PATH, urlencoding::encode(&polled.value));
                let url = url.as_str();
                with_retry(this.retry, move || async move {
                    let response = this.get(session, url).await?;
                    Ok(response.bytes().await?.to_vec())
                })
                .await
            })
            .await?;

        Ok(Artifact {
            file_name: format!("{}.pdf", record.identifier),
            content_type: "application/pdf".to_string(),
            bytes,
        })
    }
}

/// Whether the record's own number is `number`, ignoring kind code and spelling
fn is_same_patent(record: &PatentRecord, number: &PatentNumber) -> bool {
    parse_us_patent_number(&record.identifier).is_ok_and(|found| found.number == number.number)
}

fn with_requested_number(mut record: PatentRecord, number: &PatentNumber) -> PatentRecord {
    record.identifier = number.canonical();
    record
}

/// Total hit count from whichever response reports it
fn reported_total(page: &Value, counts: &Value) -> Option<u64> {
    ["numFound", "totalResults", "count"].iter().find_map(|key| {
        page.get(*key)
            .and_then(Value::as_u64)
            .or_else(|| counts.get(*key).and_then(Value::as_u64))
    })
}

#[async_trait]
impl Source for PpubsSource {
    fn id(&self) -> &str {
        SourceTag::Ppubs.id()
    }

    fn name(&self) -> &str {
        SourceTag::Ppubs.name()
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
            | SourceCapabilities::DETAIL
            | SourceCapabilities::DOWNLOAD
            | SourceCapabilities::CLAIMS
            | SourceCapabilities::DESCRIPTION
    }

    fn max_limit(&self) -> u32 {
        PPUBS_MAX_LIMIT
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResult, SourceError> {
        Ok(self.search_polled(query).await?.value)
    }

    async fn get_detail(&self, request: &DetailRequest) -> Result<PatentRecord, SourceError> {
        let document_type = request
            .document_type
            .as_deref()
            .unwrap_or(Collection::Patents.as_str());
        self.get_document(&request.identifier, document_type).await
    }

    async fn download(&self, record: &PatentRecord) -> Result<Artifact, SourceError> {
        self.download_pdf(record).await
    }
}
