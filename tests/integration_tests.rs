//! Integration tests for patent-master
//!
//! Every upstream is a mockito server; tools are driven through the same
//! registry the MCP server exposes.

use mockito::{Matcher, Mock, Server, ServerGuard};
use patent_master::config::{BigQueryConfig, Credential, OdpConfig, PollSettings, PpubsConfig, RetrySettings};
use patent_master::mcp::ToolRegistry;
use patent_master::service::{PatentService, Timeouts};
use patent_master::sources::{BigQuerySource, OdpSource, PpubsSource, SourceRegistry, StaticTokenSource};
use patent_master::utils::{HttpClient, ACCESS_TOKEN_HEADER, API_KEY_HEADER};
use serde_json::{json, Value};
use std::sync::Arc;

const ATTEMPTS: u32 = 3;

fn retry() -> RetrySettings {
    RetrySettings {
        max_attempts: ATTEMPTS,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    }
}

/// Tools wired to a single mock server standing in for all three upstreams
fn tools(server: &ServerGuard, downloads: &std::path::Path) -> ToolRegistry {
    let http = HttpClient::new().unwrap();

    let ppubs = PpubsConfig {
        base_url: server.url(),
        poll: PollSettings {
            max_attempts: 5,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            max_total_wait_secs: 5,
        },
        ..Default::default()
    };
    let odp = OdpConfig {
        base_url: server.url(),
        ..Default::default()
    };
    let bigquery = BigQueryConfig {
        base_url: server.url(),
        ..Default::default()
    };

    let sources = SourceRegistry::from_parts(
        Arc::new(PpubsSource::with_client(http.clone(), &ppubs, &retry())),
        Some(Arc::new(OdpSource::with_client(
            http.clone(),
            &odp,
            &retry(),
            Credential::ApiKey("test-key".to_string()),
        ))),
        Some(Arc::new(
            BigQuerySource::with_client(
                http,
                &bigquery,
                &retry(),
                "test-project".to_string(),
                Arc::new(StaticTokenSource::new("test-token")),
            )
            .unwrap(),
        )),
    );

    let service = PatentService::with_timeouts(Arc::new(sources), Timeouts::default());
    ToolRegistry::new(service, downloads)
}

async fn mock_handshake(server: &mut ServerGuard) -> (Mock, Mock) {
    let landing = server
        .mock("GET", "/pubwebapp/")
        .with_status(200)
        .with_body("<html></html>")
        .expect(1)
        .create_async()
        .await;
    let session = server
        .mock("POST", "/dirsearch-public/users/me/session")
        .with_status(200)
        .with_header(ACCESS_TOKEN_HEADER, "tok-1")
        .with_body(r#"{"userCase": {"caseId": 4242}}"#)
        .expect(1)
        .create_async()
        .await;
    (landing, session)
}

fn bigquery_rows(rows: Vec<Value>) -> String {
    json!({
        "kind": "bigquery#queryResponse",
        "jobComplete": true,
        "jobReference": {"projectId": "test-project", "jobId": "job-1", "location": "US"},
        "schema": {"fields": [
            {"name": "publication_number", "type": "STRING", "mode": "NULLABLE"},
            {"name": "country_code", "type": "STRING", "mode": "NULLABLE"},
            {"name": "title", "type": "STRING", "mode": "NULLABLE"},
            {"name": "inventors", "type": "STRING", "mode": "REPEATED"},
            {"name": "publication_date", "type": "INTEGER", "mode": "NULLABLE"}
        ]},
        "rows": rows,
        "totalRows": "0"
    })
    .to_string()
}

fn bigquery_row(number: &str, inventor: &str) -> Value {
    json!({"f": [
        {"v": number},
        {"v": "US"},
        {"v": "Widget"},
        {"v": [{"v": inventor}, {"v": "John Roe"}]},
        {"v": "20230110"}
    ]})
}

#[tokio::test]
async fn test_limit_above_maximum_never_reaches_upstream() {
    let mut server = Server::new_async().await;
    let mut untouched = Vec::new();
    for method in ["GET", "POST"] {
        untouched.push(
            server
                .mock(method, Matcher::Any)
                .match_query(Matcher::Any)
                .expect(0)
                .create_async()
                .await,
        );
    }
    let dir = tempfile::tempdir().unwrap();
    let tools = tools(&server, dir.path());

    for (tool, args) in [
        ("ppubs_search_patents", json!({"query": "widget", "limit": 501})),
        ("search_applications", json!({"q": "widget", "limit": 101})),
        ("google_search_patents", json!({"query": "widget", "limit": 501})),
        ("google_search_by_inventor", json!({"inventor_name": "Jane Doe", "limit": 0})),
    ] {
        let value = tools.call(tool, args).await;
        assert_eq!(value["error"], true, "{}", tool);
        assert_eq!(value["kind"], "InvalidRequest", "{}", tool);
        assert_eq!(value["operation"], tool);
    }

    for mock in untouched {
        mock.assert_async().await;
    }
}

#[tokio::test]
async fn test_ppubs_server_errors_exhaust_retries() {
    let mut server = Server::new_async().await;
    let _handshake = mock_handshake(&mut server).await;
    let counts = server
        .mock("POST", "/dirsearch-public/searches/counts")
        .with_status(503)
        .expect(ATTEMPTS as usize)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let value = tools(&server, dir.path())
        .call("ppubs_search_patents", json!({"query": "widget"}))
        .await;

    assert_eq!(value["kind"], "UpstreamUnavailable");
    assert_eq!(value["source"], "ppubs");
    assert_eq!(value["status"], 503);
    counts.assert_async().await;
}

#[tokio::test]
async fn test_odp_server_errors_exhaust_retries() {
    let mut server = Server::new_async().await;
    let meta = server
        .mock("GET", "/api/v1/patent/applications/14412875/meta-data")
        .with_status(502)
        .expect(ATTEMPTS as usize)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let value = tools(&server, dir.path())
        .call("get_app_metadata", json!({"app_num": "14/412,875"}))
        .await;

    assert_eq!(value["kind"], "UpstreamUnavailable");
    assert_eq!(value["source"], "odp");
    assert_eq!(value["status"], 502);
    meta.assert_async().await;
}

#[tokio::test]
async fn test_bigquery_server_errors_exhaust_retries() {
    let mut server = Server::new_async().await;
    let queries = server
        .mock("POST", "/projects/test-project/queries")
        .with_status(500)
        .expect(ATTEMPTS as usize)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let value = tools(&server, dir.path())
        .call("google_get_patent", json!({"publication_number": "US10000000B2"}))
        .await;

    assert_eq!(value["kind"], "UpstreamUnavailable");
    assert_eq!(value["source"], "bigquery");
    queries.assert_async().await;
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let mut server = Server::new_async().await;
    let search = server
        .mock("GET", "/api/v1/patent/applications/search")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(r#"{"error": "bad filter"}"#)
        .expect(1)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let value = tools(&server, dir.path())
        .call("search_applications", json!({"q": "applicationMetaData.inventionTitle:(", "limit": 10}))
        .await;

    assert_eq!(value["kind"], "InvalidRequest");
    assert_eq!(value["source"], "odp");
    assert_eq!(value["status"], 400);
    assert!(value["message"].as_str().unwrap().contains("bad filter"));
    search.assert_async().await;
}

#[tokio::test]
async fn test_patent_by_number_round_trip() {
    let mut server = Server::new_async().await;
    let (landing, session) = mock_handshake(&mut server).await;
    let _counts = server
        .mock("POST", "/dirsearch-public/searches/counts")
        .with_status(200)
        .with_body(r#"{"numFound": 1}"#)
        .create_async()
        .await;
    let search = server
        .mock("POST", "/dirsearch-public/searches/searchWithBeFamily")
        .match_header(ACCESS_TOKEN_HEADER, "tok-1")
        .match_body(Matcher::Regex("10000000".to_string()))
        .with_status(200)
        .with_body(
            json!({"patents": [
                {"guid": "US-10000000-B2", "type": "USPAT", "patentNumber": "10000000"}
            ]})
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let document = server
        .mock("GET", "/dirsearch-public/patents/US-10000000-B2/highlight")
        .match_query(Matcher::UrlEncoded("source".into(), "USPAT".into()))
        .with_status(200)
        .with_body(
            json!({
                "guid": "US-10000000-B2",
                "type": "USPAT",
                "patentNumber": "10000000",
                "inventionTitle": "Coherent LADAR using intra-pixel quadrature detection",
                "kindCode": ["B2"],
                "datePublished": "2018-06-19T00:00:00Z",
                "inventorsShort": "Maestas; Joseph et al.",
                "claimsHtml": "<p>1. A laser detection and ranging system comprising a receiver.</p>",
                "descriptionHtml": "<p>BACKGROUND</p><p>Coherent detection.</p>"
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let value = tools(&server, dir.path())
        .call("ppubs_get_patent_by_number", json!({"patent_number": "US 10,000,000 B2"}))
        .await;

    assert!(value.get("error").is_none(), "{}", value);
    assert_eq!(value["identifier"], "US10000000B2");
    assert_eq!(value["source"], "ppubs");
    assert_eq!(value["guid"], "US-10000000-B2");
    assert!(value["claims"].as_str().unwrap().contains("laser detection"));
    assert!(!value["description"].as_str().unwrap().contains("<p>"));

    landing.assert_async().await;
    session.assert_async().await;
    search.assert_async().await;
    document.assert_async().await;
}

#[tokio::test]
async fn test_search_survives_a_pending_poll() {
    let mut server = Server::new_async().await;
    let _handshake = mock_handshake(&mut server).await;
    let _counts = server
        .mock("POST", "/dirsearch-public/searches/counts")
        .with_status(200)
        .with_body(r#"{"numFound": 2}"#)
        .create_async()
        .await;
    let pending = server
        .mock("POST", "/dirsearch-public/searches/searchWithBeFamily")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;
    let ready = server
        .mock("POST", "/dirsearch-public/searches/searchWithBeFamily")
        .with_status(200)
        .with_body(
            json!({"patents": [
                {"guid": "US-1-B2", "type": "USPAT", "patentNumber": "1", "inventionTitle": "A"},
                {"guid": "US-2-B2", "type": "USPAT", "patentNumber": "2", "inventionTitle": "B"}
            ]})
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let value = tools(&server, dir.path())
        .call("ppubs_search_patents", json!({"query": "widget", "limit": 10}))
        .await;

    assert_eq!(value["records"].as_array().unwrap().len(), 2);
    assert_eq!(value["total"], 2);
    assert!(value["next_cursor"].is_null());
    pending.assert_async().await;
    ready.assert_async().await;
}

#[tokio::test]
async fn test_google_search_by_inventor() {
    let mut server = Server::new_async().await;
    let query = server
        .mock("POST", "/projects/test-project/queries")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r"CONTAINS_SUBSTR\(i\.name, @inventor\)".to_string()),
            Matcher::Regex(r#""parameterValue":\{"value":"Jane Doe"\}"#.to_string()),
            Matcher::Regex(r#""parameterValue":\{"value":"10"\}"#.to_string()),
            Matcher::Regex(r#""parameterValue":\{"value":"US"\}"#.to_string()),
        ]))
        .with_status(200)
        .with_body(bigquery_rows(vec![
            bigquery_row("US-11000001-B2", "Jane Doe"),
            bigquery_row("US-11000002-B1", "JANE DOE"),
            bigquery_row("US-2023001234-A1", "Jane Doe-Smith"),
        ]))
        .expect(1)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let value = tools(&server, dir.path())
        .call(
            "google_search_by_inventor",
            json!({"inventor_name": "Jane Doe", "country": "US", "limit": 10}),
        )
        .await;

    let records = value["records"].as_array().unwrap();
    assert!(!records.is_empty() && records.len() <= 10);
    for record in records {
        assert_eq!(record["country"], "US");
        let inventors: Vec<&str> = record["inventors"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(inventors.iter().any(|n| n.to_lowercase().contains("jane doe")));
    }
    assert!(value["next_cursor"].is_null());
    query.assert_async().await;
}

#[tokio::test]
async fn test_application_lookup_is_idempotent() {
    let mut server = Server::new_async().await;
    let body = json!({
        "count": 1,
        "patentFileWrapperDataBag": [{
            "applicationNumberText": "14412875",
            "applicationMetaData": {
                "inventionTitle": "Widget",
                "filingDate": "2015-01-05",
                "inventorBag": [{"inventorNameText": "Jane Doe"}]
            }
        }]
    });
    let meta = server
        .mock("GET", "/api/v1/patent/applications/14412875/meta-data")
        .match_header(API_KEY_HEADER, "test-key")
        .with_status(200)
        .with_body(body.to_string())
        .expect(2)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();
    let tools = tools(&server, dir.path());

    let first = tools.call("get_app_metadata", json!({"app_num": "14412875"})).await;
    let second = tools.call("get_app_metadata", json!({"app_num": 14412875})).await;

    assert_eq!(first, second);
    assert_eq!(first["application_number"], "14412875");
    assert_eq!(first["record"]["title"], "Widget");
    meta.assert_async().await;
}

#[tokio::test]
async fn test_csv_export_is_written_to_downloads() {
    let mut server = Server::new_async().await;
    let export = server
        .mock("GET", "/api/v1/patent/applications/search/download")
        .match_query(Matcher::UrlEncoded("format".into(), "csv".into()))
        .with_status(200)
        .with_header("content-type", "text/csv")
        .with_body("applicationNumberText,inventionTitle\n14412875,Widget\n")
        .expect(1)
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();

    let value = tools(&server, dir.path())
        .call("download_applications", json!({"q": "widget", "format": "csv"}))
        .await;

    let path = std::path::PathBuf::from(value["path"].as_str().unwrap());
    assert!(path.starts_with(dir.path()));
    let written = std::fs::read_to_string(path).unwrap();
    assert!(written.contains("14412875,Widget"));
    export.assert_async().await;
}
