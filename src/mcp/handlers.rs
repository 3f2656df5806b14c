//! Tool handlers: decode arguments, call the service, shape the output.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::tools::ToolHandler;
use crate::models::{Artifact, SearchResult};
use crate::service::{ApplicationPage, ErrorKind, PatentService, ToolError};
use crate::sources::OdpOperation;

/// Every operation exposed as a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    PpubsSearchPatents,
    PpubsSearchApplications,
    PpubsGetFullDocument,
    PpubsGetPatentByNumber,
    PpubsDownloadPatentPdf,
    Application(OdpOperation),
    SearchApplications,
    SearchApplicationsPost,
    DownloadApplications,
    DownloadApplicationsPost,
    GetStatusCodes,
    GetStatusCodesPost,
    SearchDatasets,
    GetDatasetProduct,
    GoogleSearchPatents,
    GoogleGetPatent,
    GoogleGetPatentClaims,
    GoogleGetPatentDescription,
    GoogleSearchByInventor,
    GoogleSearchByAssignee,
    GoogleSearchByCpc,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::PpubsSearchPatents => "ppubs_search_patents",
            Operation::PpubsSearchApplications => "ppubs_search_applications",
            Operation::PpubsGetFullDocument => "ppubs_get_full_document",
            Operation::PpubsGetPatentByNumber => "ppubs_get_patent_by_number",
            Operation::PpubsDownloadPatentPdf => "ppubs_download_patent_pdf",
            Operation::Application(op) => op.operation_name(),
            Operation::SearchApplications => "search_applications",
            Operation::SearchApplicationsPost => "search_applications_post",
            Operation::DownloadApplications => "download_applications",
            Operation::DownloadApplicationsPost => "download_applications_post",
            Operation::GetStatusCodes => "get_status_codes",
            Operation::GetStatusCodesPost => "get_status_codes_post",
            Operation::SearchDatasets => "search_datasets",
            Operation::GetDatasetProduct => "get_dataset_product",
            Operation::GoogleSearchPatents => "google_search_patents",
            Operation::GoogleGetPatent => "google_get_patent",
            Operation::GoogleGetPatentClaims => "google_get_patent_claims",
            Operation::GoogleGetPatentDescription => "google_get_patent_description",
            Operation::GoogleSearchByInventor => "google_search_by_inventor",
            Operation::GoogleSearchByAssignee => "google_search_by_assignee",
            Operation::GoogleSearchByCpc => "google_search_by_cpc",
        }
    }
}

/// Handler behind every registered tool
#[derive(Debug)]
pub struct ServiceHandler {
    pub service: PatentService,
    pub downloads: PathBuf,
    pub operation: Operation,
}

#[async_trait::async_trait]
impl ToolHandler for ServiceHandler {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let op = self.operation.name();
        let service = &self.service;
        tracing::debug!("tool call {}", op);

        match self.operation {
            Operation::PpubsSearchPatents => search_output(op, &service.ppubs_search_patents(parse(op, args)?).await?),
            Operation::PpubsSearchApplications => {
                search_output(op, &service.ppubs_search_applications(parse(op, args)?).await?)
            }
            Operation::PpubsGetFullDocument => to_json(op, &service.ppubs_get_full_document(parse(op, args)?).await?),
            Operation::PpubsGetPatentByNumber => {
                to_json(op, &service.ppubs_get_patent_by_number(parse(op, args)?).await?)
            }
            Operation::PpubsDownloadPatentPdf => {
                let artifact = service.ppubs_download_patent_pdf(parse(op, args)?).await?;
                artifact_output(op, &self.downloads, &artifact).await
            }
            Operation::Application(operation) => {
                to_json(op, &service.get_application(operation, parse(op, args)?).await?)
            }
            Operation::SearchApplications => page_output(op, &service.search_applications(parse(op, args)?).await?),
            Operation::SearchApplicationsPost => {
                page_output(op, &service.search_applications_post(parse(op, args)?).await?)
            }
            Operation::DownloadApplications => {
                let artifact = service.download_applications(parse(op, args)?).await?;
                artifact_output(op, &self.downloads, &artifact).await
            }
            Operation::DownloadApplicationsPost => {
                let artifact = service.download_applications_post(parse(op, args)?).await?;
                artifact_output(op, &self.downloads, &artifact).await
            }
            Operation::GetStatusCodes => to_json(op, &service.get_status_codes(parse(op, args)?).await?),
            Operation::GetStatusCodesPost => to_json(op, &service.get_status_codes_post(parse(op, args)?).await?),
            Operation::SearchDatasets => to_json(op, &service.search_datasets(parse(op, args)?).await?),
            Operation::GetDatasetProduct => to_json(op, &service.get_dataset_product(parse(op, args)?).await?),
            Operation::GoogleSearchPatents => search_output(op, &service.google_search_patents(parse(op, args)?).await?),
            Operation::GoogleGetPatent => to_json(op, &service.google_get_patent(parse(op, args)?).await?),
            Operation::GoogleGetPatentClaims => to_json(op, &service.google_get_patent_claims(parse(op, args)?).await?),
            Operation::GoogleGetPatentDescription => {
                to_json(op, &service.google_get_patent_description(parse(op, args)?).await?)
            }
            Operation::GoogleSearchByInventor => {
                search_output(op, &service.google_search_by_inventor(parse(op, args)?).await?)
            }
            Operation::GoogleSearchByAssignee => {
                search_output(op, &service.google_search_by_assignee(parse(op, args)?).await?)
            }
            Operation::GoogleSearchByCpc => search_output(op, &service.google_search_by_cpc(parse(op, args)?).await?),
        }
    }
}

/// Decode tool arguments; a missing argument object counts as empty
fn parse<T: DeserializeOwned>(operation: &str, args: Value) -> Result<T, ToolError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args)
        .map_err(|e| ToolError::new(ErrorKind::InvalidRequest, operation, format!("invalid arguments: {}", e)))
}

fn to_json<T: Serialize>(operation: &str, value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::new(ErrorKind::Internal, operation, e.to_string()))
}

fn dropped_warning(dropped: usize) -> Value {
    json!([format!(
        "{} upstream record(s) could not be normalized and were left out",
        dropped
    )])
}

/// A search page, with a warning when normalization dropped records
pub(crate) fn search_output(operation: &str, result: &SearchResult) -> Result<Value, ToolError> {
    let mut value = to_json(operation, result)?;
    if result.is_partial() {
        tracing::warn!("{}: {} record(s) dropped", operation, result.dropped);
        value["warnings"] = dropped_warning(result.dropped);
    }
    Ok(value)
}

fn page_output(operation: &str, page: &ApplicationPage) -> Result<Value, ToolError> {
    let mut value = to_json(operation, page)?;
    if page.result.is_partial() {
        tracing::warn!("{}: {} record(s) dropped", operation, page.result.dropped);
        value["warnings"] = dropped_warning(page.result.dropped);
    }
    Ok(value)
}

/// JSON exports are returned inline; anything else is written to the download directory
pub(crate) async fn artifact_output(operation: &str, dir: &Path, artifact: &Artifact) -> Result<Value, ToolError> {
    if artifact.content_type == "application/json" {
        if let Ok(data) = serde_json::from_slice::<Value>(&artifact.bytes) {
            return Ok(json!({
                "file_name": artifact.file_name,
                "content_type": artifact.content_type,
                "data": data,
            }));
        }
    }

    let path = save_artifact(dir, artifact)
        .await
        .map_err(|e| ToolError::new(ErrorKind::Internal, operation, format!("cannot save {}: {}", artifact.file_name, e)))?;
    tracing::info!("{}: saved {} bytes to {}", operation, artifact.len(), path.display());

    Ok(json!({
        "file_name": artifact.file_name,
        "content_type": artifact.content_type,
        "path": path.display().to_string(),
        "size": artifact.len(),
    }))
}

async fn save_artifact(dir: &Path, artifact: &Artifact) -> std::io::Result<PathBuf> {
    // Only the final component of the upstream file name is trusted
    let file_name = Path::new(&artifact.file_name)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "download.bin".into());

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, &artifact.bytes).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PatentRecord, SourceTag};

    fn artifact(name: &str, content_type: &str, bytes: &[u8]) -> Artifact {
        Artifact {
            file_name: name.to_string(),
            content_type: content_type.to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        let err = parse::<crate::service::PpubsSearchRequest>("ppubs_search_patents", json!({"query": 5}))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert_eq!(err.operation, "ppubs_search_patents");

        let params = parse::<crate::sources::DatasetParams>("search_datasets", Value::Null).unwrap();
        assert!(params.q.is_none());
    }

    #[test]
    fn test_search_output_warns_on_drops() {
        let mut result = SearchResult::new(
            SourceTag::BigQuery,
            vec![PatentRecord::new("US-1-B2", "Widget", SourceTag::BigQuery)],
        );
        let clean = search_output("google_search_patents", &result).unwrap();
        assert!(clean.get("warnings").is_none());

        result.dropped = 2;
        let partial = search_output("google_search_patents", &result).unwrap();
        assert_eq!(partial["dropped"], 2);
        assert!(partial["warnings"][0].as_str().unwrap().contains("2 upstream record"));
    }

    #[tokio::test]
    async fn test_json_artifact_is_inline() {
        let dir = tempfile::tempdir().unwrap();
        let out = artifact_output(
            "download_applications",
            dir.path(),
            &artifact("applications.json", "application/json", br#"{"count": 1}"#),
        )
        .await
        .unwrap();
        assert_eq!(out["data"]["count"], 1);
        assert!(out.get("path").is_none());
    }

    #[tokio::test]
    async fn test_binary_artifact_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("pdfs");
        let out = artifact_output(
            "ppubs_download_patent_pdf",
            &target,
            &artifact("../US10000000.pdf", "application/pdf", b"%PDF-1.4"),
        )
        .await
        .unwrap();

        let path = PathBuf::from(out["path"].as_str().unwrap());
        assert_eq!(path, target.join("US10000000.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");
        assert_eq!(out["size"], 8);
    }
}
