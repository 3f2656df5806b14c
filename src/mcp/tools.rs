//! Tool registry for MCP tools.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::handlers::{Operation, ServiceHandler};
use crate::service::{ErrorKind, PatentService, ToolError};
use crate::sources::{OdpOperation, BIGQUERY_MAX_LIMIT, ODP_MAX_LIMIT, PPUBS_MAX_LIMIT};
use crate::utils::GOOGLE_COUNTRIES;

/// An MCP tool that can be called by the client
#[derive(Clone)]
pub struct Tool {
    /// Tool name (e.g., "ppubs_search_patents")
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for input parameters
    pub input_schema: Value,

    /// Handler function to execute the tool
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Handler for executing a tool
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + std::fmt::Debug {
    /// Execute the tool with the given arguments
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// Registry for all MCP tools
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    /// Register every tool against one service
    ///
    /// Tools for unconfigured sources are still registered; calling them
    /// reports `AdapterUnavailable`.
    pub fn new(service: PatentService, downloads: impl Into<PathBuf>) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };
        let downloads = downloads.into();

        for (operation, description, input_schema) in tool_table() {
            registry.register(Tool {
                name: operation.name().to_string(),
                description,
                input_schema,
                handler: Arc::new(ServiceHandler {
                    service: service.clone(),
                    downloads: downloads.clone(),
                    operation,
                }),
            });
        }

        registry
    }

    /// Register a tool
    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Get all tools, ordered by name
    pub fn all(&self) -> Vec<&Tool> {
        let mut tools: Vec<&Tool> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self.get(name).ok_or_else(|| {
            ToolError::new(ErrorKind::InvalidRequest, name, format!("Tool '{}' not found", name))
        })?;

        tool.handler.execute(args).await
    }

    /// Execute a tool and fold any failure into the structured error object
    pub async fn call(&self, name: &str, args: Value) -> Value {
        match self.execute(name, args).await {
            Ok(value) => value,
            Err(err) => err.to_value(),
        }
    }
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Merge two `properties` objects
fn merge(mut base: Value, extra: Value) -> Value {
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

fn ppubs_search_schema() -> Value {
    object(
        json!({
            "query": {
                "type": "string",
                "description": "Search query in ppubs syntax, e.g. 'wireless charging' or '\"10000000\".pn.'"
            },
            "start": {"type": "integer", "description": "Results to skip", "default": 0},
            "limit": {"type": "integer", "description": "Page size", "default": 100, "minimum": 1, "maximum": PPUBS_MAX_LIMIT},
            "sort": {"type": "string", "description": "Sort expression", "default": "date_publ desc"},
            "default_operator": {"type": "string", "enum": ["AND", "OR"], "default": "OR"},
            "expand_plurals": {"type": "boolean", "default": true},
            "british_equivalents": {"type": "boolean", "default": true}
        }),
        &["query"],
    )
}

fn patent_number_schema() -> Value {
    object(
        json!({
            "patent_number": {
                "type": ["string", "integer"],
                "description": "US patent number, e.g. 10000000, US10000000B2 or D900000"
            }
        }),
        &["patent_number"],
    )
}

fn application_schema() -> Value {
    object(
        json!({
            "app_num": {
                "type": ["string", "integer"],
                "description": "Application number, e.g. 14412875 or 14/412,875"
            }
        }),
        &["app_num"],
    )
}

fn odp_search_properties() -> Value {
    json!({
        "q": {"type": "string", "description": "Query in ODP search syntax"},
        "sort": {"type": "string", "description": "GET form: field and direction"},
        "offset": {"type": "integer", "default": 0},
        "limit": {"type": "integer", "default": 25, "minimum": 1, "maximum": ODP_MAX_LIMIT},
        "facets": {"type": "string", "description": "GET form: comma-separated facet fields"},
        "fields": {"type": "string", "description": "GET form: comma-separated fields to return"},
        "filters": {"type": "string", "description": "GET form: field value filters"},
        "range_filters": {"type": "string", "description": "GET form: field from:to filters"},
        "filters_list": {"type": "array", "items": {"type": "object"}, "description": "POST form: filter objects"},
        "range_filters_list": {"type": "array", "items": {"type": "object"}, "description": "POST form: range filter objects"},
        "sort_list": {"type": "array", "items": {"type": "object"}, "description": "POST form: sort objects"},
        "fields_list": {"type": "array", "items": {"type": "string"}},
        "facets_list": {"type": "array", "items": {"type": "string"}}
    })
}

fn odp_download_schema() -> Value {
    object(
        merge(
            odp_search_properties(),
            json!({"format": {"type": "string", "enum": ["json", "csv"], "default": "json"}}),
        ),
        &[],
    )
}

fn status_codes_schema() -> Value {
    object(
        json!({
            "q": {"type": "string", "description": "Code or description to look up"},
            "offset": {"type": "integer", "default": 0},
            "limit": {"type": "integer", "default": 25, "minimum": 1, "maximum": ODP_MAX_LIMIT}
        }),
        &[],
    )
}

fn dataset_properties() -> Value {
    json!({
        "q": {"type": "string"},
        "product_title": {"type": "string"},
        "product_description": {"type": "string"},
        "product_short_name": {"type": "string"},
        "offset": {"type": "integer"},
        "limit": {"type": "integer", "minimum": 1, "maximum": ODP_MAX_LIMIT},
        "facets": {"type": "string"},
        "include_files": {"type": "boolean"},
        "latest": {"type": "boolean"},
        "labels": {"type": "string"},
        "categories": {"type": "string"},
        "datasets": {"type": "string"},
        "file_types": {"type": "string"}
    })
}

fn dataset_product_schema() -> Value {
    object(
        json!({
            "product_id": {"type": "string", "description": "Product identifier, e.g. PTGRXML"},
            "file_data_from_date": {"type": "string", "description": "YYYY-MM-DD"},
            "file_data_to_date": {"type": "string", "description": "YYYY-MM-DD"},
            "offset": {"type": "integer"},
            "limit": {"type": "integer", "minimum": 1, "maximum": ODP_MAX_LIMIT},
            "include_files": {"type": "boolean"},
            "latest": {"type": "boolean"}
        }),
        &["product_id"],
    )
}

fn google_scope_properties() -> Value {
    json!({
        "country": {"type": "string", "enum": GOOGLE_COUNTRIES, "default": "US"},
        "limit": {"type": "integer", "default": 100, "minimum": 1, "maximum": BIGQUERY_MAX_LIMIT},
        "offset": {"type": "integer", "default": 0},
        "start_date": {"type": ["string", "integer"], "description": "Earliest publication date, YYYYMMDD or YYYY-MM-DD"},
        "end_date": {"type": ["string", "integer"], "description": "Latest publication date, YYYYMMDD or YYYY-MM-DD"}
    })
}

fn google_search_schema(field: &str, description: &str) -> Value {
    let mut own = Map::new();
    own.insert(field.to_string(), json!({"type": "string", "description": description}));
    object(merge(google_scope_properties(), Value::Object(own)), &[field])
}

fn publication_schema() -> Value {
    object(
        json!({
            "publication_number": {
                "type": "string",
                "description": "Publication number, e.g. US-10000000-B2 or US10000000B2"
            }
        }),
        &["publication_number"],
    )
}

/// Name, description and input schema of every tool
fn tool_table() -> Vec<(Operation, String, Value)> {
    let mut table = vec![
        (
            Operation::PpubsSearchPatents,
            "Search granted US patents (USPAT) in Patent Public Search".to_string(),
            ppubs_search_schema(),
        ),
        (
            Operation::PpubsSearchApplications,
            "Search published US applications (US-PGPUB) in Patent Public Search".to_string(),
            ppubs_search_schema(),
        ),
        (
            Operation::PpubsGetFullDocument,
            "Fetch the full text of a Patent Public Search result by its GUID".to_string(),
            object(
                json!({
                    "guid": {"type": "string", "description": "Result GUID from a ppubs search"},
                    "source_type": {"type": "string", "enum": ["USPAT", "US-PGPUB"], "default": "USPAT"}
                }),
                &["guid"],
            ),
        ),
        (
            Operation::PpubsGetPatentByNumber,
            "Find a granted US patent by number and return its full text".to_string(),
            patent_number_schema(),
        ),
        (
            Operation::PpubsDownloadPatentPdf,
            "Download the page images of a granted US patent as a PDF".to_string(),
            patent_number_schema(),
        ),
        (
            Operation::SearchApplications,
            "Search patent applications in the Open Data Portal (GET form)".to_string(),
            object(odp_search_properties(), &[]),
        ),
        (
            Operation::SearchApplicationsPost,
            "Search patent applications in the Open Data Portal (POST form)".to_string(),
            object(odp_search_properties(), &[]),
        ),
        (
            Operation::DownloadApplications,
            "Export application search results as JSON or CSV (GET form)".to_string(),
            odp_download_schema(),
        ),
        (
            Operation::DownloadApplicationsPost,
            "Export application search results as JSON or CSV (POST form)".to_string(),
            odp_download_schema(),
        ),
        (
            Operation::GetStatusCodes,
            "Look up application status codes (GET form)".to_string(),
            status_codes_schema(),
        ),
        (
            Operation::GetStatusCodesPost,
            "Look up application status codes (POST form)".to_string(),
            status_codes_schema(),
        ),
        (
            Operation::SearchDatasets,
            "Search Open Data Portal bulk data products".to_string(),
            object(dataset_properties(), &[]),
        ),
        (
            Operation::GetDatasetProduct,
            "Fetch one bulk data product and its files".to_string(),
            dataset_product_schema(),
        ),
        (
            Operation::GoogleSearchPatents,
            "Full-text search of titles and abstracts in Google Patents (BigQuery)".to_string(),
            google_search_schema("query", "Text to match in title or abstract"),
        ),
        (
            Operation::GoogleGetPatent,
            "Fetch one Google Patents publication with claims and description".to_string(),
            publication_schema(),
        ),
        (
            Operation::GoogleGetPatentClaims,
            "Fetch the claims of a Google Patents publication".to_string(),
            publication_schema(),
        ),
        (
            Operation::GoogleGetPatentDescription,
            "Fetch the description of a Google Patents publication".to_string(),
            publication_schema(),
        ),
        (
            Operation::GoogleSearchByInventor,
            "Search Google Patents by inventor name".to_string(),
            google_search_schema("inventor_name", "Inventor name, matched as a substring"),
        ),
        (
            Operation::GoogleSearchByAssignee,
            "Search Google Patents by assignee name".to_string(),
            google_search_schema("assignee_name", "Assignee name, matched as a substring"),
        ),
        (
            Operation::GoogleSearchByCpc,
            "Search Google Patents by CPC classification prefix".to_string(),
            google_search_schema("cpc_code", "CPC code or prefix, e.g. G06N3/08 or H04W"),
        ),
    ];

    for op in OdpOperation::ALL {
        let description = match op.suffix() {
            None => "Fetch an application's file wrapper from the Open Data Portal".to_string(),
            Some(suffix) => format!("Fetch the {} data of an application from the Open Data Portal", suffix),
        };
        table.push((Operation::Application(op), description, application_schema()));
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PpubsConfig, RetrySettings};
    use crate::service::Timeouts;
    use crate::sources::{PpubsSource, SourceRegistry};
    use crate::utils::HttpClient;

    fn registry() -> ToolRegistry {
        let ppubs = PpubsSource::with_client(
            HttpClient::new().unwrap(),
            &PpubsConfig::default(),
            &RetrySettings::default(),
        );
        let sources = SourceRegistry::from_parts(Arc::new(ppubs), None, None);
        let service = PatentService::with_timeouts(Arc::new(sources), Timeouts::default());
        ToolRegistry::new(service, std::env::temp_dir())
    }

    #[test]
    fn test_every_operation_is_registered() {
        let tools = registry();
        assert_eq!(tools.len(), 30);

        for name in [
            "ppubs_search_patents",
            "ppubs_download_patent_pdf",
            "get_app",
            "get_app_associated_documents",
            "search_applications_post",
            "get_status_codes_post",
            "get_dataset_product",
            "google_search_by_cpc",
        ] {
            assert!(tools.get(name).is_some(), "{} missing", name);
        }

        let names: Vec<&str> = tools.all().iter().map(|t| t.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_schemas_are_objects_with_required_fields() {
        let tools = registry();
        for tool in tools.all() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert!(tool.input_schema["properties"].is_object(), "{}", tool.name);
        }

        let inventor = tools.get("google_search_by_inventor").unwrap();
        assert_eq!(inventor.input_schema["required"], json!(["inventor_name"]));
        assert_eq!(inventor.input_schema["properties"]["limit"]["maximum"], 500);
        assert_eq!(inventor.input_schema["properties"]["country"]["default"], "US");
    }

    #[tokio::test]
    async fn test_unknown_tool_and_structured_errors() {
        let tools = registry();

        let err = tools.execute("no_such_tool", json!({})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);

        let value = tools.call("google_get_patent", json!({"publication_number": "US10000000B2"})).await;
        assert_eq!(value["error"], true);
        assert_eq!(value["kind"], "AdapterUnavailable");
        assert_eq!(value["source"], "bigquery");

        let value = tools.call("ppubs_search_patents", json!({"query": "x", "limit": 0})).await;
        assert_eq!(value["kind"], "InvalidRequest");
        assert!(value["source"].is_null());
    }
}
