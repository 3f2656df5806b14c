//! Argument sets of the service operations, as callers send them.
//!
//! Everything here is raw input. [`super::PatentService`] validates it before
//! any upstream sees it.

use serde::Deserialize;

use crate::sources::{DatasetParams, OdpSearchParams};

/// A value callers send either as a string or as a bare number
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TextOrNumber {
    Text(String),
    Number(u64),
}

impl TextOrNumber {
    pub fn as_text(&self) -> String {
        match self {
            TextOrNumber::Text(s) => s.clone(),
            TextOrNumber::Number(n) => n.to_string(),
        }
    }
}

impl From<&str> for TextOrNumber {
    fn from(value: &str) -> Self {
        TextOrNumber::Text(value.to_string())
    }
}

/// ppubs full-text search
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PpubsSearchRequest {
    pub query: String,
    #[serde(default)]
    pub start: u64,
    pub limit: Option<u64>,
    pub sort: Option<String>,
    pub default_operator: Option<String>,
    pub expand_plurals: Option<bool>,
    pub british_equivalents: Option<bool>,
}

impl PpubsSearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// ppubs document by result GUID
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentRequest {
    pub guid: String,
    pub source_type: Option<String>,
}

/// ppubs lookup by granted patent number
#[derive(Debug, Clone, Deserialize)]
pub struct PatentNumberRequest {
    pub patent_number: TextOrNumber,
}

impl PatentNumberRequest {
    pub fn new(patent_number: &str) -> Self {
        Self {
            patent_number: patent_number.into(),
        }
    }
}

/// Any per-application ODP endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationRequest {
    pub app_num: TextOrNumber,
}

impl ApplicationRequest {
    pub fn new(app_num: &str) -> Self {
        Self {
            app_num: app_num.into(),
        }
    }
}

/// ODP bulk export
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationDownloadRequest {
    #[serde(flatten)]
    pub params: OdpSearchParams,
    pub format: Option<String>,
}

/// ODP status code lookup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusCodesRequest {
    pub q: Option<String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

/// ODP bulk data product
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatasetProductRequest {
    pub product_id: String,
    #[serde(flatten)]
    pub params: DatasetParams,
}

/// Country, paging and publication date scope of a Google Patents search
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleScope {
    pub country: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// `YYYYMMDD` as a number or string, or `YYYY-MM-DD`
    pub start_date: Option<TextOrNumber>,
    pub end_date: Option<TextOrNumber>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleSearchRequest {
    pub query: String,
    #[serde(flatten)]
    pub scope: GoogleScope,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventorSearchRequest {
    pub inventor_name: String,
    #[serde(flatten)]
    pub scope: GoogleScope,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssigneeSearchRequest {
    pub assignee_name: String,
    #[serde(flatten)]
    pub scope: GoogleScope,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CpcSearchRequest {
    pub cpc_code: String,
    #[serde(flatten)]
    pub scope: GoogleScope,
}

/// Google Patents lookup by publication number
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicationRequest {
    pub publication_number: String,
}

impl PublicationRequest {
    pub fn new(publication_number: impl Into<String>) -> Self {
        Self {
            publication_number: publication_number.into(),
        }
    }
}
