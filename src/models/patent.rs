//! Patent record model shared by every upstream source.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The upstream that produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    /// USPTO Patent Public Search
    Ppubs,
    /// USPTO Open Data Portal
    Odp,
    /// Google Patents public dataset on BigQuery
    #[serde(rename = "bigquery")]
    BigQuery,
}

impl SourceTag {
    /// Returns the display name of the source
    pub fn name(&self) -> &'static str {
        match self {
            SourceTag::Ppubs => "USPTO Patent Public Search",
            SourceTag::Odp => "USPTO Open Data Portal",
            SourceTag::BigQuery => "Google Patents (BigQuery)",
        }
    }

    /// Returns the source identifier
    pub fn id(&self) -> &'static str {
        match self {
            SourceTag::Ppubs => "ppubs",
            SourceTag::Odp => "odp",
            SourceTag::BigQuery => "bigquery",
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Opaque handle on the upstream payload a record was built from.
///
/// Kept for debugging only; it is never serialized and never compared.
#[derive(Clone, Default)]
pub struct RawPayload(Option<Arc<serde_json::Value>>);

impl RawPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn get(&self) -> Option<&serde_json::Value> {
        self.0.as_deref()
    }
}

impl std::fmt::Debug for RawPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(_) => f.write_str("RawPayload(..)"),
            None => f.write_str("RawPayload(None)"),
        }
    }
}

impl PartialEq for RawPayload {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// A patent or published application from any source
///
/// This struct provides a standardized format for records across all
/// sources. Source-local handles (`guid`, `document_type`, ...) are kept so a
/// record can be the target of a detail fetch against the source it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatentRecord {
    /// Publication or application number
    pub identifier: String,

    /// Invention title
    pub title: String,

    /// Abstract text
    #[serde(rename = "abstract")]
    pub abstract_text: String,

    /// Claims text, only present after a detail fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<String>,

    /// Description text, only present after a detail fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Inventors in the order the source lists them
    #[serde(default)]
    pub inventors: Vec<String>,

    /// Assignees in the order the source lists them
    #[serde(default)]
    pub assignees: Vec<String>,

    pub filing_date: Option<NaiveDate>,
    pub publication_date: Option<NaiveDate>,
    pub grant_date: Option<NaiveDate>,

    /// Two-letter country code
    pub country: String,

    /// Kind code (B1, B2, A1, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind_code: Option<String>,

    /// CPC / classification codes
    #[serde(default)]
    pub classifications: BTreeSet<String>,

    /// Application number, when the source reports one separately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_number: Option<String>,

    /// ppubs result GUID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,

    /// ppubs document collection (USPAT or US-PGPUB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,

    /// ppubs page image directory, needed for PDF assembly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,

    /// Source that produced this record
    pub source: SourceTag,

    #[serde(skip)]
    pub raw: RawPayload,
}

impl PatentRecord {
    /// Create a record with the required fields and empty defaults
    pub fn new(identifier: impl Into<String>, title: impl Into<String>, source: SourceTag) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            abstract_text: String::new(),
            claims: None,
            description: None,
            inventors: Vec::new(),
            assignees: Vec::new(),
            filing_date: None,
            publication_date: None,
            grant_date: None,
            country: String::new(),
            kind_code: None,
            classifications: BTreeSet::new(),
            application_number: None,
            guid: None,
            document_type: None,
            image_location: None,
            page_count: None,
            source,
            raw: RawPayload::default(),
        }
    }

    /// Whether the inventor list contains `name` (case-insensitive)
    pub fn has_inventor(&self, name: &str) -> bool {
        let needle = name.to_lowercase();
        self.inventors
            .iter()
            .any(|i| i.to_lowercase().contains(&needle))
    }
}

/// Builder for creating PatentRecord instances
#[derive(Debug, Clone)]
pub struct PatentRecordBuilder {
    record: PatentRecord,
}

impl PatentRecordBuilder {
    pub fn new(identifier: impl Into<String>, title: impl Into<String>, source: SourceTag) -> Self {
        Self {
            record: PatentRecord::new(identifier, title, source),
        }
    }

    pub fn abstract_text(mut self, text: impl Into<String>) -> Self {
        self.record.abstract_text = text.into();
        self
    }

    pub fn claims(mut self, claims: Option<String>) -> Self {
        self.record.claims = claims.filter(|c| !c.is_empty());
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.record.description = description.filter(|d| !d.is_empty());
        self
    }

    pub fn inventors(mut self, inventors: Vec<String>) -> Self {
        self.record.inventors = inventors;
        self
    }

    pub fn assignees(mut self, assignees: Vec<String>) -> Self {
        self.record.assignees = assignees;
        self
    }

    pub fn filing_date(mut self, date: Option<NaiveDate>) -> Self {
        self.record.filing_date = date;
        self
    }

    pub fn publication_date(mut self, date: Option<NaiveDate>) -> Self {
        self.record.publication_date = date;
        self
    }

    pub fn grant_date(mut self, date: Option<NaiveDate>) -> Self {
        self.record.grant_date = date;
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.record.country = country.into();
        self
    }

    pub fn kind_code(mut self, kind: Option<String>) -> Self {
        self.record.kind_code = kind.filter(|k| !k.is_empty());
        self
    }

    pub fn classifications<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record.classifications = codes
            .into_iter()
            .map(Into::into)
            .filter(|c: &String| !c.is_empty())
            .collect();
        self
    }

    pub fn application_number(mut self, number: Option<String>) -> Self {
        self.record.application_number = number.filter(|n| !n.is_empty());
        self
    }

    pub fn guid(mut self, guid: Option<String>) -> Self {
        self.record.guid = guid;
        self
    }

    pub fn document_type(mut self, document_type: Option<String>) -> Self {
        self.record.document_type = document_type;
        self
    }

    pub fn image_location(mut self, location: Option<String>) -> Self {
        self.record.image_location = location;
        self
    }

    pub fn page_count(mut self, pages: Option<u32>) -> Self {
        self.record.page_count = pages;
        self
    }

    pub fn raw(mut self, raw: RawPayload) -> Self {
        self.record.raw = raw;
        self
    }

    pub fn build(self) -> PatentRecord {
        self.record
    }
}
