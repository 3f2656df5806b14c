//! Search request and response models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::patent::{PatentRecord, SourceTag};

/// Inclusive date range filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// A range is well formed when it is not inverted
    pub fn is_valid(&self) -> bool {
        match (self.start, self.end) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Structured filters applied on top of the free-text query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub date_range: Option<DateRange>,
    pub country: Option<String>,
    pub classification: Option<String>,
    pub inventor: Option<String>,
    pub assignee: Option<String>,
}

/// ppubs document collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Collection {
    /// Granted patents
    #[serde(rename = "USPAT")]
    Patents,
    /// Published applications
    #[serde(rename = "US-PGPUB")]
    Applications,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Patents => "USPAT",
            Collection::Applications => "US-PGPUB",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "USPAT" => Some(Collection::Patents),
            "US-PGPUB" | "PGPUB" => Some(Collection::Applications),
            _ => None,
        }
    }
}

/// ppubs boolean default operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DefaultOperator {
    And,
    Or,
}

impl DefaultOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefaultOperator::And => "AND",
            DefaultOperator::Or => "OR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "AND" => Some(DefaultOperator::And),
            "OR" => Some(DefaultOperator::Or),
            _ => None,
        }
    }
}

/// Options only meaningful to the ppubs search syntax
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpubsOptions {
    pub collection: Collection,
    pub sort: String,
    pub default_operator: DefaultOperator,
    pub expand_plurals: bool,
    pub british_equivalents: bool,
}

impl Default for PpubsOptions {
    fn default() -> Self {
        Self {
            collection: Collection::Patents,
            sort: "date_publ desc".to_string(),
            default_operator: DefaultOperator::Or,
            expand_plurals: true,
            british_equivalents: true,
        }
    }
}

/// Search query parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Main search query string
    pub query: String,

    /// Structured filters
    #[serde(default)]
    pub filters: SearchFilters,

    /// Number of results to skip
    pub offset: u64,

    /// Maximum number of results to return
    pub limit: u32,

    /// ppubs-specific options
    #[serde(default)]
    pub ppubs: PpubsOptions,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            filters: SearchFilters::default(),
            offset: 0,
            limit: 100,
            ppubs: PpubsOptions::default(),
        }
    }
}

impl SearchQuery {
    /// Create a new search query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.filters.country = Some(country.into());
        self
    }

    pub fn date_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        let range = DateRange::new(start, end);
        self.filters.date_range = (!range.is_empty()).then_some(range);
        self
    }

    pub fn inventor(mut self, inventor: impl Into<String>) -> Self {
        self.filters.inventor = Some(inventor.into());
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.filters.assignee = Some(assignee.into());
        self
    }

    pub fn classification(mut self, code: impl Into<String>) -> Self {
        self.filters.classification = Some(code.into());
        self
    }

    pub fn collection(mut self, collection: Collection) -> Self {
        self.ppubs.collection = collection;
        self
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            offset: self.offset,
            limit: self.limit,
        }
    }
}

/// Pagination cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub offset: u64,
    pub limit: u32,
}

impl Cursor {
    /// The cursor for the page after this one, if `total` says there is one.
    ///
    /// Without a total, a full page is taken as a sign that more may follow.
    pub fn next(&self, returned: usize, total: Option<u64>) -> Option<Cursor> {
        let next_offset = self.offset + returned as u64;
        let more = match total {
            Some(total) => next_offset < total,
            None => returned as u64 >= u64::from(self.limit),
        };
        (more && returned > 0).then_some(Cursor {
            offset: next_offset,
            limit: self.limit,
        })
    }
}

/// Search response containing normalized records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Records found
    pub records: Vec<PatentRecord>,

    /// Total count as reported by the source (may be approximate)
    pub total: Option<u64>,

    /// Cursor for the next page
    pub next_cursor: Option<Cursor>,

    /// Raw records that could not be normalized
    pub dropped: usize,

    /// Source that produced the result
    pub source: SourceTag,
}

impl SearchResult {
    pub fn new(source: SourceTag, records: Vec<PatentRecord>) -> Self {
        Self {
            records,
            total: None,
            next_cursor: None,
            dropped: 0,
            source,
        }
    }

    /// Whether some upstream records were lost during normalization
    pub fn is_partial(&self) -> bool {
        self.dropped > 0
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Pass-through payload of an ODP endpoint
///
/// Bibliographic endpoints also carry the normalized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdpDocument {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<PatentRecord>,
    #[serde(serialize_with = "sorted_keys")]
    pub body: serde_json::Value,
}

/// Serialize a JSON value with every object's keys in sorted order
///
/// Output then does not depend on whether `serde_json` preserves insertion order.
pub fn sorted_keys<S: serde::Serializer>(value: &serde_json::Value, serializer: S) -> Result<S::Ok, S::Error> {
    SortedValue(value).serialize(serializer)
}

struct SortedValue<'a>(&'a serde_json::Value);

impl Serialize for SortedValue<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};
        match self.0 {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    out.serialize_entry(key, &SortedValue(value))?;
                }
                out.end()
            }
            serde_json::Value::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(&SortedValue(item))?;
                }
                out.end()
            }
            other => other.serialize(serializer),
        }
    }
}

/// Binary payload fetched from an upstream (PDF, bulk export)
#[derive(Clone, PartialEq)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_query_builder() {
        let query = SearchQuery::new("neural network")
            .limit(10)
            .offset(20)
            .country("US")
            .inventor("Jane Doe");

        assert_eq!(query.query, "neural network");
        assert_eq!(query.limit, 10);
        assert_eq!(query.offset, 20);
        assert_eq!(query.filters.country.as_deref(), Some("US"));
        assert_eq!(query.filters.inventor.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_odp_document_serializes_sorted_keys() {
        let doc = OdpDocument {
            operation: "get_app_metadata".to_string(),
            application_number: None,
            record: None,
            body: serde_json::json!({"zeta": 1, "alpha": {"y": [{"b": 2, "a": 1}], "x": null}}),
        };
        let text = serde_json::to_string(&doc).unwrap();
        assert!(text.ends_with(r#""body":{"alpha":{"x":null,"y":[{"a":1,"b":2}]},"zeta":1}}"#));
    }

    #[test]
    fn test_empty_date_range_is_dropped() {
        let query = SearchQuery::new("x").date_range(None, None);
        assert!(query.filters.date_range.is_none());
    }

    #[test]
    fn test_date_range_validity() {
        let a = NaiveDate::from_ymd_opt(2020, 1, 1);
        let b = NaiveDate::from_ymd_opt(2021, 1, 1);
        assert!(DateRange::new(a, b).is_valid());
        assert!(!DateRange::new(b, a).is_valid());
        assert!(DateRange::new(None, a).is_valid());
    }

    #[test]
    fn test_cursor_next_with_total() {
        let cursor = Cursor { offset: 0, limit: 10 };
        assert_eq!(
            cursor.next(10, Some(25)),
            Some(Cursor { offset: 10, limit: 10 })
        );
        assert_eq!(cursor.next(10, Some(10)), None);
    }

    #[test]
    fn test_cursor_next_without_total() {
        let cursor = Cursor { offset: 5, limit: 5 };
        assert_eq!(cursor.next(5, None), Some(Cursor { offset: 10, limit: 5 }));
        assert_eq!(cursor.next(3, None), None);
        assert_eq!(cursor.next(0, None), None);
    }

    #[test]
    fn test_collection_parse() {
        assert_eq!(Collection::parse("uspat"), Some(Collection::Patents));
        assert_eq!(Collection::parse("US-PGPUB"), Some(Collection::Applications));
        assert_eq!(Collection::parse("EPO"), None);
    }
}
