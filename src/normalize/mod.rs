//! Mapping upstream payloads onto [`PatentRecord`].
//!
//! Each source has its own mapping table. Absent fields become empty
//! sequences or `None`; a record missing its identifier cannot be mapped and
//! is dropped from the batch, with the drop counted and logged.

mod bigquery;
mod odp;
mod ppubs;

pub use bigquery::{bigquery_record, decode_rows};
pub use odp::{odp_record, odp_records};
pub use ppubs::ppubs_record;

use chrono::NaiveDate;
use scraper::Html;
use serde_json::Value;

use crate::models::{PatentRecord, SourceTag};

/// Why a single upstream item could not be mapped
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("expected a JSON object")]
    NotAnObject,

    #[error("missing required field {0}")]
    MissingField(&'static str),
}

/// Records mapped from one upstream response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub records: Vec<PatentRecord>,
    /// Items that could not be mapped
    pub dropped: usize,
}

/// Map every item, dropping (and counting) the ones that fail
pub fn normalize_batch<'a, I, F>(source: SourceTag, items: I, mut map: F) -> NormalizedBatch
where
    I: IntoIterator<Item = &'a Value>,
    F: FnMut(&Value) -> Result<PatentRecord, NormalizeError>,
{
    let mut batch = NormalizedBatch::default();
    for item in items {
        match map(item) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                tracing::debug!("Dropping {} record: {}", source, e);
                batch.dropped += 1;
            }
        }
    }

    if batch.dropped > 0 {
        tracing::warn!(
            "Dropped {} of {} {} record(s) during normalization",
            batch.dropped,
            batch.dropped + batch.records.len(),
            source
        );
    }
    batch
}

/// First non-empty string among `keys`. Numbers are stringified and the
/// first element of an array is used.
pub(crate) fn text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| scalar_text(value.get(*key)?))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(scalar_text),
        _ => None,
    }
}

/// Strings from the first present key among `keys`.
///
/// Accepts arrays of strings, arrays of objects carrying one of
/// `object_keys`, or a single `;`-separated string. Order is kept and
/// duplicates are removed.
pub(crate) fn text_list(value: &Value, keys: &[&str], object_keys: &[&str]) -> Vec<String> {
    let Some(found) = keys.iter().find_map(|key| value.get(*key).filter(|v| !v.is_null())) else {
        return Vec::new();
    };

    let raw: Vec<String> = match found {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(_) => text(item, object_keys),
                other => scalar_text(other),
            })
            .collect(),
        Value::String(s) => s.split(';').map(str::to_string).collect(),
        _ => Vec::new(),
    };

    dedup_trimmed(raw)
}

pub(crate) fn dedup_trimmed(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|seen| seen == item) {
            out.push(item.to_string());
        }
    }
    out
}

/// Parse the date spellings upstreams use.
///
/// `20200131`, `2020-01-31`, `2020-01-31T00:00:00Z` and the integer
/// `20200131` all parse; BigQuery's `0` placeholder and anything else
/// unparseable give `None`.
pub(crate) fn parse_date(value: &Value) -> Option<NaiveDate> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        other => scalar_text(other)?,
    };
    let head: String = raw.chars().take(10).collect();
    if let Ok(date) = NaiveDate::parse_from_str(&head, "%Y-%m-%d") {
        return Some(date);
    }
    NaiveDate::parse_from_str(raw.get(..8)?, "%Y%m%d").ok()
}

pub(crate) fn date(value: &Value, keys: &[&str]) -> Option<NaiveDate> {
    keys.iter().find_map(|key| parse_date(value.get(*key)?))
}

/// Flatten an HTML fragment to whitespace-normalized text
pub fn flatten_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: Vec<&str> = fragment.root_element().text().collect();
    text.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of the first present key, flattening HTML when the value looks like markup
pub(crate) fn html_text(value: &Value, keys: &[&str]) -> Option<String> {
    let raw = text(value, keys)?;
    let flat = if raw.contains('<') {
        flatten_html(&raw)
    } else {
        raw
    };
    (!flat.is_empty()).then_some(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_prefers_first_present_key() {
        let v = json!({"a": "", "b": "second", "c": "third"});
        assert_eq!(text(&v, &["a", "b", "c"]).as_deref(), Some("second"));
        assert_eq!(text(&json!({"n": 42}), &["n"]).as_deref(), Some("42"));
        assert_eq!(text(&json!({"k": ["B2"]}), &["k"]).as_deref(), Some("B2"));
        assert_eq!(text(&v, &["missing"]), None);
    }

    #[test]
    fn test_text_list_shapes() {
        let v = json!({
            "plain": ["Doe; Jane", "Roe; John", "Doe; Jane"],
            "objects": [{"nameText": "ACME"}, {"other": 1}],
            "joined": "A; B ;",
        });
        assert_eq!(text_list(&v, &["plain"], &[]), vec!["Doe; Jane", "Roe; John"]);
        assert_eq!(text_list(&v, &["objects"], &["nameText"]), vec!["ACME"]);
        assert_eq!(text_list(&v, &["joined"], &[]), vec!["A", "B"]);
        assert!(text_list(&v, &["absent"], &[]).is_empty());
    }

    #[test]
    fn test_parse_date_spellings() {
        let expected = NaiveDate::from_ymd_opt(2020, 1, 31);
        assert_eq!(parse_date(&json!("20200131")), expected);
        assert_eq!(parse_date(&json!("2020-01-31")), expected);
        assert_eq!(parse_date(&json!("2020-01-31T00:00:00Z")), expected);
        assert_eq!(parse_date(&json!(20200131)), expected);
        assert_eq!(parse_date(&json!(0)), None);
        assert_eq!(parse_date(&json!("soon")), None);
        assert_eq!(parse_date(&Value::Null), None);
    }

    #[test]
    fn test_flatten_html() {
        assert_eq!(
            flatten_html("<p>A <b>bold</b>\n claim.</p><p>Second</p>"),
            "A bold claim. Second"
        );
        assert_eq!(flatten_html("plain"), "plain");
    }

    #[test]
    fn test_batch_counts_drops() {
        let items = vec![json!({"id": "1"}), json!("junk"), json!({"id": "2"})];
        let batch = normalize_batch(SourceTag::Odp, &items, |v| {
            let id = text(v, &["id"]).ok_or(NormalizeError::MissingField("id"))?;
            Ok(PatentRecord::new(id, "", SourceTag::Odp))
        });
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.dropped, 1);
    }
}
