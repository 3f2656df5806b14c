use serde_json::{Map, Value};

use super::{date, text, text_list, NormalizeError};
use crate::models::{PatentRecord, PatentRecordBuilder, RawPayload, SourceTag};

/// Decode BigQuery `f`/`v` rows into plain JSON objects keyed by column name.
///
/// `schema` is the `schema` object of a `jobs.query` response. Repeated
/// columns become arrays and RECORD columns nested objects. Integers,
/// floats and booleans are converted from their string encoding.
pub fn decode_rows(schema: &Value, rows: &[Value]) -> Vec<Value> {
    let fields = schema
        .get("fields")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    rows.iter().map(|row| decode_record(fields, row)).collect()
}

fn decode_record(fields: &[Value], row: &Value) -> Value {
    let cells = row
        .get("f")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut object = Map::new();
    for (field, cell) in fields.iter().zip(cells) {
        let Some(name) = field.get("name").and_then(Value::as_str) else {
            continue;
        };
        let value = cell.get("v").unwrap_or(&Value::Null);
        object.insert(name.to_string(), decode_cell(field, value));
    }
    Value::Object(object)
}

fn decode_cell(field: &Value, value: &Value) -> Value {
    let repeated = field.get("mode").and_then(Value::as_str) == Some("REPEATED");
    if repeated {
        let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
        return Value::Array(
            items
                .iter()
                .map(|item| decode_scalar(field, item.get("v").unwrap_or(&Value::Null)))
                .collect(),
        );
    }
    decode_scalar(field, value)
}

fn decode_scalar(field: &Value, value: &Value) -> Value {
    let kind = field.get("type").and_then(Value::as_str).unwrap_or("STRING");
    match (kind, value) {
        ("RECORD" | "STRUCT", Value::Object(_)) => {
            let nested = field
                .get("fields")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            decode_record(nested, value)
        }
        ("INTEGER" | "INT64", Value::String(s)) => s
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        ("FLOAT" | "FLOAT64", Value::String(s)) => s
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        ("BOOLEAN" | "BOOL", Value::String(s)) => Value::Bool(s.eq_ignore_ascii_case("true")),
        _ => value.clone(),
    }
}

/// Map one decoded publications row
pub fn bigquery_record(row: &Value) -> Result<PatentRecord, NormalizeError> {
    if !row.is_object() {
        return Err(NormalizeError::NotAnObject);
    }

    let identifier = text(row, &["publication_number"])
        .ok_or(NormalizeError::MissingField("publication_number"))?;

    let record = PatentRecordBuilder::new(
        identifier,
        text(row, &["title"]).unwrap_or_default(),
        SourceTag::BigQuery,
    )
    .abstract_text(text(row, &["abstract"]).unwrap_or_default())
    .claims(text(row, &["claims"]))
    .description(text(row, &["description"]))
    .inventors(text_list(row, &["inventors"], &["name"]))
    .assignees(text_list(row, &["assignees"], &["name"]))
    .filing_date(date(row, &["filing_date"]))
    .publication_date(date(row, &["publication_date"]))
    .grant_date(date(row, &["grant_date"]))
    .country(text(row, &["country_code"]).unwrap_or_default())
    .kind_code(text(row, &["kind_code"]))
    .classifications(text_list(row, &["cpc_codes"], &["code"]))
    .application_number(text(row, &["application_number"]))
    .raw(RawPayload::new(row.clone()))
    .build();

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "fields": [
                {"name": "publication_number", "type": "STRING", "mode": "NULLABLE"},
                {"name": "title", "type": "STRING", "mode": "NULLABLE"},
                {"name": "inventors", "type": "STRING", "mode": "REPEATED"},
                {"name": "publication_date", "type": "INTEGER", "mode": "NULLABLE"},
                {"name": "grant_date", "type": "INTEGER", "mode": "NULLABLE"},
                {"name": "cpc", "type": "RECORD", "mode": "REPEATED", "fields": [
                    {"name": "code", "type": "STRING"},
                    {"name": "first", "type": "BOOLEAN"}
                ]}
            ]
        })
    }

    #[test]
    fn test_decode_rows() {
        let rows = vec![json!({"f": [
            {"v": "US-10000000-B2"},
            {"v": "Widget"},
            {"v": [{"v": "JANE DOE"}, {"v": "JOHN ROE"}]},
            {"v": "20180619"},
            {"v": null},
            {"v": [{"v": {"f": [{"v": "G06N3/08"}, {"v": "true"}]}}]}
        ]})];

        let decoded = decode_rows(&schema(), &rows);
        assert_eq!(
            decoded[0],
            json!({
                "publication_number": "US-10000000-B2",
                "title": "Widget",
                "inventors": ["JANE DOE", "JOHN ROE"],
                "publication_date": 20180619,
                "grant_date": null,
                "cpc": [{"code": "G06N3/08", "first": true}]
            })
        );
    }

    #[test]
    fn test_decode_tolerates_short_rows() {
        let decoded = decode_rows(&schema(), &[json!({"f": [{"v": "US-1-A"}]})]);
        assert_eq!(decoded[0], json!({"publication_number": "US-1-A"}));
        assert!(decode_rows(&json!({}), &[json!({"f": []})])[0]
            .as_object()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_bigquery_record() {
        let row = json!({
            "publication_number": "US-10000000-B2",
            "application_number": "US-201514000000-A",
            "country_code": "US",
            "kind_code": "B2",
            "title": "Widget",
            "abstract": "A widget.",
            "inventors": ["JANE DOE"],
            "assignees": ["ACME CORP"],
            "filing_date": 20150301,
            "publication_date": 20180619,
            "grant_date": 20180619,
            "cpc_codes": ["G06N3/08", "G06N3/04"]
        });

        let record = bigquery_record(&row).unwrap();
        assert_eq!(record.identifier, "US-10000000-B2");
        assert_eq!(record.country, "US");
        assert_eq!(record.inventors, vec!["JANE DOE"]);
        assert_eq!(record.filing_date, NaiveDate::from_ymd_opt(2015, 3, 1));
        assert_eq!(record.classifications.len(), 2);
        assert!(record.claims.is_none());
    }

    #[test]
    fn test_zero_dates_are_absent() {
        let row = json!({"publication_number": "US-1-A", "grant_date": 0, "inventors": null});
        let record = bigquery_record(&row).unwrap();
        assert!(record.grant_date.is_none());
        assert!(record.inventors.is_empty());
    }
}
