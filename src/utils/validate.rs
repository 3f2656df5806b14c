//! Input validation for identifiers, pagination and filters.
//!
//! Everything here runs before a request leaves the process, so a malformed
//! call never reaches an upstream.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Country codes the Google Patents tools accept
pub const GOOGLE_COUNTRIES: &[&str] = &[
    "US", "EP", "WO", "JP", "CN", "KR", "GB", "DE", "FR", "CA", "AU",
];

/// Validation error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required parameter: {0}")]
    Missing(&'static str),

    #[error("limit must be between 1 and {max}, got {got}")]
    LimitOutOfRange { got: u64, max: u32 },

    #[error("invalid patent number: {0}")]
    InvalidPatentNumber(String),

    #[error("invalid application number: {0}")]
    InvalidApplicationNumber(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid country code {got}; must be one of: {allowed}")]
    InvalidCountry { got: String, allowed: String },

    #[error("invalid date {0}; expected YYYYMMDD or YYYY-MM-DD")]
    InvalidDate(String),

    #[error("start date {start} is after end date {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Check a page size against a source maximum
pub fn validate_limit(limit: u64, max: u32) -> Result<u32, ValidationError> {
    if limit == 0 || limit > u64::from(max) {
        return Err(ValidationError::LimitOutOfRange { got: limit, max });
    }
    Ok(limit as u32)
}

/// Reject empty or whitespace-only required text
pub fn require_text<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, ValidationError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::Missing(field)),
    }
}

/// Validate an opaque identifier used in a URL path (GUIDs, product ids)
///
/// Identifiers may only contain alphanumerics, hyphens, underscores and dots,
/// and never a `..` sequence.
pub fn sanitize_identifier(id: &str) -> Result<String, ValidationError> {
    let id = id.trim();

    if id.is_empty() {
        return Err(ValidationError::InvalidIdentifier("empty identifier".to_string()));
    }

    if id.contains("..") {
        return Err(ValidationError::InvalidIdentifier(format!(
            "path traversal in {}",
            id
        )));
    }

    if let Some(ch) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(ValidationError::InvalidIdentifier(format!(
            "{} contains disallowed character {:?}",
            id, ch
        )));
    }

    Ok(id.to_string())
}

/// A US patent number split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatentNumber {
    /// Document number without country or kind, e.g. `10000000` or `D900000`
    pub number: String,
    /// Kind code, e.g. `B2`
    pub kind: Option<String>,
}

impl PatentNumber {
    /// Canonical compact form, e.g. `US10000000B2`
    pub fn canonical(&self) -> String {
        format!("US{}{}", self.number, self.kind.as_deref().unwrap_or(""))
    }
}

fn us_patent_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:US)?((?:RE|PP|D|H|T)?)0*(\d{1,8})([ABCEPS]\d?)?$")
            .expect("static regex")
    })
}

/// Parse a US granted patent number in any of its usual spellings
///
/// Accepts `10000000`, `US10000000B2`, `US-10,000,000-B2`, `D900000`, `RE49000`.
pub fn parse_us_patent_number(input: &str) -> Result<PatentNumber, ValidationError> {
    let compact: String = input
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | ',' | '-' | '/'))
        .collect();

    let caps = us_patent_regex()
        .captures(&compact)
        .ok_or_else(|| ValidationError::InvalidPatentNumber(input.to_string()))?;

    let prefix = caps.get(1).map_or("", |m| m.as_str());
    let digits = caps.get(2).map_or("", |m| m.as_str());

    Ok(PatentNumber {
        number: format!("{}{}", prefix, digits),
        kind: caps.get(3).map(|m| m.as_str().to_string()),
    })
}

fn publication_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z]{2})-?([A-Z]{0,2}\d+)(?:-?([A-Z]\d?))?$").expect("static regex")
    })
}

/// Normalize a publication number to the hyphenated dataset form
///
/// `US10000000B2` and `us-10000000-b2` both become `US-10000000-B2`.
pub fn normalize_publication_number(input: &str) -> Result<String, ValidationError> {
    let compact = input.trim().to_uppercase().replace(' ', "");
    let caps = publication_regex()
        .captures(&compact)
        .ok_or_else(|| ValidationError::InvalidPatentNumber(input.to_string()))?;

    let mut normalized = format!("{}-{}", &caps[1], &caps[2]);
    if let Some(kind) = caps.get(3) {
        normalized.push('-');
        normalized.push_str(kind.as_str());
    }
    Ok(normalized)
}

/// Validate an application number, stripping the usual separators
///
/// `14/412,875` becomes `14412875`.
pub fn normalize_application_number(input: &str) -> Result<String, ValidationError> {
    let compact: String = input
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | ',' | ' ' | '-'))
        .collect();

    let valid = (6..=20).contains(&compact.len())
        && compact.chars().all(|c| c.is_ascii_alphanumeric())
        && compact.chars().any(|c| c.is_ascii_digit());

    if !valid {
        return Err(ValidationError::InvalidApplicationNumber(input.to_string()));
    }
    Ok(compact.to_uppercase())
}

/// Validate a Google Patents country code
pub fn validate_country(code: &str) -> Result<String, ValidationError> {
    let code = code.trim().to_uppercase();
    if GOOGLE_COUNTRIES.contains(&code.as_str()) {
        Ok(code)
    } else {
        Err(ValidationError::InvalidCountry {
            got: code,
            allowed: GOOGLE_COUNTRIES.join(", "),
        })
    }
}

/// Parse `YYYYMMDD` or `YYYY-MM-DD`
pub fn parse_date(input: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = input.trim();
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .map_err(|_| ValidationError::InvalidDate(input.to_string()))
}

/// Parse an optional date pair and reject inverted ranges
pub fn parse_date_range(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(Option<NaiveDate>, Option<NaiveDate>), ValidationError> {
    let start = start.map(parse_date).transpose()?;
    let end = end.map(parse_date).transpose()?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(ValidationError::InvertedDateRange { start: s, end: e });
        }
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_limit() {
        assert_eq!(validate_limit(10, 500), Ok(10));
        assert_eq!(validate_limit(500, 500), Ok(500));
        assert!(validate_limit(0, 500).is_err());
        assert_eq!(
            validate_limit(501, 500),
            Err(ValidationError::LimitOutOfRange { got: 501, max: 500 })
        );
    }

    #[test]
    fn test_require_text() {
        assert_eq!(require_text(Some(" q "), "query"), Ok("q"));
        assert_eq!(
            require_text(Some("   "), "query"),
            Err(ValidationError::Missing("query"))
        );
        assert!(require_text(None, "query").is_err());
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(
            sanitize_identifier("US-10000000-B2").unwrap(),
            "US-10000000-B2"
        );
        assert!(sanitize_identifier("").is_err());
        assert!(sanitize_identifier("../etc/passwd").is_err());
        assert!(sanitize_identifier("abc?x=1").is_err());
        assert!(sanitize_identifier("abc/def").is_err());
    }

    #[test]
    fn test_parse_us_patent_number_spellings() {
        let expected = PatentNumber {
            number: "10000000".to_string(),
            kind: Some("B2".to_string()),
        };
        assert_eq!(parse_us_patent_number("US10000000B2").unwrap(), expected);
        assert_eq!(parse_us_patent_number("US-10,000,000-B2").unwrap(), expected);
        assert_eq!(parse_us_patent_number("us 10000000 b2").unwrap(), expected);

        let bare = parse_us_patent_number("9876543").unwrap();
        assert_eq!(bare.number, "9876543");
        assert_eq!(bare.kind, None);

        assert_eq!(parse_us_patent_number("D900000").unwrap().number, "D900000");
        assert_eq!(parse_us_patent_number("RE49000E").unwrap().number, "RE49000");
        assert!(parse_us_patent_number("EP1234567").is_err());
        assert!(parse_us_patent_number("").is_err());
    }

    #[test]
    fn test_canonical_patent_number() {
        let number = parse_us_patent_number("US-10000000-B2").unwrap();
        assert_eq!(number.canonical(), "US10000000B2");
    }

    #[test]
    fn test_normalize_publication_number() {
        assert_eq!(
            normalize_publication_number("US10000000B2").unwrap(),
            "US-10000000-B2"
        );
        assert_eq!(
            normalize_publication_number("us-9876543-b1").unwrap(),
            "US-9876543-B1"
        );
        assert_eq!(
            normalize_publication_number("EP-1234567").unwrap(),
            "EP-1234567"
        );
        assert!(normalize_publication_number("not a number").is_err());
    }

    #[test]
    fn test_normalize_application_number() {
        assert_eq!(
            normalize_application_number("14/412,875").unwrap(),
            "14412875"
        );
        assert!(normalize_application_number("12").is_err());
        assert!(normalize_application_number("abc?def").is_err());
    }

    #[test]
    fn test_validate_country() {
        assert_eq!(validate_country("us").unwrap(), "US");
        assert!(validate_country("XX").is_err());
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(
            parse_date("20220101").unwrap(),
            NaiveDate::from_ymd_opt(2022, 1, 1).unwrap()
        );
        assert_eq!(
            parse_date("2022-01-31").unwrap(),
            NaiveDate::from_ymd_opt(2022, 1, 31).unwrap()
        );
        assert!(parse_date("2022-13-01").is_err());
        assert!(parse_date_range(Some("20230101"), Some("20220101")).is_err());
        assert_eq!(parse_date_range(None, None).unwrap(), (None, None));
    }
}
