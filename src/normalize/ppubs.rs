use serde_json::Value;

use super::{date, dedup_trimmed, html_text, text, text_list, NormalizeError};
use crate::models::{PatentRecord, PatentRecordBuilder, RawPayload, SourceTag};

const CPC_KEYS: &[&str] = &[
    "cpcInventive",
    "cpcAdditional",
    "cpcInventiveFlattened",
    "cpcAdditionalFlattened",
    "cpcCodes",
];

/// Map a ppubs search hit or highlighted document
pub fn ppubs_record(value: &Value) -> Result<PatentRecord, NormalizeError> {
    if !value.is_object() {
        return Err(NormalizeError::NotAnObject);
    }

    let identifier = text(
        value,
        &["patentNumber", "publicationReferenceDocumentNumber", "documentId"],
    )
    .ok_or(NormalizeError::MissingField("patentNumber"))?;

    let document_type = text(value, &["type", "documentType", "source"]);
    let publication_date = date(value, &["datePublished", "publicationDate"]);
    let granted = document_type.as_deref() == Some("USPAT");

    let mut inventors = text_list(
        value,
        &["inventors", "inventorsName", "inventorNames"],
        &["name", "nameText", "inventorName"],
    );
    if inventors.is_empty() {
        // "Last; First et al." is one display string, not a list
        inventors.extend(text(value, &["inventorsShort"]));
    }

    let classifications = dedup_trimmed(
        CPC_KEYS
            .iter()
            .flat_map(|key| text_list(value, &[*key], &["code", "cpc"])),
    );

    let record = PatentRecordBuilder::new(
        identifier,
        text(value, &["inventionTitle", "title"]).unwrap_or_default(),
        SourceTag::Ppubs,
    )
    .abstract_text(html_text(value, &["abstractHtml", "abstract"]).unwrap_or_default())
    .claims(html_text(value, &["claimsHtml", "claims"]))
    .description(html_text(value, &["descriptionHtml", "description"]))
    .inventors(inventors)
    .assignees(text_list(
        value,
        &["assigneeName", "assignees", "assigneeNames"],
        &["name", "nameText", "assigneeName"],
    ))
    .filing_date(date(value, &["applicationFilingDate", "filingDate"]))
    .publication_date(publication_date)
    .grant_date(if granted { publication_date } else { None })
    .country("US")
    .kind_code(text(value, &["kindCode"]))
    .classifications(classifications)
    .application_number(text(value, &["applicationNumber"]))
    .guid(text(value, &["guid"]))
    .document_type(document_type)
    .image_location(text(value, &["imageLocation"]))
    .page_count(text(value, &["pageCount"]).and_then(|p| p.parse().ok()))
    .raw(RawPayload::new(value.clone()))
    .build();

    Ok(record)
}
