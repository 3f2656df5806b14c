use serde_json::Value;

use super::{date, dedup_trimmed, normalize_batch, text, text_list, NormalizeError, NormalizedBatch};
use crate::models::{PatentRecord, PatentRecordBuilder, RawPayload, SourceTag};

/// Map every `patentFileWrapperDataBag` entry of an ODP response
pub fn odp_records(body: &Value) -> NormalizedBatch {
    let entries = body
        .get("patentFileWrapperDataBag")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    normalize_batch(SourceTag::Odp, entries, odp_record)
}

/// Map one file wrapper entry
pub fn odp_record(entry: &Value) -> Result<PatentRecord, NormalizeError> {
    if !entry.is_object() {
        return Err(NormalizeError::NotAnObject);
    }

    let application_number = text(entry, &["applicationNumberText"])
        .ok_or(NormalizeError::MissingField("applicationNumberText"))?;

    let meta = entry.get("applicationMetaData").unwrap_or(&Value::Null);

    // Recorded assignments win over the applicant list
    let mut assignees = dedup_trimmed(
        entry
            .get("assignmentBag")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .flat_map(|assignment| text_list(assignment, &["assigneeBag"], &["assigneeNameText"])),
    );
    if assignees.is_empty() {
        assignees = text_list(meta, &["applicantBag"], &["applicantNameText"]);
    }

    let record = PatentRecordBuilder::new(
        application_number.clone(),
        text(meta, &["inventionTitle"]).unwrap_or_default(),
        SourceTag::Odp,
    )
    .inventors(text_list(meta, &["inventorBag"], &["inventorNameText"]))
    .assignees(assignees)
    .filing_date(date(meta, &["filingDate", "effectiveFilingDate"]))
    .publication_date(date(meta, &["earliestPublicationDate"]))
    .grant_date(date(meta, &["grantDate"]))
    .country("US")
    .classifications(text_list(meta, &["cpcClassificationBag"], &[]))
    .application_number(Some(application_number))
    .raw(RawPayload::new(entry.clone()))
    .build();

    Ok(record)
}
