//! Core data models for patent records and search operations.

mod patent;
mod search;

pub use patent::{PatentRecord, PatentRecordBuilder, RawPayload, SourceTag};
pub use search::{
    Artifact, Collection, Cursor, DateRange, DefaultOperator, OdpDocument, PpubsOptions,
    SearchFilters, SearchQuery, SearchResult, sorted_keys,
};
