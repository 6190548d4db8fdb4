//! Module versions: ordering, extraction, parsing and import.

pub mod extractor;
pub mod git;
mod importer;
mod locks;
pub mod metadata;
pub mod terraform;
pub mod version;

pub use importer::{
    EXTRACTION_VERSION, GitImportRequest, ImportOutcome, ImportStatus, Importer, TagFailure,
    TagImportSummary, tag_for_version, version_from_tag,
};
pub use locks::{ImportGuard, ImportLocks};
pub use version::{LatestCache, LatestFilter, select_latest, sort_descending};
