//! Document pipeline collaborators driven by the stress lab.
//!
//! The stress lab treats document construction as a black box reached through
//! three narrow contracts:
//! - [`DocumentBuilder`]: payload sections in, archive bytes out;
//! - [`ContentSizeChecker`]: compact oversized fields before the build;
//! - [`ArchiveInspector`]: list the entries of a built archive.
//!
//! plus the shared [`is_transient_key`] sanitizer. This crate defines those
//! contracts and ships reference implementations ([`ReferenceDeckBuilder`],
//! [`FieldBudgetCompactor`], [`StoredZipInspector`]) so the harness is
//! runnable end-to-end without the production deck generator.

pub mod archive;
pub mod compact;
pub mod deck;
pub mod sanitize;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use archive::{StoredZipInspector, build_stored_zip};
pub use compact::FieldBudgetCompactor;
pub use deck::ReferenceDeckBuilder;
pub use sanitize::{is_transient_key, strip_transient_keys};

/// Archive entry every built deck must contain.
pub const CONTENT_TYPES_ENTRY: &str = "[Content_Types].xml";

/// Archive entry holding the presentation part.
pub const PRESENTATION_ENTRY: &str = "ppt/presentation.xml";

/// Errors raised by collaborators.
///
/// The `Display` strings are part of the contract: the stress lab classifies
/// failures by matching on them, so builder-side validation rejections carry
/// the `[PPT]` prefix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocgenError {
    /// Intentional rejection by the builder's content-quality gates.
    #[error("[PPT] Data gate failed: {reason}")]
    DataGate { reason: String },

    /// A text field is longer than the builder accepts.
    #[error("[PPT] Field {path} exceeds {limit} chars (got {actual})")]
    FieldTooLong {
        path: String,
        limit: usize,
        actual: usize,
    },

    /// The content-size stage refused the payload.
    #[error("Content size gate: {0}")]
    ContentSize(String),

    /// Rendering failed after validation passed.
    #[error("render failed in {stage}: {detail}")]
    Render { stage: String, detail: String },

    /// An archive could not be written or parsed.
    #[error("archive error: {0}")]
    Archive(String),
}

impl DocgenError {
    /// Create a data-gate rejection.
    pub fn data_gate(reason: impl Into<String>) -> Self {
        Self::DataGate {
            reason: reason.into(),
        }
    }

    /// Create a render error.
    pub fn render(stage: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Render {
            stage: stage.into(),
            detail: detail.into(),
        }
    }
}

/// Builds a document archive from the three top-level payload sections.
pub trait DocumentBuilder: Send + Sync {
    /// Build the archive bytes.
    ///
    /// Implementations may also panic on internal bugs; the stress lab
    /// catches unwinding panics and records them as runtime crashes.
    fn build_document(
        &self,
        synthesis: &Value,
        country_analysis: &Value,
        scope: &Value,
    ) -> Result<Vec<u8>, DocgenError>;
}

/// Options for [`ContentSizeChecker::check_content_size`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SizeCheckOptions {
    /// Report what would be compacted without changing the payload.
    pub dry_run: bool,
}

/// One compaction performed (or planned, in dry-run mode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionEntry {
    /// JSON pointer of the compacted field.
    pub path: String,
    /// Length before compaction, in chars.
    pub original_chars: usize,
    /// Length after compaction, in chars.
    pub compacted_chars: usize,
}

/// Result of a content-size check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeCheckOutcome {
    /// The (possibly compacted) country analysis.
    pub payload: Value,
    /// Every field that was, or would be, compacted.
    pub compaction_log: Vec<CompactionEntry>,
}

/// Compacts oversized fields before the build.
pub trait ContentSizeChecker: Send + Sync {
    fn check_content_size(
        &self,
        country_analysis: &Value,
        options: SizeCheckOptions,
    ) -> Result<SizeCheckOutcome, DocgenError>;
}

/// A single entry in an archive's central directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub name: String,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

/// Entries found in an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveListing {
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveListing {
    /// Whether an entry with exactly this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }
}

/// Parses archive bytes far enough to list their entries.
pub trait ArchiveInspector: Send + Sync {
    fn parse_archive(&self, bytes: &[u8]) -> Result<ArchiveListing, DocgenError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_gate_display_carries_ppt_prefix() {
        let err = DocgenError::data_gate("synthesis is not an object");
        assert_eq!(
            err.to_string(),
            "[PPT] Data gate failed: synthesis is not an object"
        );
    }

    #[test]
    fn field_too_long_display_mentions_limit() {
        let err = DocgenError::FieldTooLong {
            path: "/synthesis/executiveSummary/0".to_owned(),
            limit: 5000,
            actual: 15000,
        };
        assert!(err.to_string().contains("exceeds 5000 chars"));
    }

    #[test]
    fn listing_contains() {
        let listing = ArchiveListing {
            entries: vec![ArchiveEntry {
                name: PRESENTATION_ENTRY.to_owned(),
                compressed_size: 10,
                uncompressed_size: 10,
            }],
        };
        assert!(listing.contains(PRESENTATION_ENTRY));
        assert!(!listing.contains(CONTENT_TYPES_ENTRY));
    }
}
