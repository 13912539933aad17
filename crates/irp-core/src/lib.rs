// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! irp-core
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Run-record construction.
pub mod builder;
/// Packet types: raw and normalized values, measurement rows.
pub mod packet;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub use builder::RunRecordBuilder;
pub use packet::{CanonicalValue, MeasurementRow, NormalizedPacket, RawPacket};

/// Current schema version string embedded in job identities and run records.
///
/// # Examples
///
/// ```
/// assert_eq!(irp_core::SCHEMA_VERSION, "irp/v1");
/// ```
pub const SCHEMA_VERSION: &str = "irp/v1";

/// Version of the packet-hash algorithm. Hashes across versions are not
/// comparable.
pub const PACKET_HASH_VERSION: &str = "ph1";

/// Version of the job-id derivation algorithm.
pub const JOB_ID_VERSION: &str = "jid1";

// ---------------------------------------------------------------------------
// Field metadata
// ---------------------------------------------------------------------------

/// The closed set of field types a contract may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Short identifier-like text; internal whitespace runs collapse.
    Token,
    /// Multi-line prose; internal line breaks are preserved.
    FreeText,
    /// Arbitrary-precision decimal, serialized as a fixed-point string.
    Number,
    /// Calendar date, canonicalised to ISO 8601.
    Date,
}

/// How much a field matters to the pass/fail judgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    /// Must be present and parseable; absence rejects the run.
    Critical,
    /// Best-effort; a parse failure nulls the field with a warning.
    Reference,
}

// ---------------------------------------------------------------------------
// Job identity
// ---------------------------------------------------------------------------

/// The immutable identity of a job directory, as persisted in `job.json`.
///
/// Created once per `(wo_no, line)` job directory and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobIdentity {
    /// Immutable job identifier.
    pub job_id: String,
    /// Version of the job-id derivation algorithm.
    pub job_id_version: String,
    /// Schema version at creation time.
    pub schema_version: String,
    /// Timestamp the identity was first written.
    pub created_at: DateTime<Utc>,
    /// Work-order number recorded at creation.
    pub wo_no: String,
    /// Production line recorded at creation.
    pub line: String,
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Machine-readable warning codes. Non-fatal; accumulated on the run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    /// A reference field failed its type-directed parse and became null.
    ParseErrorReference,
    /// A slot was matched only by key prefix.
    PhotoLowConfidenceMatch,
    /// Multiple candidates matched a slot; one was auto-selected.
    PhotoDuplicateAutoSelected,
    /// One file matched two slots at the same tier; neither was mapped.
    PhotoAmbiguousMatch,
    /// fsync of a freshly published file failed; durability is degraded.
    FsyncFailed,
    /// A template placeholder had no packet value and resolved to empty.
    PlaceholderUnresolved,
    /// An override reason carried an unrecognised code and was rewritten.
    OverrideCodeRewritten,
}

impl WarningCode {
    /// The stable wire string for this code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseErrorReference => "PARSE_ERROR_REFERENCE",
            Self::PhotoLowConfidenceMatch => "PHOTO_LOW_CONFIDENCE_MATCH",
            Self::PhotoDuplicateAutoSelected => "PHOTO_DUPLICATE_AUTO_SELECTED",
            Self::PhotoAmbiguousMatch => "PHOTO_AMBIGUOUS_MATCH",
            Self::FsyncFailed => "FSYNC_FAILED",
            Self::PlaceholderUnresolved => "PLACEHOLDER_UNRESOLVED",
            Self::OverrideCodeRewritten => "OVERRIDE_CODE_REWRITTEN",
        }
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single non-fatal warning attached to a run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Warning {
    /// What went sideways.
    pub code: WarningCode,
    /// Ordinal action identifier within the run (assigned by the builder).
    pub action_id: String,
    /// The field or slot key this warning concerns.
    pub field_or_slot: String,
    /// The offending input, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_value: Option<String>,
    /// What the value was resolved to, when a resolution happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_value: Option<String>,
    /// Human-readable detail.
    pub message: String,
}

impl Warning {
    /// Create a warning with empty `action_id` (assigned at record time).
    pub fn new(
        code: WarningCode,
        field_or_slot: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            action_id: String::new(),
            field_or_slot: field_or_slot.into(),
            original_value: None,
            resolved_value: None,
            message: message.into(),
        }
    }

    /// Attach the offending input value.
    #[must_use]
    pub fn with_original(mut self, value: impl Into<String>) -> Self {
        self.original_value = Some(value.into());
        self
    }

    /// Attach the resolved value.
    #[must_use]
    pub fn with_resolved(mut self, value: impl Into<String>) -> Self {
        self.resolved_value = Some(value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Structured reason codes an operator may supply to bypass a missing
/// required field or slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideCode {
    /// The photo genuinely does not exist.
    MissingPhoto,
    /// The data source cannot supply the value.
    DataUnavailable,
    /// The customer asked for the omission.
    CustomerRequest,
    /// A measurement device failed.
    DeviceFailure,
    /// OCR could not read the label.
    OcrUnreadable,
    /// The field does not apply to this part.
    FieldNotApplicable,
    /// Anything else (also the rewrite target for unknown codes).
    Other,
}

impl OverrideCode {
    /// Parse a wire string into a code, returning `None` when unrecognised.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "MISSING_PHOTO" => Some(Self::MissingPhoto),
            "DATA_UNAVAILABLE" => Some(Self::DataUnavailable),
            "CUSTOMER_REQUEST" => Some(Self::CustomerRequest),
            "DEVICE_FAILURE" => Some(Self::DeviceFailure),
            "OCR_UNREADABLE" => Some(Self::OcrUnreadable),
            "FIELD_NOT_APPLICABLE" => Some(Self::FieldNotApplicable),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }

    /// The stable wire string for this code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingPhoto => "MISSING_PHOTO",
            Self::DataUnavailable => "DATA_UNAVAILABLE",
            Self::CustomerRequest => "CUSTOMER_REQUEST",
            Self::DeviceFailure => "DEVICE_FAILURE",
            Self::OcrUnreadable => "OCR_UNREADABLE",
            Self::FieldNotApplicable => "FIELD_NOT_APPLICABLE",
            Self::Other => "OTHER",
        }
    }
}

/// An operator-supplied override reason for a field or slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OverrideReason {
    /// Structured reason code.
    pub code: OverrideCode,
    /// Free-form detail (at least 10 visible characters, never a banned
    /// filler token).
    pub detail: String,
}

/// A recorded application of an override during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OverrideApplication {
    /// The field or slot key the override applies to.
    pub key: String,
    /// Structured reason code.
    pub code: OverrideCode,
    /// Free-form detail, preserved verbatim.
    pub detail: String,
    /// Acting user, when supplied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

// ---------------------------------------------------------------------------
// Photo processing
// ---------------------------------------------------------------------------

/// What the photo slot engine did for one slot during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PhotoAction {
    /// A raw file was published into `derived/`.
    Mapped,
    /// The previous derived file was moved into `_trash/`.
    Archived,
    /// The slot was satisfied by an operator override.
    Override,
    /// The (non-required) slot had no content.
    Missing,
    /// The slot was skipped (e.g. declined due to ambiguity).
    Skipped,
}

/// Confidence grade of a slot match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Exact basename match (or OCR-promoted prefix match).
    High,
    /// Basename-prefix match.
    Medium,
    /// Key-prefix match.
    Low,
    /// The file matched more than one slot at the same tier.
    Ambiguous,
}

/// Which matching rule selected the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    /// `<basename>.<ext>` with a declared extension.
    BasenameExact,
    /// Filename begins with the slot basename.
    BasenamePrefix,
    /// Filename begins with the slot key.
    KeyPrefix,
}

/// One per slot per run: the audit trail of the photo slot engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PhotoProcessingEntry {
    /// The slot this entry concerns.
    pub slot_key: String,
    /// What the engine did.
    pub action: PhotoAction,
    /// Source file under `raw/`, when one was selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_path: Option<String>,
    /// Published file under `derived/`, when one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_path: Option<String>,
    /// Where the superseded file went under `_trash/`, when one was moved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_path: Option<String>,
    /// Match confidence, when a match was attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// The rule that selected the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_by: Option<MatchedBy>,
    /// Whether an OCR probe confirmed the slot's declared keywords.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_verified: Option<bool>,
    /// The override reason, for `action: override` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<OverrideReason>,
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// What the retention purger does with an evicted `_trash/` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PurgeMode {
    /// Remove the bucket outright.
    Delete,
    /// Repack the bucket as a tarball under `_archive/`, then remove it.
    Compress,
    /// Leave eviction to an external process; the purger only reports.
    External,
}

/// Compiled retention policy for a job directory's `_trash/` tier.
///
/// Sizes are in bytes (the declarative contract file speaks MB/GB; the
/// loader converts). `total_bytes` is an operator-level host quota and is
/// not enforced in-pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RetentionPolicy {
    /// Age ceiling for archive buckets, in days.
    pub days: u32,
    /// Per-job size ceiling over `_trash/`, in bytes.
    pub per_job_bytes: u64,
    /// Host-level quota, in bytes. Advisory only.
    pub total_bytes: u64,
    /// Newest buckets always kept, regardless of age or size.
    pub min_keep_count: usize,
    /// Eviction behaviour.
    pub mode: PurgeMode,
    /// Directory (relative to `photos/`) receiving compressed buckets.
    pub archive_dir: String,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            days: 30,
            per_job_bytes: 512 * 1024 * 1024,
            total_bytes: 50 * 1024 * 1024 * 1024,
            min_keep_count: 3,
            mode: PurgeMode::Delete,
            archive_dir: "_archive".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run record
// ---------------------------------------------------------------------------

/// Terminal result of one pipeline attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    /// All stages completed and artifacts were published.
    Success,
    /// A stage rejected; no artifacts were published by this run.
    Rejected,
}

/// One structured record per pipeline attempt. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunRecord {
    /// Unique identifier of this attempt.
    pub run_id: Uuid,
    /// The job identity this run executed against (empty when the run was
    /// rejected before identity acquisition).
    pub job_id: String,
    /// Timestamp the attempt started.
    pub started_at: DateTime<Utc>,
    /// Timestamp the attempt finished.
    pub finished_at: DateTime<Utc>,
    /// Terminal result.
    pub result: RunResult,
    /// Stable reject code, for rejected runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    /// Structured reject context, for rejected runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_context: Option<BTreeMap<String, serde_json::Value>>,
    /// Judgement-equality hash over the normalized packet (non-free-text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_hash: Option<String>,
    /// Change-detection hash over every declared field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_full_hash: Option<String>,
    /// Non-fatal warnings accumulated across stages.
    pub warnings: Vec<Warning>,
    /// Overrides applied during this run.
    pub overrides: Vec<OverrideApplication>,
    /// Per-slot photo engine audit entries.
    pub photo_processing: Vec<PhotoProcessingEntry>,
    /// Version of the field-contract definition in force.
    pub definition_version: String,
    /// Schema version of this record.
    pub schema_version: String,
    /// Version of the packet-hash algorithm.
    pub packet_hash_version: String,
}

// ---------------------------------------------------------------------------
// Canonical JSON + hashing
// ---------------------------------------------------------------------------

/// Errors from contract-level operations (serialization, hashing).
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// JSON serialization or deserialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce a deterministic JSON string for hashing.
///
/// Not a full JCS implementation, but stable for our types: keys are sorted
/// (`serde_json::Value` maps are ordered) and all numeric field values are
/// decimal strings by construction, so no float formatting is involved.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the value cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, ContractError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
