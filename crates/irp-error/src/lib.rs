// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! irp-error
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Field-contract file loading errors.
    Contract,
    /// Pipeline configuration errors.
    Config,
    /// Intake session store errors.
    Intake,
    /// Type-directed normalization errors.
    Normalize,
    /// Field-contract validation errors.
    Validate,
    /// Photo slot engine errors.
    Photo,
    /// Job identity store errors.
    Identity,
    /// Template rendering errors.
    Render,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Contract => "contract",
            Self::Config => "config",
            Self::Intake => "intake",
            Self::Normalize => "normalize",
            Self::Validate => "validate",
            Self::Photo => "photo",
            Self::Identity => "identity",
            Self::Render => "render",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable reject code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases. These strings appear
/// verbatim in the `reject_reason` field of rejected run records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Contract --
    /// Two fields declare the same alias after case/whitespace folding.
    AliasCollision,
    /// The contract file failed to parse or is structurally invalid.
    ContractInvalid,

    // -- Config --
    /// The pipeline configuration failed validation.
    ConfigInvalid,

    // -- Normalize / Validate --
    /// A declared critical field is absent or null after normalization.
    MissingCriticalField,
    /// NaN or an infinity was observed in a numeric field.
    InvalidData,
    /// A critical field failed its type-directed parse.
    ParseErrorCritical,
    /// An override detail is banned or under length.
    InvalidOverrideReason,

    // -- Photo --
    /// A required slot lacks content and is not override-eligible.
    #[serde(alias = "MISSING_REQUIRED_PHOTO")]
    PhotoRequiredMissing,
    /// A required slot lacks content; an override is possible but absent.
    PhotoOverrideRequired,
    /// An archival move into `_trash/` failed; the prior derived content
    /// was preserved.
    ArchiveFailed,

    // -- Identity --
    /// `.job_json.lock/` could not be acquired within the configured attempts.
    JobJsonLockTimeout,
    /// Existing `job.json` identity fields disagree with the current packet.
    PacketJobMismatch,

    // -- Intake --
    /// Attempt to overwrite a session's extraction result.
    IntakeImmutableViolation,

    // -- Render --
    /// A template references a placeholder the contract does not declare.
    TemplateUnknownPlaceholder,

    // -- Internal --
    /// A stage deadline expired before the stage completed.
    DeadlineExceeded,
    /// Unexpected I/O failure.
    Io,
    /// Catch-all internal error.
    Internal,
}

impl ErrorCode {
    /// The stable wire string for this code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AliasCollision => "ALIAS_COLLISION",
            Self::ContractInvalid => "CONTRACT_INVALID",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::MissingCriticalField => "MISSING_CRITICAL_FIELD",
            Self::InvalidData => "INVALID_DATA",
            Self::ParseErrorCritical => "PARSE_ERROR_CRITICAL",
            Self::InvalidOverrideReason => "INVALID_OVERRIDE_REASON",
            Self::PhotoRequiredMissing => "PHOTO_REQUIRED_MISSING",
            Self::PhotoOverrideRequired => "PHOTO_OVERRIDE_REQUIRED",
            Self::ArchiveFailed => "ARCHIVE_FAILED",
            Self::JobJsonLockTimeout => "JOB_JSON_LOCK_TIMEOUT",
            Self::PacketJobMismatch => "PACKET_JOB_MISMATCH",
            Self::IntakeImmutableViolation => "INTAKE_IMMUTABLE_VIOLATION",
            Self::TemplateUnknownPlaceholder => "TEMPLATE_UNKNOWN_PLACEHOLDER",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Io => "IO",
            Self::Internal => "INTERNAL",
        }
    }

    /// The [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AliasCollision | Self::ContractInvalid => ErrorCategory::Contract,
            Self::ConfigInvalid => ErrorCategory::Config,
            Self::InvalidData | Self::ParseErrorCritical => ErrorCategory::Normalize,
            Self::MissingCriticalField | Self::InvalidOverrideReason => ErrorCategory::Validate,
            Self::PhotoRequiredMissing | Self::PhotoOverrideRequired | Self::ArchiveFailed => {
                ErrorCategory::Photo
            }
            Self::JobJsonLockTimeout | Self::PacketJobMismatch => ErrorCategory::Identity,
            Self::IntakeImmutableViolation => ErrorCategory::Intake,
            Self::TemplateUnknownPlaceholder => ErrorCategory::Render,
            Self::DeadlineExceeded | Self::Io | Self::Internal => ErrorCategory::Internal,
        }
    }

    /// HTTP status this code maps to at the service boundary.
    ///
    /// Lock contention and identity conflicts are `409`; contract violations
    /// in submitted data are `422`; everything internal is `500`.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::JobJsonLockTimeout
            | Self::PacketJobMismatch
            | Self::IntakeImmutableViolation => 409,
            Self::MissingCriticalField
            | Self::InvalidData
            | Self::ParseErrorCritical
            | Self::InvalidOverrideReason
            | Self::PhotoRequiredMissing
            | Self::PhotoOverrideRequired => 422,
            Self::AliasCollision | Self::ContractInvalid | Self::ConfigInvalid => 400,
            Self::TemplateUnknownPlaceholder => 500,
            Self::ArchiveFailed | Self::DeadlineExceeded | Self::Io | Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// A reject value that crosses stage boundaries.
///
/// Carries a stable [`ErrorCode`], a human-readable message, and structured
/// key-value context that is copied into the rejected run record's
/// `reject_context`.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct PipelineError {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Structured context for the run record.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl PipelineError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Attach a context entry, returning the updated error.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Wrap an I/O error, preserving the failed operation description.
    pub fn io(what: impl Into<String>, err: &std::io::Error) -> Self {
        Self::new(ErrorCode::Io, format!("{}: {err}", what.into()))
    }
}

/// Convenience alias for fallible pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- 1. Codes serialise to stable SCREAMING_SNAKE_CASE strings -----------

    #[test]
    fn codes_serialize_to_stable_strings() {
        let j = serde_json::to_string(&ErrorCode::PacketJobMismatch).unwrap();
        assert_eq!(j, "\"PACKET_JOB_MISMATCH\"");
        let j = serde_json::to_string(&ErrorCode::JobJsonLockTimeout).unwrap();
        assert_eq!(j, "\"JOB_JSON_LOCK_TIMEOUT\"");
    }

    // -- 2. as_str agrees with serde ----------------------------------------

    #[test]
    fn as_str_matches_serde_rename() {
        for code in [
            ErrorCode::MissingCriticalField,
            ErrorCode::InvalidData,
            ErrorCode::ParseErrorCritical,
            ErrorCode::PhotoRequiredMissing,
            ErrorCode::PhotoOverrideRequired,
            ErrorCode::ArchiveFailed,
            ErrorCode::InvalidOverrideReason,
            ErrorCode::IntakeImmutableViolation,
            ErrorCode::TemplateUnknownPlaceholder,
        ] {
            let wire = serde_json::to_string(&code).unwrap();
            assert_eq!(wire, format!("\"{}\"", code.as_str()));
        }
    }

    // -- 3. Legacy alias deserialises ----------------------------------------

    #[test]
    fn legacy_missing_required_photo_alias() {
        let code: ErrorCode = serde_json::from_str("\"MISSING_REQUIRED_PHOTO\"").unwrap();
        assert_eq!(code, ErrorCode::PhotoRequiredMissing);
    }

    // -- 4. HTTP mapping for conflict-class errors ---------------------------

    #[test]
    fn conflict_errors_map_to_409() {
        assert_eq!(ErrorCode::JobJsonLockTimeout.http_status(), 409);
        assert_eq!(ErrorCode::PacketJobMismatch.http_status(), 409);
        assert_eq!(ErrorCode::IntakeImmutableViolation.http_status(), 409);
    }

    // -- 5. Validation errors map to 422 -------------------------------------

    #[test]
    fn validation_errors_map_to_422() {
        assert_eq!(ErrorCode::MissingCriticalField.http_status(), 422);
        assert_eq!(ErrorCode::InvalidData.http_status(), 422);
        assert_eq!(ErrorCode::PhotoOverrideRequired.http_status(), 422);
    }

    // -- 6. Error context round-trips ----------------------------------------

    #[test]
    fn error_context_roundtrip() {
        let err = PipelineError::new(ErrorCode::PacketJobMismatch, "wo_no differs")
            .with_context("recorded", "WO-001")
            .with_context("submitted", "WO-002");
        let json = serde_json::to_string(&err).unwrap();
        let back: PipelineError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, ErrorCode::PacketJobMismatch);
        assert_eq!(back.context["recorded"], "WO-001");
        assert_eq!(back.context["submitted"], "WO-002");
    }

    // -- 7. Display carries code and message ---------------------------------

    #[test]
    fn display_carries_code_and_message() {
        let err = PipelineError::new(ErrorCode::ArchiveFailed, "rename failed");
        let s = err.to_string();
        assert!(s.contains("ARCHIVE_FAILED"));
        assert!(s.contains("rename failed"));
    }

    // -- 8. Category assignment ----------------------------------------------

    #[test]
    fn category_assignment() {
        assert_eq!(ErrorCode::ArchiveFailed.category(), ErrorCategory::Photo);
        assert_eq!(ErrorCode::PacketJobMismatch.category(), ErrorCategory::Identity);
        assert_eq!(ErrorCode::InvalidData.category(), ErrorCategory::Normalize);
        assert_eq!(format!("{}", ErrorCategory::Photo), "photo");
    }
}
