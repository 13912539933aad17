// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fluent construction of [`RunRecord`]s.
//!
//! A builder lives for exactly one pipeline attempt. Stages push warnings,
//! overrides, and photo entries as they happen; the run finishes through
//! [`RunRecordBuilder::finish_success`] or
//! [`RunRecordBuilder::finish_rejected`], both of which stamp `finished_at`.

use chrono::{DateTime, Utc};
use irp_error::PipelineError;
use uuid::Uuid;

use crate::{
    OverrideApplication, PACKET_HASH_VERSION, PhotoProcessingEntry, RunRecord, RunResult,
    SCHEMA_VERSION, Warning,
};

/// Builder for a single run's [`RunRecord`].
#[derive(Debug)]
pub struct RunRecordBuilder {
    run_id: Uuid,
    job_id: String,
    started_at: DateTime<Utc>,
    definition_version: String,
    packet_hash: Option<String>,
    packet_full_hash: Option<String>,
    warnings: Vec<Warning>,
    overrides: Vec<OverrideApplication>,
    photo_processing: Vec<PhotoProcessingEntry>,
}

impl RunRecordBuilder {
    /// Start a record for a fresh run attempt.
    ///
    /// `started_at` is stamped here; `job_id` stays empty until the identity
    /// stage resolves it.
    #[must_use]
    pub fn new(run_id: Uuid, definition_version: impl Into<String>) -> Self {
        Self {
            run_id,
            job_id: String::new(),
            started_at: Utc::now(),
            definition_version: definition_version.into(),
            packet_hash: None,
            packet_full_hash: None,
            warnings: Vec::new(),
            overrides: Vec::new(),
            photo_processing: Vec::new(),
        }
    }

    /// The run id this builder was issued for.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record the resolved job identity.
    pub fn set_job_id(&mut self, job_id: impl Into<String>) {
        self.job_id = job_id.into();
    }

    /// Record the judgement-equality hash.
    pub fn set_packet_hash(&mut self, hash: impl Into<String>) {
        self.packet_hash = Some(hash.into());
    }

    /// Record the full change-detection hash.
    pub fn set_packet_full_hash(&mut self, hash: impl Into<String>) {
        self.packet_full_hash = Some(hash.into());
    }

    /// Append a warning, assigning its ordinal `action_id`.
    pub fn push_warning(&mut self, mut warning: Warning) {
        warning.action_id = format!("act-{:03}", self.warnings.len() + 1);
        self.warnings.push(warning);
    }

    /// Append a batch of warnings in order.
    pub fn extend_warnings(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        for w in warnings {
            self.push_warning(w);
        }
    }

    /// Record an applied override.
    pub fn push_override(&mut self, application: OverrideApplication) {
        self.overrides.push(application);
    }

    /// Record the photo engine's per-slot audit entries.
    pub fn extend_photo_entries(
        &mut self,
        entries: impl IntoIterator<Item = PhotoProcessingEntry>,
    ) {
        self.photo_processing.extend(entries);
    }

    /// Number of warnings accumulated so far.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Finish the record as a success.
    #[must_use]
    pub fn finish_success(self) -> RunRecord {
        self.finish(RunResult::Success, None)
    }

    /// Finish the record as rejected, copying the error's code and context.
    #[must_use]
    pub fn finish_rejected(self, error: &PipelineError) -> RunRecord {
        let mut record = self.finish(RunResult::Rejected, Some(error.code.as_str().to_string()));
        if !error.context.is_empty() {
            record.reject_context = Some(error.context.clone());
        }
        record
    }

    fn finish(self, result: RunResult, reject_reason: Option<String>) -> RunRecord {
        RunRecord {
            run_id: self.run_id,
            job_id: self.job_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            result,
            reject_reason,
            reject_context: None,
            packet_hash: self.packet_hash,
            packet_full_hash: self.packet_full_hash,
            warnings: self.warnings,
            overrides: self.overrides,
            photo_processing: self.photo_processing,
            definition_version: self.definition_version,
            schema_version: SCHEMA_VERSION.to_string(),
            packet_hash_version: PACKET_HASH_VERSION.to_string(),
        }
    }
}
