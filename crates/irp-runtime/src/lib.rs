// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! irp-runtime
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Delivery packaging: deliverables folder, manifest, on-demand bundle.
pub mod deliver;
/// Run-log persistence.
pub mod runlog;

use chrono::Utc;
use irp_config::PipelineConfig;
use irp_contract::FieldContract;
use irp_core::{PhotoAction, RawPacket, RunRecord, RunRecordBuilder};
use irp_error::{ErrorCode, PipelineError, PipelineResult};
use irp_identity::{JobStore, LockSettings};
use irp_intake::FieldExtractor;
use irp_photos::{OcrProbe, PhotoEngine};
use irp_policy::OverrideInput;
use irp_render::Template;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub use deliver::{DeliveryManifest, DeliveryPackager, ManifestEntry};
pub use runlog::RunLogStore;

// Re-exported so hosts can wire providers without naming the leaf crates.
pub use irp_intake::MockFieldExtractor;
pub use irp_photos::NoopOcr;

/// Stage deadline: an optional wall-clock budget checked between stages.
#[derive(Debug, Clone, Copy)]
pub struct StageDeadline {
    expires: Option<Instant>,
}

impl StageDeadline {
    /// A deadline `budget` from now, or unbounded when `None`.
    #[must_use]
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            expires: budget.map(|b| Instant::now() + b),
        }
    }

    /// Reject with `DEADLINE_EXCEEDED` when the budget is spent.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::DeadlineExceeded`] past the deadline.
    pub fn check(&self, stage: &str) -> PipelineResult<()> {
        if let Some(expires) = self.expires
            && Instant::now() >= expires
        {
            return Err(PipelineError::new(
                ErrorCode::DeadlineExceeded,
                format!("deadline expired before stage '{stage}'"),
            )
            .with_context("stage", stage));
        }
        Ok(())
    }
}

/// The outcome handed back to the caller: the run record always exists,
/// artifacts only on success.
#[derive(Debug)]
pub struct RunReport {
    /// The materialised run record (success or rejected).
    pub record: RunRecord,
    /// Download manifest, on success.
    pub manifest: Option<DeliveryManifest>,
    /// Where the run record was written, when the write succeeded.
    pub log_path: Option<PathBuf>,
    /// The reject, when the run was rejected.
    pub error: Option<PipelineError>,
}

impl RunReport {
    /// Whether the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The sequential stage machine over one job directory.
#[derive(Debug)]
pub struct Pipeline<'a> {
    contract: &'a FieldContract,
    config: &'a PipelineConfig,
    template: &'a Template,
}

impl<'a> Pipeline<'a> {
    /// Assemble a pipeline from its immutable collaborators.
    #[must_use]
    pub fn new(contract: &'a FieldContract, config: &'a PipelineConfig, template: &'a Template) -> Self {
        Self {
            contract,
            config,
            template,
        }
    }

    /// Run the pipeline once against a job directory.
    ///
    /// Every attempt materialises a run record before this returns, success
    /// and reject alike. The job-directory lock is held across all
    /// mutations (identity, photo publication, render, packaging) and
    /// released before the record is written.
    pub fn run(
        &self,
        job_dir: &Path,
        raw: &RawPacket,
        overrides: &BTreeMap<String, OverrideInput>,
        ocr: &dyn OcrProbe,
        budget: Option<Duration>,
    ) -> RunReport {
        let run_id = JobStore::issue_run_id();
        let mut builder = RunRecordBuilder::new(run_id, self.contract.version());
        let runlog = RunLogStore::new(job_dir.join("logs"));
        let deadline = StageDeadline::new(budget);

        info!(target: "irp.runtime", run_id = %run_id, job_dir = %job_dir.display(), "run started");
        match self.execute(job_dir, raw, overrides, ocr, &deadline, &mut builder) {
            Ok(manifest) => {
                let record = builder.finish_success();
                let log_path = match runlog.save(&record) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        warn!(target: "irp.runtime", error = %e, "run-log write failed");
                        None
                    }
                };
                info!(target: "irp.runtime", run_id = %run_id, "run succeeded");
                RunReport {
                    record,
                    manifest: Some(manifest),
                    log_path,
                    error: None,
                }
            }
            Err(err) => {
                let record = builder.finish_rejected(&err);
                let log_path = match runlog.save(&record) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        warn!(target: "irp.runtime", error = %e, "run-log write failed");
                        None
                    }
                };
                info!(target: "irp.runtime", run_id = %run_id, reject = err.code.as_str(), "run rejected");
                RunReport {
                    record,
                    manifest: None,
                    log_path,
                    error: Some(err),
                }
            }
        }
    }

    fn execute(
        &self,
        job_dir: &Path,
        raw: &RawPacket,
        overrides: &BTreeMap<String, OverrideInput>,
        ocr: &dyn OcrProbe,
        deadline: &StageDeadline,
        builder: &mut RunRecordBuilder,
    ) -> PipelineResult<DeliveryManifest> {
        deadline.check("normalize")?;
        let (packet, warnings) = irp_normalize::normalize_packet(self.contract, raw)?;
        builder.extend_warnings(warnings);

        let wo_no = packet
            .wo_no()
            .ok_or_else(|| {
                PipelineError::new(ErrorCode::MissingCriticalField, "wo_no is missing")
                    .with_context("field", "wo_no")
            })?
            .to_string();
        let line = packet
            .line()
            .ok_or_else(|| {
                PipelineError::new(ErrorCode::MissingCriticalField, "line is missing")
                    .with_context("field", "line")
            })?
            .to_string();

        // Photo planning is read-only and carries the OCR probes, so it runs
        // before the lock.
        deadline.check("plan_photos")?;
        let photos_dir = job_dir.join("photos");
        let engine = PhotoEngine::new(self.contract, &photos_dir);
        let (plans, photo_warnings) = engine.plan(ocr)?;
        builder.extend_warnings(photo_warnings);
        let content = PhotoEngine::content_map(&plans);

        deadline.check("validate")?;
        let outcome = irp_policy::validate_packet(self.contract, &packet, overrides, &content)?;
        builder.extend_warnings(outcome.warnings.clone());
        for application in outcome.applications.clone() {
            builder.push_override(application);
        }

        deadline.check("fingerprint")?;
        let prints = irp_fingerprint::fingerprint(self.contract, &packet)
            .map_err(|e| PipelineError::new(ErrorCode::Internal, format!("fingerprint: {e}")))?;
        builder.set_packet_hash(prints.packet_hash);
        builder.set_packet_full_hash(prints.packet_full_hash);

        deadline.check("acquire_lock")?;
        let store = JobStore::new(job_dir);
        let settings = LockSettings {
            retry_interval: Duration::from_millis(self.config.lock_retry_interval_ms),
            max_retries: self.config.lock_max_retries,
        };
        let lock = store.acquire(&settings)?;

        // Everything below mutates the job directory and runs under the
        // lock; the closure keeps the release on every path.
        let result = (|| -> PipelineResult<DeliveryManifest> {
            deadline.check("identity")?;
            let identity = store.load_or_create(&lock, &wo_no, &line)?;
            builder.set_job_id(&identity.job_id);

            deadline.check("publish_photos")?;
            let (entries, commit_warnings) =
                engine.commit(&plans, &outcome.reasons, builder.run_id(), Utc::now())?;
            builder.extend_warnings(commit_warnings);

            let mut photo_map = BTreeMap::new();
            let mut overridden = BTreeSet::new();
            for entry in &entries {
                match entry.action {
                    PhotoAction::Mapped => {
                        if let Some(name) = &entry.derived_path {
                            photo_map.insert(entry.slot_key.clone(), engine.derived_dir().join(name));
                        }
                    }
                    PhotoAction::Override => {
                        overridden.insert(entry.slot_key.clone());
                    }
                    _ => {}
                }
            }
            builder.extend_photo_entries(entries);

            deadline.check("render")?;
            if self.config.generate_pdf {
                debug!(target: "irp.runtime", "generate_pdf is set; this renderer has no PDF engine, skipping");
            }
            let (artifacts, render_warnings) = irp_render::render(
                self.template,
                self.contract,
                &packet,
                &photo_map,
                &overridden,
                Utc::now(),
            )?;
            builder.extend_warnings(render_warnings);

            deadline.check("deliver")?;
            let packager = DeliveryPackager::new(job_dir.join("deliverables"));
            let manifest = packager.publish(&artifacts)?;

            // Retention housekeeping rides along after archival; a failed
            // purge never fails the run.
            let policy = self
                .contract
                .retention()
                .cloned()
                .unwrap_or_else(|| self.config.retention.clone());
            if let Err(e) = irp_photos::purge_trash(&photos_dir, &policy, Utc::now()) {
                warn!(target: "irp.runtime", error = %e, "retention purge failed");
            }

            Ok(manifest)
        })();
        drop(lock);
        result
    }
}

/// Run field extraction for a session and feed the result into the intake
/// store, returning the extracted raw values.
///
/// A convenience for hosts: extraction happens before the pipeline proper
/// and never under the job-directory lock.
///
/// # Errors
///
/// Provider failures surface as [`ErrorCode::Internal`]; an already-recorded
/// extraction surfaces as [`ErrorCode::IntakeImmutableViolation`].
pub fn extract_into_session(
    store: &irp_intake::SessionStore,
    session_id: &str,
    extractor: &dyn FieldExtractor,
) -> PipelineResult<BTreeMap<String, String>> {
    let session = store.open_or_create(session_id)?;
    let draft = extractor
        .extract(&session.messages, &session.uploads)
        .map_err(|e| PipelineError::new(ErrorCode::Internal, format!("extraction failed: {e}")))?;
    let fields = draft.fields.clone();
    store.record_extraction(session_id, draft)?;
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- 1. Unbounded deadline never trips ------------------------------------

    #[test]
    fn unbounded_deadline_never_trips() {
        let d = StageDeadline::new(None);
        d.check("anything").unwrap();
    }

    // -- 2. Expired deadline names the stage ----------------------------------

    #[test]
    fn expired_deadline_names_the_stage() {
        let d = StageDeadline::new(Some(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(2));
        let err = d.check("render").unwrap_err();
        assert_eq!(err.code, ErrorCode::DeadlineExceeded);
        assert_eq!(err.context["stage"], "render");
    }
}
