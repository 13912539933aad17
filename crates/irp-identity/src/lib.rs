// SPDX-License-Identifier: MIT OR Apache-2.0
//! Job identity store.
//!
//! One `job.json` per job directory is the single source of truth for the
//! job's identity. The first writer derives the id; every later run must
//! present the same `(wo_no, line)` or be rejected. All mutation happens
//! under a mkdir-based directory lock that also serialises the renderer
//! against concurrent runs on the same directory.
//!
//! An orphaned lock left by a dead process is an operator's `rmdir` away;
//! the store never clears one on its own.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use irp_core::{JOB_ID_VERSION, JobIdentity, SCHEMA_VERSION, sha256_hex};
use irp_error::{ErrorCode, PipelineError, PipelineResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

/// Name of the transient lock directory inside a job directory.
pub const LOCK_DIR_NAME: &str = ".job_json.lock";

/// Name of the identity file inside a job directory.
pub const JOB_JSON_NAME: &str = "job.json";

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

/// Timing for the lock-acquisition spin.
#[derive(Debug, Clone, Copy)]
pub struct LockSettings {
    /// Sleep between attempts.
    pub retry_interval: Duration,
    /// Attempts before giving up.
    pub max_retries: u32,
}

impl Default for LockSettings {
    fn default() -> Self {
        // 50 ms x 40 = a 2 s acquisition window.
        Self {
            retry_interval: Duration::from_millis(50),
            max_retries: 40,
        }
    }
}

/// Holds `.job_json.lock/` for one job directory.
///
/// Released on [`DirLock::release`] or drop, whichever comes first; both
/// paths go through the same `rmdir`.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    released: bool,
}

impl DirLock {
    /// Acquire the lock, spinning up to the configured attempt budget.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::JobJsonLockTimeout`] on budget exhaustion, [`ErrorCode::Io`]
    /// on any other filesystem failure.
    pub fn acquire(job_dir: &Path, settings: &LockSettings) -> PipelineResult<Self> {
        fs::create_dir_all(job_dir)
            .map_err(|e| PipelineError::io(format!("create job dir {}", job_dir.display()), &e))?;

        let path = job_dir.join(LOCK_DIR_NAME);
        for attempt in 1..=settings.max_retries {
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!(target: "irp.identity", lock = %path.display(), attempt, "lock acquired");
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt < settings.max_retries {
                        std::thread::sleep(settings.retry_interval);
                    }
                }
                Err(e) => {
                    return Err(PipelineError::io(
                        format!("create lock dir {}", path.display()),
                        &e,
                    ));
                }
            }
        }

        Err(PipelineError::new(
            ErrorCode::JobJsonLockTimeout,
            format!("could not acquire {}", path.display()),
        )
        .with_context("attempts", settings.max_retries)
        .with_context("retry_interval_ms", settings.retry_interval.as_millis() as u64))
    }

    /// Release the lock explicitly.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = fs::remove_dir(&self.path) {
            // Leaving a stale lock behind is operator-visible; say so loudly.
            warn!(target: "irp.identity", lock = %self.path.display(), error = %e, "failed to release lock dir");
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Process-wide sequence folded into id derivation so two issuances inside
/// the same clock tick still differ.
static ISSUE_SEQ: AtomicU64 = AtomicU64::new(0);

/// The `job.json` store for one job directory.
#[derive(Debug, Clone)]
pub struct JobStore {
    job_dir: PathBuf,
}

impl JobStore {
    /// Create a store rooted at the given job directory.
    pub fn new(job_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_dir: job_dir.into(),
        }
    }

    /// The job directory this store manages.
    #[must_use]
    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    /// Path of the identity file.
    #[must_use]
    pub fn job_json_path(&self) -> PathBuf {
        self.job_dir.join(JOB_JSON_NAME)
    }

    /// Acquire the job-directory lock.
    ///
    /// # Errors
    ///
    /// See [`DirLock::acquire`].
    pub fn acquire(&self, settings: &LockSettings) -> PipelineResult<DirLock> {
        DirLock::acquire(&self.job_dir, settings)
    }

    /// Load the recorded identity, or create one for `(wo_no, line)`.
    ///
    /// Must be called with the directory lock held; the `_lock` parameter
    /// exists to make that impossible to forget.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::PacketJobMismatch`] when the recorded `(wo_no, line)`
    /// disagrees with the arguments; [`ErrorCode::Io`] on filesystem
    /// failures.
    pub fn load_or_create(
        &self,
        _lock: &DirLock,
        wo_no: &str,
        line: &str,
    ) -> PipelineResult<JobIdentity> {
        let path = self.job_json_path();
        if path.exists() {
            let existing = self.load()?;
            if existing.wo_no != wo_no || existing.line != line {
                return Err(PipelineError::new(
                    ErrorCode::PacketJobMismatch,
                    "job directory belongs to a different (wo_no, line)",
                )
                .with_context("recorded_wo_no", existing.wo_no.clone())
                .with_context("recorded_line", existing.line.clone())
                .with_context("submitted_wo_no", wo_no)
                .with_context("submitted_line", line));
            }
            return Ok(existing);
        }

        let identity = JobIdentity {
            job_id: derive_job_id(wo_no, line),
            job_id_version: JOB_ID_VERSION.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: Utc::now(),
            wo_no: wo_no.to_string(),
            line: line.to_string(),
        };
        self.write_atomic(&identity)?;
        debug!(target: "irp.identity", job_id = %identity.job_id, "job identity created");
        Ok(identity)
    }

    /// Read the recorded identity without taking the lock.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] when the file is absent, unreadable, or corrupt.
    pub fn load(&self) -> PipelineResult<JobIdentity> {
        let path = self.job_json_path();
        let bytes = fs::read(&path)
            .map_err(|e| PipelineError::io(format!("read {}", path.display()), &e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::new(
                ErrorCode::Io,
                format!("corrupt job.json at {}: {e}", path.display()),
            )
        })
    }

    /// Issue a fresh run id. Random, never persisted in `job.json`.
    #[must_use]
    pub fn issue_run_id() -> Uuid {
        Uuid::new_v4()
    }

    fn write_atomic(&self, identity: &JobIdentity) -> PipelineResult<()> {
        let path = self.job_json_path();
        let json = serde_json::to_vec_pretty(identity)
            .map_err(|e| PipelineError::new(ErrorCode::Internal, format!("serialize job.json: {e}")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.job_dir)
            .map_err(|e| PipelineError::io("create temp file for job.json", &e))?;
        tmp.write_all(&json)
            .map_err(|e| PipelineError::io("write job.json temp file", &e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| PipelineError::io("fsync job.json temp file", &e))?;
        tmp.persist(&path)
            .map_err(|e| PipelineError::io(format!("rename into {}", path.display()), &e.error))?;

        // Make the rename itself durable. A failure here degrades durability
        // but the rename has already happened.
        match fs::File::open(&self.job_dir) {
            Ok(dir) => {
                if let Err(e) = dir.sync_all() {
                    warn!(target: "irp.identity", error = %e, "directory fsync failed after job.json publish");
                }
            }
            Err(e) => {
                warn!(target: "irp.identity", error = %e, "could not open job dir for fsync");
            }
        }
        Ok(())
    }
}

/// Derive a job id from `(wo_no, line)` and a monotonic timestamp.
///
/// Stable across runs (the id is persisted, never re-derived) and unique
/// across jobs: the wall clock is folded with a process-wide sequence so two
/// derivations can never collide inside one clock tick.
fn derive_job_id(wo_no: &str, line: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = ISSUE_SEQ.fetch_add(1, Ordering::Relaxed);
    let digest = sha256_hex(format!("{JOB_ID_VERSION}\n{wo_no}\n{line}\n{nanos}\n{seq}").as_bytes());
    digest[..16].to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
