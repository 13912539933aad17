// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run-log persistence.
//!
//! One JSON file per run attempt under `logs/`, named by the run id's
//! leading hex. Written atomically, after every mutation of the job
//! directory has committed; rejected runs get a record too.

use irp_core::RunRecord;
use irp_error::{ErrorCode, PipelineError, PipelineResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Length of the run-id prefix used in log file names.
const RUN_ID_PREFIX_LEN: usize = 8;

/// File-backed run-log store for one job directory.
#[derive(Debug, Clone)]
pub struct RunLogStore {
    logs_dir: PathBuf,
}

impl RunLogStore {
    /// Create a store over `<job_dir>/logs/`.
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
        }
    }

    /// The log path a given run id maps to.
    #[must_use]
    pub fn log_path(&self, run_id: Uuid) -> PathBuf {
        let simple = run_id.simple().to_string();
        self.logs_dir
            .join(format!("run_{}.json", &simple[..RUN_ID_PREFIX_LEN]))
    }

    /// Persist a run record.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] on filesystem failures.
    pub fn save(&self, record: &RunRecord) -> PipelineResult<PathBuf> {
        std::fs::create_dir_all(&self.logs_dir)
            .map_err(|e| PipelineError::io(format!("create {}", self.logs_dir.display()), &e))?;
        let path = self.log_path(record.run_id);
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| PipelineError::new(ErrorCode::Internal, format!("serialize run record: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.logs_dir)
            .map_err(|e| PipelineError::io("create run-log temp file", &e))?;
        tmp.write_all(&json)
            .map_err(|e| PipelineError::io("write run-log temp file", &e))?;
        tmp.persist(&path)
            .map_err(|e| PipelineError::io(format!("publish {}", path.display()), &e.error))?;
        Ok(path)
    }

    /// Load a run record from a log file.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] on unreadable or corrupt files.
    pub fn load(&self, path: &Path) -> PipelineResult<RunRecord> {
        let bytes = std::fs::read(path)
            .map_err(|e| PipelineError::io(format!("read {}", path.display()), &e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::new(ErrorCode::Io, format!("corrupt run log {}: {e}", path.display()))
        })
    }

    /// All stored run records, oldest first.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] when the logs directory exists but cannot be read.
    pub fn load_all(&self) -> PipelineResult<Vec<RunRecord>> {
        let entries = match std::fs::read_dir(&self.logs_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PipelineError::io(
                    format!("read {}", self.logs_dir.display()),
                    &e,
                ));
            }
        };
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io("read logs entry", &e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                records.push(self.load(&path)?);
            }
        }
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }
}
