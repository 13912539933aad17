// SPDX-License-Identifier: MIT OR Apache-2.0
//! Delivery packaging.
//!
//! Writes rendered artifacts into `<job_dir>/deliverables/` with a download
//! manifest (name, size, relative path, sha256). Bundling is on demand
//! only; individual files stay addressable by name.

use chrono::{DateTime, Utc};
use irp_core::sha256_hex;
use irp_error::{ErrorCode, PipelineError, PipelineResult};
use irp_render::{BLANK_PNG, RenderedArtifacts};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Report document file name.
pub const REPORT_NAME: &str = "report.md";
/// Measurement workbook file name.
pub const WORKBOOK_NAME: &str = "measurements.csv";
/// Download manifest file name.
pub const MANIFEST_NAME: &str = "manifest.json";
/// On-demand bundle file name.
pub const BUNDLE_NAME: &str = "bundle.tar.gz";

/// One downloadable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Path relative to the deliverables folder.
    pub path: String,
    /// Content hash.
    pub sha256: String,
}

/// The download manifest written next to the artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryManifest {
    /// When the manifest was assembled.
    pub generated_at: DateTime<Utc>,
    /// Downloadable artifacts, sorted by path.
    pub entries: Vec<ManifestEntry>,
}

/// Writes deliverables for one job directory.
#[derive(Debug, Clone)]
pub struct DeliveryPackager {
    deliverables_dir: PathBuf,
}

impl DeliveryPackager {
    /// Create a packager over `<job_dir>/deliverables/`.
    pub fn new(deliverables_dir: impl Into<PathBuf>) -> Self {
        Self {
            deliverables_dir: deliverables_dir.into(),
        }
    }

    /// The deliverables folder.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.deliverables_dir
    }

    /// Write the report, workbook, and referenced images; return the
    /// manifest (also persisted as `manifest.json`).
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] on filesystem failures.
    pub fn publish(&self, artifacts: &RenderedArtifacts) -> PipelineResult<DeliveryManifest> {
        fs::create_dir_all(&self.deliverables_dir).map_err(|e| {
            PipelineError::io(format!("create {}", self.deliverables_dir.display()), &e)
        })?;

        self.write_file(REPORT_NAME, artifacts.report.as_bytes())?;
        self.write_file(WORKBOOK_NAME, artifacts.workbook.as_bytes())?;

        for image in &artifacts.images {
            let dest = self.deliverables_dir.join(&image.dest_rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| PipelineError::io(format!("create {}", parent.display()), &e))?;
            }
            match &image.source {
                Some(source) => {
                    fs::copy(source, &dest).map_err(|e| {
                        PipelineError::io(
                            format!("copy {} into {}", source.display(), dest.display()),
                            &e,
                        )
                    })?;
                }
                None => {
                    fs::write(&dest, BLANK_PNG)
                        .map_err(|e| PipelineError::io(format!("write {}", dest.display()), &e))?;
                }
            }
        }

        let manifest = self.build_manifest()?;
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| PipelineError::new(ErrorCode::Internal, format!("serialize manifest: {e}")))?;
        self.write_file(MANIFEST_NAME, &json)?;
        debug!(target: "irp.deliver", entries = manifest.entries.len(), "deliverables published");
        Ok(manifest)
    }

    /// Assemble `bundle.tar.gz` over the current deliverables.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] on filesystem failures.
    pub fn bundle(&self) -> PipelineResult<PathBuf> {
        let bundle_path = self.deliverables_dir.join(BUNDLE_NAME);
        let file = fs::File::create(&bundle_path)
            .map_err(|e| PipelineError::io(format!("create {}", bundle_path.display()), &e))?;
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for entry in self.walk_files()? {
            if entry.file_name().and_then(|n| n.to_str()) == Some(BUNDLE_NAME) {
                continue;
            }
            let rel = entry
                .strip_prefix(&self.deliverables_dir)
                .map_err(|_| PipelineError::new(ErrorCode::Internal, "bundle path outside root"))?;
            builder
                .append_path_with_name(&entry, rel)
                .map_err(|e| PipelineError::io(format!("pack {}", rel.display()), &e))?;
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| PipelineError::io("finish bundle tar", &e))?;
        encoder
            .finish()
            .map_err(|e| PipelineError::io("finish bundle gzip", &e))?;
        Ok(bundle_path)
    }

    fn build_manifest(&self) -> PipelineResult<DeliveryManifest> {
        let mut entries = Vec::new();
        for path in self.walk_files()? {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            if name == MANIFEST_NAME || name == BUNDLE_NAME {
                continue;
            }
            let rel = path
                .strip_prefix(&self.deliverables_dir)
                .map_err(|_| PipelineError::new(ErrorCode::Internal, "manifest path outside root"))?;
            let bytes = fs::read(&path)
                .map_err(|e| PipelineError::io(format!("read {}", path.display()), &e))?;
            entries.push(ManifestEntry {
                name,
                size: bytes.len() as u64,
                path: rel.display().to_string(),
                sha256: sha256_hex(&bytes),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(DeliveryManifest {
            generated_at: Utc::now(),
            entries,
        })
    }

    fn walk_files(&self) -> PipelineResult<Vec<PathBuf>> {
        let mut out = Vec::new();
        let mut stack = vec![self.deliverables_dir.clone()];
        while let Some(dir) = stack.pop() {
            let entries = fs::read_dir(&dir)
                .map_err(|e| PipelineError::io(format!("read {}", dir.display()), &e))?;
            for entry in entries {
                let entry = entry.map_err(|e| PipelineError::io("read deliverables entry", &e))?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.push(path);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn write_file(&self, name: &str, bytes: &[u8]) -> PipelineResult<()> {
        let path = self.deliverables_dir.join(name);
        fs::write(&path, bytes)
            .map_err(|e| PipelineError::io(format!("write {}", path.display()), &e))
    }
}
