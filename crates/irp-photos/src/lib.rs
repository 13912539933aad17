// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! irp-photos
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Retention purging over `_trash/` buckets.
pub mod retention;

use chrono::{DateTime, Utc};
use irp_contract::{FieldContract, SlotSpec};
use irp_core::{
    Confidence, MatchedBy, OverrideReason, PhotoAction, PhotoProcessingEntry, Warning, WarningCode,
};
use irp_error::{ErrorCode, PipelineError, PipelineResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub use retention::{PurgeReport, purge_trash};

/// Subdirectory names of the photo tier layout.
pub const RAW_DIR: &str = "raw";
/// Published per-slot files.
pub const DERIVED_DIR: &str = "derived";
/// Superseded files awaiting purge.
pub const TRASH_DIR: &str = "_trash";

// ---------------------------------------------------------------------------
// OCR seam
// ---------------------------------------------------------------------------

/// Adapter interface to the OCR provider.
///
/// Called only during lock-free planning, never with the job-directory lock
/// held.
pub trait OcrProbe {
    /// Return the text recognised in the image.
    ///
    /// # Errors
    ///
    /// Provider transport failures surface as `anyhow` errors; the engine
    /// treats them as "no opinion" and leaves grading untouched.
    fn probe(&self, image: &Path) -> anyhow::Result<String>;
}

/// A probe that recognises nothing. For hosts without an OCR provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOcr;

impl OcrProbe for NoopOcr {
    fn probe(&self, _image: &Path) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

/// Canned per-filename OCR results for tests.
#[derive(Debug, Clone, Default)]
pub struct MockOcr {
    /// Recognised text keyed by file name.
    pub text_by_name: BTreeMap<String, String>,
}

impl OcrProbe for MockOcr {
    fn probe(&self, image: &Path) -> anyhow::Result<String> {
        let name = image
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Ok(self.text_by_name.get(name).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// What the engine intends to do for one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDisposition {
    /// Publish `source` into `derived/`.
    Mapped {
        /// Chosen file under `raw/`.
        source: PathBuf,
        /// Match confidence after any OCR boost.
        confidence: Confidence,
        /// The rule that selected the file.
        matched_by: MatchedBy,
        /// OCR keyword verification outcome, when a probe ran.
        ocr_verified: Option<bool>,
    },
    /// The slot has no candidate content.
    Missing,
    /// A candidate exists but also matches another slot at the same tier;
    /// the engine declines to map it.
    Ambiguous {
        /// The contested file.
        contested: PathBuf,
    },
}

/// The engine's plan for one slot.
#[derive(Debug, Clone)]
pub struct SlotPlan {
    /// Slot key.
    pub slot_key: String,
    /// Intended action.
    pub disposition: SlotDisposition,
}

impl SlotPlan {
    /// Whether this plan gives the slot publishable content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        matches!(self.disposition, SlotDisposition::Mapped { .. })
    }
}

/// The photo slot engine for one job directory's `photos/` tree.
#[derive(Debug)]
pub struct PhotoEngine<'c> {
    contract: &'c FieldContract,
    photos_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchTier {
    BasenameExact,
    BasenamePrefix,
    KeyPrefix,
}

impl MatchTier {
    fn matched_by(self) -> MatchedBy {
        match self {
            Self::BasenameExact => MatchedBy::BasenameExact,
            Self::BasenamePrefix => MatchedBy::BasenamePrefix,
            Self::KeyPrefix => MatchedBy::KeyPrefix,
        }
    }

    fn confidence(self) -> Confidence {
        match self {
            Self::BasenameExact => Confidence::High,
            Self::BasenamePrefix => Confidence::Medium,
            Self::KeyPrefix => Confidence::Low,
        }
    }
}

impl<'c> PhotoEngine<'c> {
    /// Create an engine over `photos_dir` (the directory holding `raw/`,
    /// `derived/`, `_trash/`).
    pub fn new(contract: &'c FieldContract, photos_dir: impl Into<PathBuf>) -> Self {
        Self {
            contract,
            photos_dir: photos_dir.into(),
        }
    }

    /// The `raw/` directory.
    #[must_use]
    pub fn raw_dir(&self) -> PathBuf {
        self.photos_dir.join(RAW_DIR)
    }

    /// The `derived/` directory.
    #[must_use]
    pub fn derived_dir(&self) -> PathBuf {
        self.photos_dir.join(DERIVED_DIR)
    }

    /// The `_trash/` directory.
    #[must_use]
    pub fn trash_dir(&self) -> PathBuf {
        self.photos_dir.join(TRASH_DIR)
    }

    /// Plan slot mapping from the current contents of `raw/`.
    ///
    /// Read-only: safe to run lock-free. OCR probes happen here so no
    /// provider call ever holds the job-directory lock.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] when `raw/` exists but cannot be listed.
    pub fn plan(&self, ocr: &dyn OcrProbe) -> PipelineResult<(Vec<SlotPlan>, Vec<Warning>)> {
        let files = self.list_raw()?;
        let mut warnings = Vec::new();

        // Winning tier and ordered candidates per slot.
        let mut per_slot: Vec<(&SlotSpec, Option<(MatchTier, Vec<PathBuf>)>)> = Vec::new();
        for slot in self.contract.slots() {
            per_slot.push((slot, self.best_tier(slot, &files)));
        }

        // A file contested by two slots at the same tier poisons both.
        let mut contested: BTreeMap<PathBuf, Vec<(String, MatchTier)>> = BTreeMap::new();
        for (slot, best) in &per_slot {
            if let Some((tier, candidates)) = best {
                for c in candidates {
                    contested
                        .entry(c.clone())
                        .or_default()
                        .push((slot.key.clone(), *tier));
                }
            }
        }

        let mut plans = Vec::new();
        for (slot, best) in per_slot {
            let Some((tier, candidates)) = best else {
                plans.push(SlotPlan {
                    slot_key: slot.key.clone(),
                    disposition: SlotDisposition::Missing,
                });
                continue;
            };

            let chosen = self.pick_candidate(&candidates);

            let claims = &contested[&chosen];
            let rivals: Vec<&String> = claims
                .iter()
                .filter(|(key, t)| *key != slot.key && *t == tier)
                .map(|(key, _)| key)
                .collect();
            if !rivals.is_empty() {
                warnings.push(
                    Warning::new(
                        WarningCode::PhotoAmbiguousMatch,
                        slot.key.clone(),
                        format!(
                            "file {} also matches slot '{}' at the same tier; declining to map",
                            display_name(&chosen),
                            rivals[0]
                        ),
                    )
                    .with_original(display_name(&chosen)),
                );
                plans.push(SlotPlan {
                    slot_key: slot.key.clone(),
                    disposition: SlotDisposition::Ambiguous { contested: chosen },
                });
                continue;
            }

            if candidates.len() > 1 {
                let listing = candidates
                    .iter()
                    .map(|c| display_name(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                warnings.push(
                    Warning::new(
                        WarningCode::PhotoDuplicateAutoSelected,
                        slot.key.clone(),
                        format!("candidates [{listing}] resolved by prefer order"),
                    )
                    .with_original(listing.clone())
                    .with_resolved(display_name(&chosen)),
                );
            }

            let mut confidence = tier.confidence();
            let mut ocr_verified = None;
            if tier == MatchTier::BasenamePrefix && !slot.ocr_keywords.is_empty() {
                match ocr.probe(&chosen) {
                    Ok(text) => {
                        let lowered = text.to_lowercase();
                        let hit = slot
                            .ocr_keywords
                            .iter()
                            .any(|k| lowered.contains(&k.to_lowercase()));
                        ocr_verified = Some(hit);
                        if hit {
                            confidence = Confidence::High;
                        }
                    }
                    Err(e) => {
                        // No opinion: grading stays as matched.
                        warn!(target: "irp.photos", slot = %slot.key, error = %e, "OCR probe failed");
                    }
                }
            }

            if confidence == Confidence::Low {
                warnings.push(
                    Warning::new(
                        WarningCode::PhotoLowConfidenceMatch,
                        slot.key.clone(),
                        format!("{} matched by key prefix only", display_name(&chosen)),
                    )
                    .with_original(display_name(&chosen)),
                );
            }

            plans.push(SlotPlan {
                slot_key: slot.key.clone(),
                disposition: SlotDisposition::Mapped {
                    source: chosen,
                    confidence,
                    matched_by: tier.matched_by(),
                    ocr_verified,
                },
            });
        }

        Ok((plans, warnings))
    }

    /// Per-slot content map for the validator, derived from a plan.
    #[must_use]
    pub fn content_map(plans: &[SlotPlan]) -> BTreeMap<String, bool> {
        plans
            .iter()
            .map(|p| (p.slot_key.clone(), p.has_content()))
            .collect()
    }

    /// Commit a plan: publish mapped files into `derived/`, archiving any
    /// predecessors into `_trash/<TS>-<run_id>/`.
    ///
    /// Must run under the job-directory lock. Publication per slot is
    /// atomic: the new file is staged next to its destination, the old file
    /// is archived by rename, and only then is the staged file renamed into
    /// place. A failed archival discards the staged file and leaves the
    /// prior derived content untouched.
    ///
    /// # Errors
    ///
    /// [`ErrorCode::ArchiveFailed`] when a predecessor cannot be moved into
    /// `_trash/`; [`ErrorCode::PhotoRequiredMissing`] /
    /// [`ErrorCode::PhotoOverrideRequired`] when a required slot reaches
    /// commit uncovered; [`ErrorCode::Io`] on other filesystem failures.
    pub fn commit(
        &self,
        plans: &[SlotPlan],
        overrides: &BTreeMap<String, OverrideReason>,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> PipelineResult<(Vec<PhotoProcessingEntry>, Vec<Warning>)> {
        let derived = self.derived_dir();
        fs::create_dir_all(&derived)
            .map_err(|e| PipelineError::io(format!("create {}", derived.display()), &e))?;

        let bucket = self
            .trash_dir()
            .join(format!("{}-{}", now.format("%Y-%m-%dT%H%M%S"), run_id));

        let mut entries = Vec::new();
        let mut warnings = Vec::new();

        for plan in plans {
            let slot = self.contract.slot(&plan.slot_key).ok_or_else(|| {
                PipelineError::new(
                    ErrorCode::Internal,
                    format!("plan references undeclared slot '{}'", plan.slot_key),
                )
            })?;

            match &plan.disposition {
                SlotDisposition::Mapped {
                    source,
                    confidence,
                    matched_by,
                    ocr_verified,
                } => {
                    let (derived_path, archived_path) =
                        self.publish(slot, source, &bucket, &mut warnings)?;
                    entries.push(PhotoProcessingEntry {
                        slot_key: slot.key.clone(),
                        action: PhotoAction::Mapped,
                        raw_path: Some(display_name(source)),
                        derived_path: Some(display_name(&derived_path)),
                        archived_path: archived_path.as_deref().map(display_name),
                        confidence: Some(*confidence),
                        matched_by: Some(*matched_by),
                        ocr_verified: *ocr_verified,
                        override_reason: None,
                    });
                }
                SlotDisposition::Missing | SlotDisposition::Ambiguous { .. } => {
                    if let Some(reason) = overrides.get(&slot.key) {
                        entries.push(PhotoProcessingEntry {
                            slot_key: slot.key.clone(),
                            action: PhotoAction::Override,
                            raw_path: None,
                            derived_path: None,
                            archived_path: None,
                            confidence: None,
                            matched_by: None,
                            ocr_verified: None,
                            override_reason: Some(reason.clone()),
                        });
                        continue;
                    }
                    if slot.required {
                        // The validator rejects these first; reject again
                        // rather than publish a hole.
                        let code = if slot.override_allowed {
                            ErrorCode::PhotoOverrideRequired
                        } else {
                            ErrorCode::PhotoRequiredMissing
                        };
                        return Err(PipelineError::new(
                            code,
                            format!("required slot '{}' reached commit uncovered", slot.key),
                        )
                        .with_context("slot", slot.key.clone()));
                    }
                    let action = match plan.disposition {
                        SlotDisposition::Ambiguous { .. } => PhotoAction::Skipped,
                        _ => PhotoAction::Missing,
                    };
                    entries.push(PhotoProcessingEntry {
                        slot_key: slot.key.clone(),
                        action,
                        raw_path: None,
                        derived_path: None,
                        archived_path: None,
                        confidence: matches!(plan.disposition, SlotDisposition::Ambiguous { .. })
                            .then_some(Confidence::Ambiguous),
                        matched_by: None,
                        ocr_verified: None,
                        override_reason: None,
                    });
                }
            }
        }

        Ok((entries, warnings))
    }

    /// Publish one source file into `derived/<slot>.<ext>`.
    ///
    /// Returns the derived path and, when a predecessor was superseded, its
    /// archived path.
    fn publish(
        &self,
        slot: &SlotSpec,
        source: &Path,
        bucket: &Path,
        warnings: &mut Vec<Warning>,
    ) -> PipelineResult<(PathBuf, Option<PathBuf>)> {
        let derived = self.derived_dir();
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_lowercase();
        let final_path = derived.join(format!("{}.{ext}", slot.key));
        let temp_path = derived.join(format!(".tmp-{}.{ext}", slot.key));

        fs::copy(source, &temp_path).map_err(|e| {
            PipelineError::io(
                format!("stage {} into {}", source.display(), temp_path.display()),
                &e,
            )
        })?;

        // Durability is best-effort: a failed fsync degrades it but the
        // publication continues.
        match fs::File::open(&temp_path).and_then(|f| f.sync_all()) {
            Ok(()) => {}
            Err(e) => {
                warnings.push(
                    Warning::new(
                        WarningCode::FsyncFailed,
                        slot.key.clone(),
                        format!("fsync of staged file failed: {e}"),
                    )
                    .with_original(display_name(&temp_path)),
                );
            }
        }

        // Archive any existing derived file for this slot before the final
        // rename, so a reader never sees two files for one slot.
        let mut archived = None;
        for existing in self.existing_derived(&slot.key)? {
            fs::create_dir_all(bucket)
                .map_err(|e| PipelineError::io(format!("create {}", bucket.display()), &e))?;
            let dest = collision_free(bucket, &existing);
            if let Err(e) = fs::rename(&existing, &dest) {
                // Dirty-state prevention: drop the staged file, keep the old
                // derived content.
                let _ = fs::remove_file(&temp_path);
                return Err(PipelineError::new(
                    ErrorCode::ArchiveFailed,
                    format!(
                        "could not archive {} into {}: {e}",
                        existing.display(),
                        dest.display()
                    ),
                )
                .with_context("slot", slot.key.clone())
                .with_context("existing", display_name(&existing)));
            }
            debug!(target: "irp.photos", slot = %slot.key, from = %existing.display(), to = %dest.display(), "archived superseded file");
            archived = Some(dest);
        }

        fs::rename(&temp_path, &final_path).map_err(|e| {
            PipelineError::io(
                format!("publish {} as {}", temp_path.display(), final_path.display()),
                &e,
            )
        })?;

        Ok((final_path, archived))
    }

    /// Existing `derived/<slot>.*` files (at most one per the invariant,
    /// but the scan tolerates more).
    fn existing_derived(&self, slot_key: &str) -> PipelineResult<Vec<PathBuf>> {
        let derived = self.derived_dir();
        let mut out = Vec::new();
        let entries = match fs::read_dir(&derived) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => {
                return Err(PipelineError::io(format!("read {}", derived.display()), &e));
            }
        };
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io("read derived entry", &e))?;
            let path = entry.path();
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
            if stem == slot_key && !name.starts_with(".tmp-") {
                out.push(path);
            }
        }
        Ok(out)
    }

    fn list_raw(&self) -> PipelineResult<Vec<PathBuf>> {
        let raw = self.raw_dir();
        let mut files = Vec::new();
        let entries = match fs::read_dir(&raw) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(PipelineError::io(format!("read {}", raw.display()), &e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io("read raw entry", &e))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// The best (highest-priority) non-empty match tier for a slot.
    fn best_tier(&self, slot: &SlotSpec, files: &[PathBuf]) -> Option<(MatchTier, Vec<PathBuf>)> {
        for tier in [
            MatchTier::BasenameExact,
            MatchTier::BasenamePrefix,
            MatchTier::KeyPrefix,
        ] {
            let candidates: Vec<PathBuf> = files
                .iter()
                .filter(|f| self.matches_tier(slot, f, tier))
                .cloned()
                .collect();
            if !candidates.is_empty() {
                return Some((tier, candidates));
            }
        }
        None
    }

    fn matches_tier(&self, slot: &SlotSpec, file: &Path, tier: MatchTier) -> bool {
        let stem = match file.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s.to_lowercase(),
            None => return false,
        };
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !self
            .contract
            .allowed_extensions()
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&ext))
        {
            return false;
        }

        let basename = slot.basename.to_lowercase();
        match tier {
            MatchTier::BasenameExact => stem == basename,
            MatchTier::BasenamePrefix => stem != basename && stem.starts_with(&basename),
            MatchTier::KeyPrefix => {
                let key = slot.key.to_lowercase();
                !stem.starts_with(&basename) && stem.starts_with(&key)
            }
        }
    }

    /// Break ties with the contract's `prefer_order`, then lexicographically.
    fn pick_candidate(&self, candidates: &[PathBuf]) -> PathBuf {
        let rank = |path: &PathBuf| {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default();
            self.contract
                .prefer_order()
                .iter()
                .position(|p| p.eq_ignore_ascii_case(&ext))
                .unwrap_or(usize::MAX)
        };
        let mut sorted: Vec<&PathBuf> = candidates.iter().collect();
        sorted.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)));
        sorted[0].clone()
    }
}

/// File name (not the full path) for warnings and audit entries.
fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or_else(|| path.display().to_string(), str::to_string)
}

/// Resolve a destination inside `bucket` for `source`'s file name, adding
/// `_1`, `_2`, ... before the extension on collision.
fn collision_free(bucket: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let first = bucket.join(name);
    if !first.exists() {
        return first;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) => (s.to_string(), Some(e.to_string())),
        None => (name.to_string(), None),
    };
    for n in 1.. {
        let candidate = match &ext {
            Some(e) => bucket.join(format!("{stem}_{n}.{e}")),
            None => bucket.join(format!("{stem}_{n}")),
        };
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("collision counter exhausted")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> FieldContract {
        FieldContract::parse(
            r#"
            version = "t1"
            [fields.wo_no]
            type = "token"
            importance = "critical"
            [photos]
            allowed_extensions = ["jpg", "jpeg", "png"]
            prefer_order = ["jpg", "png", "jpeg"]
            [[photos.slots]]
            key = "overview"
            basename = "01_overview"
            required = true
            override_allowed = true
            override_requires_reason = true
            [[photos.slots]]
            key = "label_serial"
            basename = "02_label_serial"
            required = false
            ocr_keywords = ["S/N", "Serial", "LOT"]
            "#,
        )
        .unwrap()
    }

    fn touch(dir: &Path, name: &str, contents: &[u8]) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), contents).unwrap();
    }

    fn plan_for(
        c: &FieldContract,
        photos: &Path,
        ocr: &dyn OcrProbe,
    ) -> (Vec<SlotPlan>, Vec<Warning>) {
        PhotoEngine::new(c, photos).plan(ocr).unwrap()
    }

    fn disposition<'a>(plans: &'a [SlotPlan], key: &str) -> &'a SlotDisposition {
        &plans.iter().find(|p| p.slot_key == key).unwrap().disposition
    }

    // -- 1. Exact basename match grades high ----------------------------------

    #[test]
    fn exact_basename_match_grades_high() {
        let c = contract();
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        touch(&photos.join(RAW_DIR), "01_overview.jpg", b"a");

        let (plans, warnings) = plan_for(&c, &photos, &NoopOcr);
        match disposition(&plans, "overview") {
            SlotDisposition::Mapped {
                confidence,
                matched_by,
                ..
            } => {
                assert_eq!(*confidence, Confidence::High);
                assert_eq!(*matched_by, MatchedBy::BasenameExact);
            }
            other => panic!("expected Mapped, got {other:?}"),
        }
        assert!(warnings.is_empty());
    }

    // -- 2. Basename prefix grades medium -------------------------------------

    #[test]
    fn basename_prefix_grades_medium() {
        let c = contract();
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        touch(&photos.join(RAW_DIR), "01_overview_retake.jpg", b"a");

        let (plans, _) = plan_for(&c, &photos, &NoopOcr);
        match disposition(&plans, "overview") {
            SlotDisposition::Mapped { confidence, .. } => {
                assert_eq!(*confidence, Confidence::Medium);
            }
            other => panic!("expected Mapped, got {other:?}"),
        }
    }

    // -- 3. Key prefix grades low with warning --------------------------------

    #[test]
    fn key_prefix_grades_low_with_warning() {
        let c = contract();
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        touch(&photos.join(RAW_DIR), "overview_shot.jpg", b"a");

        let (plans, warnings) = plan_for(&c, &photos, &NoopOcr);
        match disposition(&plans, "overview") {
            SlotDisposition::Mapped {
                confidence,
                matched_by,
                ..
            } => {
                assert_eq!(*confidence, Confidence::Low);
                assert_eq!(*matched_by, MatchedBy::KeyPrefix);
            }
            other => panic!("expected Mapped, got {other:?}"),
        }
        assert!(
            warnings
                .iter()
                .any(|w| w.code == WarningCode::PhotoLowConfidenceMatch)
        );
    }

    // -- 4. Duplicates resolve by prefer order with warning --------------------

    #[test]
    fn duplicates_resolve_by_prefer_order() {
        let c = contract();
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        touch(&photos.join(RAW_DIR), "01_overview.png", b"a");
        touch(&photos.join(RAW_DIR), "01_overview.jpg", b"b");

        let (plans, warnings) = plan_for(&c, &photos, &NoopOcr);
        match disposition(&plans, "overview") {
            SlotDisposition::Mapped { source, .. } => {
                assert_eq!(display_name(source), "01_overview.jpg");
            }
            other => panic!("expected Mapped, got {other:?}"),
        }
        let w = warnings
            .iter()
            .find(|w| w.code == WarningCode::PhotoDuplicateAutoSelected)
            .unwrap();
        assert_eq!(w.resolved_value.as_deref(), Some("01_overview.jpg"));
        assert!(w.original_value.as_deref().unwrap().contains("01_overview.png"));
    }

    // -- 5. OCR keywords promote medium to high --------------------------------

    #[test]
    fn ocr_keywords_promote_medium_to_high() {
        let c = contract();
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        touch(&photos.join(RAW_DIR), "02_label_serial_v2.jpg", b"a");

        let ocr = MockOcr {
            text_by_name: BTreeMap::from([(
                "02_label_serial_v2.jpg".to_string(),
                "Model X  S/N 12345".to_string(),
            )]),
        };
        let (plans, _) = plan_for(&c, &photos, &ocr);
        match disposition(&plans, "label_serial") {
            SlotDisposition::Mapped {
                confidence,
                ocr_verified,
                ..
            } => {
                assert_eq!(*confidence, Confidence::High);
                assert_eq!(*ocr_verified, Some(true));
            }
            other => panic!("expected Mapped, got {other:?}"),
        }
    }

    // -- 6. OCR without keywords leaves medium ---------------------------------

    #[test]
    fn ocr_without_keywords_leaves_medium() {
        let c = contract();
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        touch(&photos.join(RAW_DIR), "02_label_serial_v2.jpg", b"a");

        let (plans, _) = plan_for(&c, &photos, &NoopOcr);
        match disposition(&plans, "label_serial") {
            SlotDisposition::Mapped {
                confidence,
                ocr_verified,
                ..
            } => {
                assert_eq!(*confidence, Confidence::Medium);
                assert_eq!(*ocr_verified, Some(false));
            }
            other => panic!("expected Mapped, got {other:?}"),
        }
    }

    // -- 7. Disallowed extensions never match ----------------------------------

    #[test]
    fn disallowed_extensions_never_match() {
        let c = contract();
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("photos");
        touch(&photos.join(RAW_DIR), "01_overview.gif", b"a");

        let (plans, _) = plan_for(&c, &photos, &NoopOcr);
        assert_eq!(*disposition(&plans, "overview"), SlotDisposition::Missing);
    }

    // -- 8. Collision suffixes in the trash bucket -----------------------------

    #[test]
    fn collision_suffixes_in_trash_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = dir.path().join("bucket");
        fs::create_dir_all(&bucket).unwrap();
        fs::write(bucket.join("overview.jpg"), b"one").unwrap();

        let dest = collision_free(&bucket, Path::new("/raw/overview.jpg"));
        assert_eq!(display_name(&dest), "overview_1.jpg");
        fs::write(&dest, b"two").unwrap();

        let dest2 = collision_free(&bucket, Path::new("/raw/overview.jpg"));
        assert_eq!(display_name(&dest2), "overview_2.jpg");
    }
}
