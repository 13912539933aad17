// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end tests over a real temp photo tree.

use chrono::{TimeZone, Utc};
use irp_contract::FieldContract;
use irp_core::{OverrideCode, OverrideReason, PhotoAction, PurgeMode, RetentionPolicy};
use irp_photos::{DERIVED_DIR, NoopOcr, PhotoEngine, RAW_DIR, TRASH_DIR, purge_trash};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;

fn contract() -> FieldContract {
    FieldContract::parse(
        r#"
        version = "t1"
        [fields.wo_no]
        type = "token"
        importance = "critical"
        [photos]
        allowed_extensions = ["jpg", "png"]
        prefer_order = ["jpg", "png"]
        [[photos.slots]]
        key = "overview"
        basename = "01_overview"
        required = true
        override_allowed = true
        override_requires_reason = true
        [[photos.slots]]
        key = "detail"
        basename = "02_detail"
        required = false
        "#,
    )
    .unwrap()
}

fn touch(dir: &Path, name: &str, contents: &[u8]) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), contents).unwrap();
}

fn list_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

// ── 1. Commit publishes one file per mapped slot ────────────────────

#[test]
fn commit_publishes_one_file_per_mapped_slot() {
    let c = contract();
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");
    touch(&photos.join(RAW_DIR), "01_overview.jpg", b"ov");
    touch(&photos.join(RAW_DIR), "02_detail.png", b"dt");

    let engine = PhotoEngine::new(&c, &photos);
    let (plans, _) = engine.plan(&NoopOcr).unwrap();
    let (entries, warnings) = engine
        .commit(&plans, &BTreeMap::new(), Uuid::new_v4(), Utc::now())
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.action == PhotoAction::Mapped));
    assert_eq!(
        list_names(&photos.join(DERIVED_DIR)),
        vec!["detail.png", "overview.jpg"]
    );
    assert!(warnings.is_empty());

    // Originals are untouched.
    assert_eq!(
        fs::read(photos.join(RAW_DIR).join("01_overview.jpg")).unwrap(),
        b"ov"
    );
}

// ── 2. A second run archives the superseded file (bytes intact) ─────

#[test]
fn second_run_archives_superseded_file() {
    let c = contract();
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");
    touch(&photos.join(RAW_DIR), "01_overview.jpg", b"first");

    let engine = PhotoEngine::new(&c, &photos);
    let run1 = Uuid::new_v4();
    let (plans, _) = engine.plan(&NoopOcr).unwrap();
    engine
        .commit(&plans, &BTreeMap::new(), run1, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap())
        .unwrap();

    // Replace the raw file and run again.
    fs::write(photos.join(RAW_DIR).join("01_overview.jpg"), b"second").unwrap();
    let run2 = Uuid::new_v4();
    let (plans, _) = engine.plan(&NoopOcr).unwrap();
    let (entries, _) = engine
        .commit(&plans, &BTreeMap::new(), run2, Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap())
        .unwrap();

    // Derived now holds the second bytes.
    assert_eq!(
        fs::read(photos.join(DERIVED_DIR).join("overview.jpg")).unwrap(),
        b"second"
    );

    // The first bytes live in the run-2 bucket, unchanged.
    let bucket = photos
        .join(TRASH_DIR)
        .join(format!("2024-01-16T090000-{run2}"));
    assert_eq!(fs::read(bucket.join("overview.jpg")).unwrap(), b"first");

    let overview = entries.iter().find(|e| e.slot_key == "overview").unwrap();
    assert!(overview.archived_path.is_some());
    assert_eq!(overview.derived_path.as_deref(), Some("overview.jpg"));
}

// ── 3. Union of derived and this run's trash covers the pre-run set ──

#[test]
fn archival_preserves_pre_run_derived_set() {
    let c = contract();
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");
    touch(&photos.join(RAW_DIR), "01_overview.jpg", b"v1");
    touch(&photos.join(RAW_DIR), "02_detail.png", b"d1");

    let engine = PhotoEngine::new(&c, &photos);
    let (plans, _) = engine.plan(&NoopOcr).unwrap();
    engine
        .commit(&plans, &BTreeMap::new(), Uuid::new_v4(), Utc::now())
        .unwrap();
    let before = list_names(&photos.join(DERIVED_DIR));

    fs::write(photos.join(RAW_DIR).join("01_overview.jpg"), b"v2").unwrap();
    let run2 = Uuid::new_v4();
    let now = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
    let (plans, _) = engine.plan(&NoopOcr).unwrap();
    engine.commit(&plans, &BTreeMap::new(), run2, now).unwrap();

    let after = list_names(&photos.join(DERIVED_DIR));
    let bucket = photos
        .join(TRASH_DIR)
        .join(format!("2024-02-01T080000-{run2}"));
    let archived = list_names(&bucket);

    for name in before {
        assert!(
            after.contains(&name) || archived.contains(&name),
            "{name} vanished"
        );
    }
}

// ── 4. Override entries preserve the reason verbatim ────────────────

#[test]
fn override_entries_preserve_reason_verbatim() {
    let c = contract();
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");
    fs::create_dir_all(photos.join(RAW_DIR)).unwrap();

    let engine = PhotoEngine::new(&c, &photos);
    let (plans, _) = engine.plan(&NoopOcr).unwrap();
    let overrides = BTreeMap::from([(
        "overview".to_string(),
        OverrideReason {
            code: OverrideCode::DeviceFailure,
            detail: "측정 장비 고장으로 촬영 불가".to_string(),
        },
    )]);
    let (entries, _) = engine
        .commit(&plans, &overrides, Uuid::new_v4(), Utc::now())
        .unwrap();

    let overview = entries.iter().find(|e| e.slot_key == "overview").unwrap();
    assert_eq!(overview.action, PhotoAction::Override);
    assert_eq!(
        overview.override_reason.as_ref().unwrap().detail,
        "측정 장비 고장으로 촬영 불가"
    );

    // The optional slot simply reports missing.
    let detail = entries.iter().find(|e| e.slot_key == "detail").unwrap();
    assert_eq!(detail.action, PhotoAction::Missing);
    assert!(list_names(&photos.join(DERIVED_DIR)).is_empty());
}

// ── 5. Uncovered required slot refuses to commit ────────────────────

#[test]
fn uncovered_required_slot_refuses_to_commit() {
    let c = contract();
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");
    fs::create_dir_all(photos.join(RAW_DIR)).unwrap();

    let engine = PhotoEngine::new(&c, &photos);
    let (plans, _) = engine.plan(&NoopOcr).unwrap();
    let err = engine
        .commit(&plans, &BTreeMap::new(), Uuid::new_v4(), Utc::now())
        .unwrap_err();
    assert_eq!(err.code, irp_error::ErrorCode::PhotoOverrideRequired);
}

// ── 6. Cross-slot ambiguity declines to map either slot ─────────────

#[test]
fn cross_slot_ambiguity_declines_both() {
    // Two slots sharing one basename prefix tier candidate.
    let c = FieldContract::parse(
        r#"
        version = "t1"
        [fields.wo_no]
        type = "token"
        importance = "critical"
        [photos]
        allowed_extensions = ["jpg"]
        prefer_order = ["jpg"]
        [[photos.slots]]
        key = "label_front"
        basename = "10_label"
        [[photos.slots]]
        key = "label_back"
        basename = "10_label"
        "#,
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");
    touch(&photos.join(RAW_DIR), "10_label_x.jpg", b"a");

    let engine = PhotoEngine::new(&c, &photos);
    let (plans, warnings) = engine.plan(&NoopOcr).unwrap();
    assert!(plans.iter().all(|p| !p.has_content()));
    assert_eq!(
        warnings
            .iter()
            .filter(|w| w.code == irp_core::WarningCode::PhotoAmbiguousMatch)
            .count(),
        2
    );
}

// ── 7. Retention honours the keep floor (delete mode) ───────────────

#[test]
fn retention_honours_keep_floor() {
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");

    // Five buckets, one day apart, all ancient relative to `now`.
    for day in 1..=5 {
        let bucket = photos
            .join(TRASH_DIR)
            .join(format!("2024-01-0{day}T000000-run{day}"));
        touch(&bucket, "overview.jpg", b"old");
    }

    let policy = RetentionPolicy {
        days: 0,
        per_job_bytes: u64::MAX,
        total_bytes: u64::MAX,
        min_keep_count: 2,
        mode: PurgeMode::Delete,
        archive_dir: "_archive".into(),
    };
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let report = purge_trash(&photos, &policy, now).unwrap();

    assert_eq!(report.kept.len(), 2);
    assert_eq!(report.deleted.len(), 3);
    // The two newest survive.
    assert_eq!(list_names(&photos.join(TRASH_DIR)).len(), 2);
    assert!(
        photos
            .join(TRASH_DIR)
            .join("2024-01-05T000000-run5")
            .exists()
    );
    assert!(
        photos
            .join(TRASH_DIR)
            .join("2024-01-04T000000-run4")
            .exists()
    );
}

// ── 8. Compress mode repacks evicted buckets into _archive ──────────

#[test]
fn compress_mode_repacks_evicted_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");
    let bucket_name = "2024-01-01T000000-runx";
    touch(&photos.join(TRASH_DIR).join(bucket_name), "overview.jpg", b"bytes");

    let policy = RetentionPolicy {
        days: 0,
        per_job_bytes: u64::MAX,
        total_bytes: u64::MAX,
        min_keep_count: 0,
        mode: PurgeMode::Compress,
        archive_dir: "_archive".into(),
    };
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let report = purge_trash(&photos, &policy, now).unwrap();

    assert_eq!(report.compressed, vec![bucket_name.to_string()]);
    assert!(!photos.join(TRASH_DIR).join(bucket_name).exists());
    assert!(
        photos
            .join("_archive")
            .join("2024-01-01T000000_runx.tar.gz")
            .exists()
    );
}

// ── 9. Size ceiling sheds oldest buckets first ──────────────────────

#[test]
fn size_ceiling_sheds_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let photos = dir.path().join("photos");

    for day in 1..=3 {
        let bucket = photos
            .join(TRASH_DIR)
            .join(format!("2024-03-0{day}T000000-run{day}"));
        touch(&bucket, "blob.jpg", &[0u8; 1000]);
    }

    let policy = RetentionPolicy {
        days: 365,
        per_job_bytes: 2500,
        total_bytes: u64::MAX,
        min_keep_count: 1,
        mode: PurgeMode::Delete,
        archive_dir: "_archive".into(),
    };
    // Recent enough that age alone evicts nothing.
    let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
    let report = purge_trash(&photos, &policy, now).unwrap();

    assert_eq!(report.deleted, vec!["2024-03-01T000000-run1".to_string()]);
    assert!(photos.join(TRASH_DIR).join("2024-03-03T000000-run3").exists());
    assert!(photos.join(TRASH_DIR).join("2024-03-02T000000-run2").exists());
}
