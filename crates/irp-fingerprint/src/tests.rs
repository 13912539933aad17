// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::*;
use irp_contract::FieldContract;
use irp_core::{CanonicalValue, MeasurementRow, NormalizedPacket};
use std::collections::BTreeMap;

fn contract() -> FieldContract {
    FieldContract::parse(
        r#"
        version = "t1"
        [fields.wo_no]
        type = "token"
        importance = "critical"
        [fields.thickness]
        type = "number"
        importance = "reference"
        [fields.remark]
        type = "free_text"
        importance = "reference"
        [photos]
        allowed_extensions = ["jpg"]
        prefer_order = ["jpg"]
        slots = []
        "#,
    )
    .unwrap()
}

fn packet() -> NormalizedPacket {
    let mut p = NormalizedPacket::default();
    p.values
        .insert("wo_no".into(), Some(CanonicalValue::Token("WO-001".into())));
    p.values
        .insert("thickness".into(), Some(CanonicalValue::Number("3.14".into())));
    p.values
        .insert("remark".into(), Some(CanonicalValue::FreeText("looks fine".into())));
    p.measurement_rows.push(MeasurementRow {
        index: 0,
        cells: BTreeMap::from([("value".to_string(), "2.5".to_string())]),
    });
    p
}

// ── Determinism ─────────────────────────────────────────────────────

#[test]
fn hashes_are_deterministic() {
    let c = contract();
    let p = packet();
    let a = fingerprint(&c, &p).unwrap();
    let b = fingerprint(&c, &p).unwrap();
    assert_eq!(a, b);
}

#[test]
fn hashes_are_64_hex_chars() {
    let f = fingerprint(&contract(), &packet()).unwrap();
    assert_eq!(f.packet_hash.len(), 64);
    assert_eq!(f.packet_full_hash.len(), 64);
    assert!(f.packet_hash.chars().all(|c| c.is_ascii_hexdigit()));
}

// ── Judgement scope ─────────────────────────────────────────────────

#[test]
fn free_text_mutation_leaves_packet_hash_unchanged() {
    let c = contract();
    let p1 = packet();
    let mut p2 = packet();
    p2.values.insert(
        "remark".into(),
        Some(CanonicalValue::FreeText("entirely different prose".into())),
    );
    assert_eq!(packet_hash(&c, &p1).unwrap(), packet_hash(&c, &p2).unwrap());
    assert_ne!(
        packet_full_hash(&p1).unwrap(),
        packet_full_hash(&p2).unwrap()
    );
}

#[test]
fn judgement_field_mutation_changes_both_hashes() {
    let c = contract();
    let p1 = packet();
    let mut p2 = packet();
    p2.values
        .insert("thickness".into(), Some(CanonicalValue::Number("3.15".into())));
    assert_ne!(packet_hash(&c, &p1).unwrap(), packet_hash(&c, &p2).unwrap());
    assert_ne!(
        packet_full_hash(&p1).unwrap(),
        packet_full_hash(&p2).unwrap()
    );
}

#[test]
fn null_and_absent_are_distinct_from_values() {
    let c = contract();
    let p1 = packet();
    let mut p2 = packet();
    p2.values.insert("thickness".into(), None);
    assert_ne!(packet_hash(&c, &p1).unwrap(), packet_hash(&c, &p2).unwrap());
}

// ── Measurement rows ────────────────────────────────────────────────

#[test]
fn measurement_rows_participate_in_both_hashes() {
    let c = contract();
    let p1 = packet();
    let mut p2 = packet();
    p2.measurement_rows[0]
        .cells
        .insert("value".to_string(), "2.6".to_string());
    assert_ne!(packet_hash(&c, &p1).unwrap(), packet_hash(&c, &p2).unwrap());
    assert_ne!(
        packet_full_hash(&p1).unwrap(),
        packet_full_hash(&p2).unwrap()
    );
}

#[test]
fn row_order_is_canonicalised_by_index() {
    let c = contract();
    let mut p1 = packet();
    p1.measurement_rows.push(MeasurementRow {
        index: 1,
        cells: BTreeMap::from([("value".to_string(), "9".to_string())]),
    });
    let mut p2 = packet();
    let extra = MeasurementRow {
        index: 1,
        cells: BTreeMap::from([("value".to_string(), "9".to_string())]),
    };
    p2.measurement_rows.insert(0, extra);
    assert_eq!(packet_hash(&c, &p1).unwrap(), packet_hash(&c, &p2).unwrap());
}
