// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property: `packet_hash` depends only on the non-free-text fields.

use irp_contract::FieldContract;
use irp_core::{CanonicalValue, NormalizedPacket};
use irp_fingerprint::{packet_full_hash, packet_hash};
use proptest::prelude::*;

fn contract() -> FieldContract {
    FieldContract::parse(
        r#"
        version = "p1"
        [fields.wo_no]
        type = "token"
        importance = "critical"
        [fields.remark]
        type = "free_text"
        importance = "reference"
        [fields.note]
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

fn base_packet() -> NormalizedPacket {
    let mut p = NormalizedPacket::default();
    p.values
        .insert("wo_no".into(), Some(CanonicalValue::Token("WO-001".into())));
    p.values
        .insert("remark".into(), Some(CanonicalValue::FreeText("base".into())));
    p.values
        .insert("note".into(), Some(CanonicalValue::FreeText("base".into())));
    p
}

proptest! {
    // ── 1. Mutating free text never moves packet_hash ───────────────

    #[test]
    fn free_text_mutations_never_move_packet_hash(
        remark in "[a-zA-Z0-9 .,\n]{0,80}",
        note in "[a-zA-Z0-9 .,\n]{0,80}",
    ) {
        let c = contract();
        let reference = base_packet();
        let mut mutated = base_packet();
        mutated.values.insert("remark".into(), Some(CanonicalValue::FreeText(remark.clone())));
        mutated.values.insert("note".into(), Some(CanonicalValue::FreeText(note.clone())));

        prop_assert_eq!(
            packet_hash(&c, &reference).unwrap(),
            packet_hash(&c, &mutated).unwrap()
        );

        // The full hash must move whenever the prose actually changed.
        if remark != "base" || note != "base" {
            prop_assert_ne!(
                packet_full_hash(&reference).unwrap(),
                packet_full_hash(&mutated).unwrap()
            );
        }
    }

    // ── 2. Mutating the token field moves both hashes ───────────────

    #[test]
    fn token_mutations_move_both_hashes(wo in "[A-Z]{2}-[0-9]{3,6}") {
        let c = contract();
        let reference = base_packet();
        let mut mutated = base_packet();
        mutated.values.insert("wo_no".into(), Some(CanonicalValue::Token(wo.clone())));

        if wo != "WO-001" {
            prop_assert_ne!(
                packet_hash(&c, &reference).unwrap(),
                packet_hash(&c, &mutated).unwrap()
            );
            prop_assert_ne!(
                packet_full_hash(&reference).unwrap(),
                packet_full_hash(&mutated).unwrap()
            );
        }
    }
}
