// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property-based tests for the normalizer.

use irp_core::FieldType;
use irp_normalize::normalize_value;
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────

/// Arbitrary printable text with embedded whitespace runs.
fn messy_text() -> impl Strategy<Value = String> {
    "[ \ta-zA-Z0-9_,;:-]{0,40}".prop_map(|s| s)
}

/// Decimal strings: optional sign, digits, optional fraction.
fn decimal_string() -> impl Strategy<Value = String> {
    (any::<bool>(), 0u64..=99_999_999, 0u32..=6, 0u8..=3).prop_map(|(neg, int, scale, pad)| {
        let mut s = String::new();
        if neg {
            s.push('-');
        }
        s.push_str(&int.to_string());
        if scale > 0 {
            s.push('.');
            s.push_str(&"0".repeat(pad as usize));
            s.push_str(&(int % 10u64.pow(scale.min(6))).to_string());
        }
        s
    })
}

// ── 1. Normalization is idempotent per type ─────────────────────────

proptest! {
    #[test]
    fn token_normalization_is_idempotent(raw in messy_text()) {
        let once = normalize_value(FieldType::Token, &raw).unwrap();
        let twice = normalize_value(FieldType::Token, once.as_str()).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn free_text_normalization_is_idempotent(raw in messy_text()) {
        let once = normalize_value(FieldType::FreeText, &raw).unwrap();
        let twice = normalize_value(FieldType::FreeText, once.as_str()).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn number_normalization_is_idempotent(raw in decimal_string()) {
        let once = normalize_value(FieldType::Number, &raw).unwrap();
        let twice = normalize_value(FieldType::Number, once.as_str()).unwrap();
        prop_assert_eq!(once, twice);
    }
}

// ── 2. Canonical numbers never carry trailing fraction zeros ────────

proptest! {
    #[test]
    fn canonical_numbers_have_no_trailing_fraction_zeros(raw in decimal_string()) {
        let canonical = normalize_value(FieldType::Number, &raw).unwrap();
        let s = canonical.as_str();
        if s.contains('.') {
            prop_assert!(!s.ends_with('0'), "trailing zero survived: {}", s);
            prop_assert!(!s.ends_with('.'), "dangling point: {}", s);
        }
    }
}

// ── 3. Canonical dates round-trip through the ISO form ──────────────

proptest! {
    #[test]
    fn iso_dates_are_fixpoints(year in 1990i32..=2050, month in 1u32..=12, day in 1u32..=28) {
        let iso = format!("{year:04}-{month:02}-{day:02}");
        let once = normalize_value(FieldType::Date, &iso).unwrap();
        prop_assert_eq!(once.as_str(), iso.as_str());
    }
}
