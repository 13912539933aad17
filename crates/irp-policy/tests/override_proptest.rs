// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property-based tests for override-reason validation.

use irp_policy::{BANNED_TOKENS, MIN_DETAIL_VISIBLE_CHARS, validate_detail};
use proptest::prelude::*;

// ── 1. Banned tokens are rejected under any casing and padding ──────

proptest! {
    #[test]
    fn banned_tokens_rejected_under_casing_and_padding(
        idx in 0usize..BANNED_TOKENS.len(),
        left in 0usize..4,
        right in 0usize..4,
        upper in any::<bool>(),
    ) {
        let token = BANNED_TOKENS[idx];
        let cased = if upper { token.to_uppercase() } else { token.to_string() };
        let padded = format!("{}{}{}", " ".repeat(left), cased, " ".repeat(right));
        prop_assert!(validate_detail("slot", &padded).is_err(), "accepted: {:?}", padded);
    }
}

// ── 2. Visible length is counted without whitespace ─────────────────

proptest! {
    #[test]
    fn whitespace_does_not_count_toward_visible_length(spaces in 10usize..40) {
        // Whitespace alone can never satisfy the floor.
        let padding = " ".repeat(spaces);
        prop_assert!(validate_detail("slot", &padding).is_err());
    }

    #[test]
    fn long_enough_prose_is_accepted(n in MIN_DETAIL_VISIBLE_CHARS..60) {
        let detail: String = std::iter::repeat('기').take(n).collect();
        prop_assert!(validate_detail("slot", &detail).is_ok());
    }
}
