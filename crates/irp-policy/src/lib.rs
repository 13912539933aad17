// SPDX-License-Identifier: MIT OR Apache-2.0
//! Field-contract validation and the override escape hatch.
//!
//! The validator is fail-fast: a missing critical field, a malformed
//! override reason, or an uncovered required slot rejects the run before
//! any filesystem mutation happens. The override subsystem is the one place
//! allowed to soften a failure — an unknown reason code is rewritten to
//! `OTHER` with a warning instead of rejecting.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use irp_contract::FieldContract;
use irp_core::{
    FieldType, Importance, NormalizedPacket, OverrideApplication, OverrideCode, OverrideReason,
    Warning, WarningCode,
};
use irp_error::{ErrorCode, PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

// ---------------------------------------------------------------------------
// Override parsing
// ---------------------------------------------------------------------------

/// Exact-match filler tokens (compared after trim + lowercase) that never
/// count as an override reason. Includes the usual keyboard-mash hangul
/// fillers seen in production intake.
pub const BANNED_TOKENS: &[&str] = &[
    "ok", "n/a", "na", "none", "-", ".", "..", "x", "xx", "test", "asdf", "없음", "해당없음",
    "ㅇㅇ", "ㅁㅁ", "ㅎㅎ",
];

/// Minimum number of visible (non-whitespace) characters in a detail.
pub const MIN_DETAIL_VISIBLE_CHARS: usize = 10;

/// An override as supplied by the operator: either the structured form or a
/// legacy free string (`"<CODE>: <detail>"` or bare prose).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverrideInput {
    /// Structured `{code, detail}` form. `code` stays a string so unknown
    /// codes can be rewritten rather than failing deserialization.
    Structured {
        /// Reason code as supplied.
        code: String,
        /// Free-form detail.
        detail: String,
        /// Acting user, when supplied.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<String>,
    },
    /// Legacy free-string form.
    Legacy(String),
}

/// Outcome of parsing one override input.
#[derive(Debug, Clone)]
pub struct ParsedOverride {
    /// The structured reason (code possibly rewritten to `OTHER`).
    pub reason: OverrideReason,
    /// Acting user, when supplied.
    pub actor: Option<String>,
    /// A rewrite warning, when the supplied code was unrecognised.
    pub warning: Option<Warning>,
}

/// Parse an override input into the structured form.
///
/// Unknown codes are accepted but rewritten to `OTHER` with an
/// `OVERRIDE_CODE_REWRITTEN` warning. Legacy strings of the shape
/// `<CODE>: <detail>` with a recognised code become that code; everything
/// else is classified `OTHER` with the full string as detail.
#[must_use]
pub fn parse_override(key: &str, input: &OverrideInput) -> ParsedOverride {
    match input {
        OverrideInput::Structured {
            code,
            detail,
            actor,
        } => match OverrideCode::parse(code) {
            Some(parsed) => ParsedOverride {
                reason: OverrideReason {
                    code: parsed,
                    detail: detail.clone(),
                },
                actor: actor.clone(),
                warning: None,
            },
            None => ParsedOverride {
                reason: OverrideReason {
                    code: OverrideCode::Other,
                    detail: detail.clone(),
                },
                actor: actor.clone(),
                warning: Some(
                    Warning::new(
                        WarningCode::OverrideCodeRewritten,
                        key,
                        format!("unrecognised override code '{code}' rewritten to OTHER"),
                    )
                    .with_original(code.clone())
                    .with_resolved(OverrideCode::Other.as_str()),
                ),
            },
        },
        OverrideInput::Legacy(raw) => {
            if let Some((prefix, rest)) = raw.split_once(':') {
                let prefix = prefix.trim();
                if prefix.chars().all(|c| c.is_ascii_uppercase() || c == '_')
                    && let Some(code) = OverrideCode::parse(prefix)
                {
                    return ParsedOverride {
                        reason: OverrideReason {
                            code,
                            detail: rest.trim_start().to_string(),
                        },
                        actor: None,
                        warning: None,
                    };
                }
            }
            ParsedOverride {
                reason: OverrideReason {
                    code: OverrideCode::Other,
                    detail: raw.clone(),
                },
                actor: None,
                warning: None,
            }
        }
    }
}

/// Validate an override detail against the banned-token list and the
/// visible-length floor.
///
/// # Errors
///
/// Returns [`ErrorCode::InvalidOverrideReason`] on a banned or under-length
/// detail.
pub fn validate_detail(key: &str, detail: &str) -> PipelineResult<()> {
    let folded = detail.trim().to_lowercase();
    if BANNED_TOKENS.contains(&folded.as_str()) {
        return Err(PipelineError::new(
            ErrorCode::InvalidOverrideReason,
            format!("override detail for '{key}' is a banned filler token"),
        )
        .with_context("key", key)
        .with_context("detail", detail));
    }
    let visible = detail.chars().filter(|c| !c.is_whitespace()).count();
    if visible < MIN_DETAIL_VISIBLE_CHARS {
        return Err(PipelineError::new(
            ErrorCode::InvalidOverrideReason,
            format!(
                "override detail for '{key}' has {visible} visible characters (minimum {MIN_DETAIL_VISIBLE_CHARS})"
            ),
        )
        .with_context("key", key)
        .with_context("detail", detail));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// The validator's output: accepted overrides and accumulated warnings.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    /// One application record per accepted override, in key order.
    pub applications: Vec<OverrideApplication>,
    /// Accepted reasons keyed by field or slot, for downstream stages.
    pub reasons: BTreeMap<String, OverrideReason>,
    /// Non-fatal warnings (code rewrites).
    pub warnings: Vec<Warning>,
}

/// Validate a normalized packet against the contract.
///
/// Checks, in order: every critical field is present (or covered by a valid
/// field override where the contract allows one); no canonical value
/// violates its declared type; every required slot without content carries a
/// well-formed override reason where the contract allows one.
///
/// `slot_content` reports, per slot key, whether the photo engine found any
/// candidate content under `raw/`.
///
/// # Errors
///
/// - [`ErrorCode::MissingCriticalField`] — critical field absent, no valid
///   override route;
/// - [`ErrorCode::InvalidOverrideReason`] — banned or under-length detail;
/// - [`ErrorCode::PhotoRequiredMissing`] / [`ErrorCode::PhotoOverrideRequired`]
///   — uncovered required slot;
/// - [`ErrorCode::Internal`] — a canonical value contradicts its declared
///   type (a normalizer bug, not an input problem).
pub fn validate_packet(
    contract: &FieldContract,
    packet: &NormalizedPacket,
    overrides: &BTreeMap<String, OverrideInput>,
    slot_content: &BTreeMap<String, bool>,
) -> PipelineResult<ValidationOutcome> {
    let mut outcome = ValidationOutcome::default();

    for spec in contract.fields() {
        let value = packet.get(&spec.key);

        if let Some(canonical) = value {
            let expected = spec.field_type;
            let actual = canonical.field_type();
            // free_text tolerates token-shaped values (both are plain text).
            let compatible = actual == expected
                || (expected == FieldType::FreeText && actual == FieldType::Token);
            if !compatible {
                return Err(PipelineError::new(
                    ErrorCode::Internal,
                    format!("field '{}' normalized under the wrong type", spec.key),
                )
                .with_context("field", spec.key.clone()));
            }
            continue;
        }

        if spec.importance == Importance::Reference {
            continue;
        }

        // Critical and null: an override is the only way through.
        match overrides.get(&spec.key) {
            Some(input) if spec.override_allowed => {
                accept_override(&spec.key, input, spec.override_requires_reason, &mut outcome)?;
            }
            _ => {
                return Err(PipelineError::new(
                    ErrorCode::MissingCriticalField,
                    format!("critical field '{}' is missing", spec.key),
                )
                .with_context("field", spec.key.clone()));
            }
        }
    }

    for slot in contract.slots() {
        let has_content = slot_content.get(&slot.key).copied().unwrap_or(false);
        if has_content || !slot.required {
            continue;
        }
        match overrides.get(&slot.key) {
            Some(input) if slot.override_allowed => {
                accept_override(&slot.key, input, slot.override_requires_reason, &mut outcome)?;
            }
            Some(_) | None if !slot.override_allowed => {
                return Err(PipelineError::new(
                    ErrorCode::PhotoRequiredMissing,
                    format!("required slot '{}' has no content", slot.key),
                )
                .with_context("slot", slot.key.clone()));
            }
            _ => {
                return Err(PipelineError::new(
                    ErrorCode::PhotoOverrideRequired,
                    format!(
                        "required slot '{}' has no content and no override was supplied",
                        slot.key
                    ),
                )
                .with_context("slot", slot.key.clone()));
            }
        }
    }

    // Overrides aimed at keys that need no covering are ignored.
    for key in overrides.keys() {
        if !outcome.reasons.contains_key(key) {
            debug!(target: "irp.policy", key, "override supplied for a key that needs no covering");
        }
    }

    Ok(outcome)
}

fn accept_override(
    key: &str,
    input: &OverrideInput,
    requires_reason: bool,
    outcome: &mut ValidationOutcome,
) -> PipelineResult<()> {
    let parsed = parse_override(key, input);
    if requires_reason {
        validate_detail(key, &parsed.reason.detail)?;
    }
    if let Some(warning) = parsed.warning {
        outcome.warnings.push(warning);
    }
    outcome.applications.push(OverrideApplication {
        key: key.to_string(),
        code: parsed.reason.code,
        detail: parsed.reason.detail.clone(),
        actor: parsed.actor,
    });
    outcome.reasons.insert(key.to_string(), parsed.reason);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
