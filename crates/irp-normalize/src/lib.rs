// SPDX-License-Identifier: MIT OR Apache-2.0
//! Type-directed canonicalization of raw inspection inputs.
//!
//! Normalization is pure and deterministic. Numbers become
//! arbitrary-precision decimals serialized as fixed-point strings (no binary
//! floating point ever represents a field value); dates become ISO 8601;
//! tokens collapse internal whitespace; free text keeps its line breaks.
//!
//! NaN and infinities never survive normalization: their presence rejects
//! the run regardless of field importance.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate};
use irp_contract::FieldContract;
use irp_core::{
    CanonicalValue, FieldType, Importance, MeasurementRow, NormalizedPacket, RawPacket, Warning,
    WarningCode,
};
use irp_error::{ErrorCode, PipelineError, PipelineResult};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

// ---------------------------------------------------------------------------
// Value-level normalization
// ---------------------------------------------------------------------------

/// Failure of a single value's type-directed parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// The input is not a parseable decimal.
    #[error("not a decimal number: {input:?}")]
    InvalidNumber {
        /// The offending input.
        input: String,
    },

    /// The input is NaN or an infinity. Always rejects the run.
    #[error("non-finite numeric input: {input:?}")]
    NonFinite {
        /// The offending input.
        input: String,
    },

    /// The input matches none of the accepted date forms.
    #[error("not a recognisable date: {input:?}")]
    InvalidDate {
        /// The offending input.
        input: String,
    },
}

/// Tokens that denote a non-finite number in any casing.
const NON_FINITE: &[&str] = &[
    "nan", "inf", "-inf", "+inf", "infinity", "-infinity", "+infinity", "∞", "-∞", "+∞",
];

/// Declared non-ISO date formats accepted on input.
const DATE_FORMATS: &[&str] = &["%Y/%m/%d", "%Y.%m.%d", "%d.%m.%Y", "%m/%d/%Y", "%Y%m%d"];

/// Spreadsheet date serials are interpreted against the 1899-12-30 epoch.
/// The accepted window spans 1954..=2064; integers outside it fall through
/// to the literal date formats.
const SERIAL_MIN: i64 = 20_000;
const SERIAL_MAX: i64 = 60_000;

/// Canonicalise one raw value under the given field type.
///
/// # Errors
///
/// Returns [`NormalizeError`] when the value fails its type-directed parse.
pub fn normalize_value(field_type: FieldType, raw: &str) -> Result<CanonicalValue, NormalizeError> {
    match field_type {
        FieldType::Token => Ok(CanonicalValue::Token(collapse_whitespace(raw))),
        FieldType::FreeText => Ok(CanonicalValue::FreeText(raw.trim().to_string())),
        FieldType::Number => normalize_number(raw),
        FieldType::Date => normalize_date(raw),
    }
}

/// Strip leading/trailing whitespace and collapse internal runs to one space.
fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_number(raw: &str) -> Result<CanonicalValue, NormalizeError> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    if NON_FINITE.contains(&lowered.as_str()) {
        return Err(NormalizeError::NonFinite {
            input: trimmed.to_string(),
        });
    }

    // Exponent notation is a tell that the value passed through a binary
    // float somewhere upstream. Logged, not rejected.
    if trimmed.contains(['e', 'E']) {
        debug!(target: "irp.normalize", input = trimmed, "float-style exponent notation on number field");
    }

    let decimal = BigDecimal::from_str(trimmed).map_err(|_| NormalizeError::InvalidNumber {
        input: trimmed.to_string(),
    })?;
    Ok(CanonicalValue::Number(decimal.normalized().to_plain_string()))
}

fn normalize_date(raw: &str) -> Result<CanonicalValue, NormalizeError> {
    let trimmed = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(CanonicalValue::Date(date.format("%Y-%m-%d").to_string()));
    }

    // Spreadsheet date serial (days since 1899-12-30).
    if trimmed.chars().all(|c| c.is_ascii_digit())
        && let Ok(serial) = trimmed.parse::<i64>()
        && (SERIAL_MIN..=SERIAL_MAX).contains(&serial)
    {
        let epoch = NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default();
        if let Some(date) = epoch.checked_add_signed(Duration::days(serial)) {
            return Ok(CanonicalValue::Date(date.format("%Y-%m-%d").to_string()));
        }
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(CanonicalValue::Date(date.format("%Y-%m-%d").to_string()));
        }
    }

    Err(NormalizeError::InvalidDate {
        input: trimmed.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Packet-level normalization
// ---------------------------------------------------------------------------

/// Canonicalise a raw packet against the field contract.
///
/// Every declared field gets an entry in the result: `Some(canonical)` on a
/// successful parse, `None` when the field was absent or a reference field
/// failed its parse (the latter also records a `PARSE_ERROR_REFERENCE`
/// warning). Raw keys are resolved through the contract's alias index;
/// undeclared keys are ignored.
///
/// # Errors
///
/// - [`ErrorCode::InvalidData`] when any numeric input is NaN or infinite,
///   irrespective of field importance;
/// - [`ErrorCode::ParseErrorCritical`] when a critical field fails its parse.
pub fn normalize_packet(
    contract: &FieldContract,
    raw: &RawPacket,
) -> PipelineResult<(NormalizedPacket, Vec<Warning>)> {
    let mut warnings = Vec::new();

    // Resolve raw keys (including aliases) onto canonical field keys.
    let mut raw_by_key: BTreeMap<&str, &str> = BTreeMap::new();
    for (key, value) in &raw.values {
        match contract.resolve(key) {
            Some(spec) => {
                raw_by_key.insert(spec.key.as_str(), value.as_str());
            }
            None => {
                debug!(target: "irp.normalize", key, "ignoring undeclared field");
            }
        }
    }

    let mut values: BTreeMap<String, Option<CanonicalValue>> = BTreeMap::new();
    for spec in contract.fields() {
        let supplied = raw_by_key
            .get(spec.key.as_str())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());

        let Some(raw_value) = supplied else {
            values.insert(spec.key.clone(), None);
            continue;
        };

        match normalize_value(spec.field_type, raw_value) {
            Ok(canonical) => {
                values.insert(spec.key.clone(), Some(canonical));
            }
            Err(NormalizeError::NonFinite { input }) => {
                return Err(PipelineError::new(
                    ErrorCode::InvalidData,
                    format!("non-finite value in field '{}'", spec.key),
                )
                .with_context("field", spec.key.clone())
                .with_context("input", input));
            }
            Err(err) if spec.importance == Importance::Critical => {
                return Err(PipelineError::new(
                    ErrorCode::ParseErrorCritical,
                    format!("critical field '{}' failed to parse: {err}", spec.key),
                )
                .with_context("field", spec.key.clone())
                .with_context("input", raw_value));
            }
            Err(err) => {
                values.insert(spec.key.clone(), None);
                warnings.push(
                    Warning::new(
                        WarningCode::ParseErrorReference,
                        spec.key.clone(),
                        format!("reference field nulled: {err}"),
                    )
                    .with_original(raw_value),
                );
            }
        }
    }

    let measurement_rows = normalize_rows(&raw.measurement_rows)?;

    Ok((
        NormalizedPacket {
            values,
            measurement_rows,
        },
        warnings,
    ))
}

/// Canonicalise measurement cells: finite decimals become fixed-point
/// strings, everything else is token-collapsed. Non-finite cells reject.
fn normalize_rows(rows: &[MeasurementRow]) -> PipelineResult<Vec<MeasurementRow>> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut cells = BTreeMap::new();
        for (label, cell) in &row.cells {
            let canonical = match normalize_number(cell) {
                Ok(CanonicalValue::Number(n)) => n,
                Err(NormalizeError::NonFinite { input }) => {
                    return Err(PipelineError::new(
                        ErrorCode::InvalidData,
                        format!("non-finite measurement in row {} column '{label}'", row.index),
                    )
                    .with_context("row", row.index)
                    .with_context("column", label.clone())
                    .with_context("input", input));
                }
                _ => collapse_whitespace(cell),
            };
            cells.insert(label.clone(), canonical);
        }
        out.push(MeasurementRow {
            index: row.index,
            cells,
        });
    }
    out.sort_by_key(|r| r.index);
    Ok(out)
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
            [fields.thickness]
            type = "number"
            importance = "critical"
            [fields.width]
            type = "number"
            importance = "reference"
            [fields.inspected_on]
            type = "date"
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

    // -- 1. Token whitespace collapses ---------------------------------------

    #[test]
    fn token_whitespace_collapses() {
        let v = normalize_value(FieldType::Token, "  WO   -  001\t x ").unwrap();
        assert_eq!(v.as_str(), "WO - 001 x");
    }

    // -- 2. Free text keeps internal line breaks -----------------------------

    #[test]
    fn free_text_keeps_line_breaks() {
        let v = normalize_value(FieldType::FreeText, "  line one\nline two \n").unwrap();
        assert_eq!(v.as_str(), "line one\nline two");
    }

    // -- 3. Number trailing zeros strip, value preserved ---------------------

    #[test]
    fn number_trailing_zeros_strip() {
        assert_eq!(
            normalize_value(FieldType::Number, "3.140").unwrap().as_str(),
            "3.14"
        );
        assert_eq!(normalize_value(FieldType::Number, "1.0").unwrap().as_str(), "1");
        assert_eq!(
            normalize_value(FieldType::Number, "0.500").unwrap().as_str(),
            "0.5"
        );
        assert_eq!(normalize_value(FieldType::Number, "-2.00").unwrap().as_str(), "-2");
    }

    // -- 4. NaN and infinities are non-finite --------------------------------

    #[test]
    fn nan_and_infinities_are_non_finite() {
        for bad in ["NaN", "nan", "inf", "-Inf", "Infinity", "∞"] {
            let err = normalize_value(FieldType::Number, bad).unwrap_err();
            assert!(matches!(err, NormalizeError::NonFinite { .. }), "{bad}");
        }
    }

    // -- 5. Date forms canonicalise to ISO -----------------------------------

    #[test]
    fn date_forms_canonicalise_to_iso() {
        for (input, expected) in [
            ("2024-01-15", "2024-01-15"),
            ("2024/01/15", "2024-01-15"),
            ("2024.01.15", "2024-01-15"),
            ("20240115", "2024-01-15"),
            ("15.01.2024", "2024-01-15"),
        ] {
            assert_eq!(
                normalize_value(FieldType::Date, input).unwrap().as_str(),
                expected,
                "{input}"
            );
        }
    }

    // -- 6. Spreadsheet date serial ------------------------------------------

    #[test]
    fn spreadsheet_date_serial() {
        // 45292 days past 1899-12-30 is 2024-01-01.
        let v = normalize_value(FieldType::Date, "45292").unwrap();
        assert_eq!(v.as_str(), "2024-01-01");
    }

    // -- 7. Critical parse failure rejects the packet ------------------------

    #[test]
    fn critical_parse_failure_rejects() {
        let raw = RawPacket::default()
            .with_value("wo_no", "WO-001")
            .with_value("thickness", "not-a-number");
        let err = normalize_packet(&contract(), &raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseErrorCritical);
        assert_eq!(err.context["field"], "thickness");
    }

    // -- 8. Reference parse failure nulls with warning -----------------------

    #[test]
    fn reference_parse_failure_nulls_with_warning() {
        let raw = RawPacket::default()
            .with_value("wo_no", "WO-001")
            .with_value("thickness", "3.14")
            .with_value("width", "wide");
        let (packet, warnings) = normalize_packet(&contract(), &raw).unwrap();
        assert!(packet.get("width").is_none());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WarningCode::ParseErrorReference);
        assert_eq!(warnings[0].original_value.as_deref(), Some("wide"));
    }

    // -- 9. Non-finite rejects even on reference fields ----------------------

    #[test]
    fn non_finite_rejects_even_on_reference_fields() {
        let raw = RawPacket::default()
            .with_value("wo_no", "WO-001")
            .with_value("thickness", "1")
            .with_value("width", "NaN");
        let err = normalize_packet(&contract(), &raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidData);
    }

    // -- 10. Non-finite measurement cell rejects -----------------------------

    #[test]
    fn non_finite_measurement_cell_rejects() {
        let mut raw = RawPacket::default().with_value("wo_no", "WO-001").with_value("thickness", "1");
        raw.measurement_rows.push(MeasurementRow {
            index: 0,
            cells: BTreeMap::from([("value".to_string(), "NaN".to_string())]),
        });
        let err = normalize_packet(&contract(), &raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidData);
        assert_eq!(err.context["row"], 0);
    }

    // -- 11. Measurement rows sort by index, cells canonicalise --------------

    #[test]
    fn measurement_rows_sort_and_canonicalise() {
        let mut raw = RawPacket::default().with_value("wo_no", "WO-001").with_value("thickness", "1");
        raw.measurement_rows.push(MeasurementRow {
            index: 1,
            cells: BTreeMap::from([("value".to_string(), "2.50".to_string())]),
        });
        raw.measurement_rows.push(MeasurementRow {
            index: 0,
            cells: BTreeMap::from([("result".to_string(), "  PASS ".to_string())]),
        });
        let (packet, _) = normalize_packet(&contract(), &raw).unwrap();
        assert_eq!(packet.measurement_rows[0].index, 0);
        assert_eq!(packet.measurement_rows[0].cells["result"], "PASS");
        assert_eq!(packet.measurement_rows[1].cells["value"], "2.5");
    }

    // -- 12. Whitespace-only raw values count as absent -----------------------

    #[test]
    fn empty_raw_values_count_as_absent() {
        let raw = RawPacket::default()
            .with_value("wo_no", "WO-001")
            .with_value("thickness", "2")
            .with_value("inspected_on", "   ");
        let (packet, warnings) = normalize_packet(&contract(), &raw).unwrap();
        assert!(packet.get("inspected_on").is_none());
        assert!(warnings.is_empty());
    }
}
