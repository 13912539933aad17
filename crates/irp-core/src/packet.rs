// SPDX-License-Identifier: MIT OR Apache-2.0
//! Raw and normalized packet types.
//!
//! A [`RawPacket`] is what intake hands the pipeline; a [`NormalizedPacket`]
//! is what every downstream stage consumes. Canonical values are always
//! strings (numbers are fixed-point decimal strings; no binary floating
//! point ever represents a field value).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::FieldType;

/// A canonical post-normalization value.
///
/// Every variant carries the canonical string form, so serializing a packet
/// never involves float formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CanonicalValue {
    /// Whitespace-collapsed short text.
    Token(String),
    /// Trimmed prose with internal line breaks preserved.
    FreeText(String),
    /// Fixed-point decimal string with trailing zeros stripped.
    Number(String),
    /// ISO 8601 date string.
    Date(String),
}

impl CanonicalValue {
    /// The canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Token(s) | Self::FreeText(s) | Self::Number(s) | Self::Date(s) => s,
        }
    }

    /// The field type this value was normalized under.
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Token(_) => FieldType::Token,
            Self::FreeText(_) => FieldType::FreeText,
            Self::Number(_) => FieldType::Number,
            Self::Date(_) => FieldType::Date,
        }
    }
}

/// One measurement row with canonical cells, ordered by `index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MeasurementRow {
    /// Zero-based row index within the measurement table.
    pub index: u32,
    /// Canonical cell values keyed by column label.
    pub cells: BTreeMap<String, String>,
}

/// Free-form input as collected during intake. Discarded after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RawPacket {
    /// Raw field values keyed by field key or alias.
    pub values: BTreeMap<String, String>,
    /// Raw measurement rows (cells keyed by column label).
    pub measurement_rows: Vec<MeasurementRow>,
}

impl RawPacket {
    /// Insert a raw value, returning the updated packet (test convenience).
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

/// The output of the normalizer and the input to everything downstream.
///
/// `values` holds an entry for every declared field: `Some` for a
/// canonicalised value, `None` for a reference field that failed its parse
/// or was never supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedPacket {
    /// Canonical values keyed by canonical field key.
    pub values: BTreeMap<String, Option<CanonicalValue>>,
    /// Measurement rows with canonical cells.
    pub measurement_rows: Vec<MeasurementRow>,
}

impl NormalizedPacket {
    /// Look up a canonical value by field key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CanonicalValue> {
        self.values.get(key).and_then(|v| v.as_ref())
    }

    /// The work-order number, when present.
    #[must_use]
    pub fn wo_no(&self) -> Option<&str> {
        self.get("wo_no").map(CanonicalValue::as_str)
    }

    /// The production line, when present.
    #[must_use]
    pub fn line(&self) -> Option<&str> {
        self.get("line").map(CanonicalValue::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- 1. Canonical values serialise tagged ---------------------------------

    #[test]
    fn canonical_value_serializes_tagged() {
        let v = CanonicalValue::Number("3.14".into());
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"type":"number","value":"3.14"}"#);
    }

    // -- 2. Accessors find identity fields ------------------------------------

    #[test]
    fn identity_accessors() {
        let mut packet = NormalizedPacket::default();
        packet
            .values
            .insert("wo_no".into(), Some(CanonicalValue::Token("WO-001".into())));
        packet
            .values
            .insert("line".into(), Some(CanonicalValue::Token("L1".into())));
        packet.values.insert("lot".into(), None);
        assert_eq!(packet.wo_no(), Some("WO-001"));
        assert_eq!(packet.line(), Some("L1"));
        assert!(packet.get("lot").is_none());
    }
}
