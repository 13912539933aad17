// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-addressed fingerprints over normalized inspection packets.
//!
//! Two SHA-256 hashes are computed from a canonical JSON form (sorted keys,
//! compact separators, UTF-8): `packet_hash` covers the judgement scope —
//! every non-free-text field — so two runs with equal hashes are
//! judgement-equal; `packet_full_hash` covers every declared field and
//! exists for change detection and audit.
//!
//! Numeric values are already decimal strings at this point, so no float
//! formatting can leak into either hash. The algorithm identifier is
//! [`irp_core::PACKET_HASH_VERSION`]; hashes across versions are not
//! comparable.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use irp_contract::FieldContract;
use irp_core::{CanonicalValue, ContractError, NormalizedPacket, PACKET_HASH_VERSION, sha256_hex};
use serde_json::{Map, Value, json};

/// The pair of hashes recorded on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprints {
    /// Judgement-equality hash (non-free-text fields).
    pub packet_hash: String,
    /// Change-detection hash (every declared field).
    pub packet_full_hash: String,
}

/// Compute both fingerprints for a packet.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if serialization fails.
pub fn fingerprint(
    contract: &FieldContract,
    packet: &NormalizedPacket,
) -> Result<Fingerprints, ContractError> {
    Ok(Fingerprints {
        packet_hash: packet_hash(contract, packet)?,
        packet_full_hash: packet_full_hash(packet)?,
    })
}

/// Compute the judgement-equality hash.
///
/// Includes every declared field outside free text (critical and reference
/// alike) plus the measurement rows; free-text fields are excluded so prose
/// edits cannot flip judgement equality.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if serialization fails.
pub fn packet_hash(
    contract: &FieldContract,
    packet: &NormalizedPacket,
) -> Result<String, ContractError> {
    let mut fields = Map::new();
    for spec in contract.fields() {
        if !spec.in_judgement_scope() {
            continue;
        }
        fields.insert(spec.key.clone(), value_json(packet.get(&spec.key)));
    }
    hash_form(fields, packet)
}

/// Compute the full change-detection hash over every declared field.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if serialization fails.
pub fn packet_full_hash(packet: &NormalizedPacket) -> Result<String, ContractError> {
    let mut fields = Map::new();
    for (key, value) in &packet.values {
        fields.insert(key.clone(), value_json(value.as_ref()));
    }
    hash_form(fields, packet)
}

fn value_json(value: Option<&CanonicalValue>) -> Value {
    match value {
        Some(v) => Value::String(v.as_str().to_string()),
        None => Value::Null,
    }
}

fn hash_form(fields: Map<String, Value>, packet: &NormalizedPacket) -> Result<String, ContractError> {
    let mut ordered: Vec<_> = packet.measurement_rows.iter().collect();
    ordered.sort_by_key(|row| row.index);
    let rows: Vec<Value> = ordered
        .iter()
        .map(|row| {
            json!({
                "index": row.index,
                "cells": &row.cells,
            })
        })
        .collect();

    let form = json!({
        "packet_hash_version": PACKET_HASH_VERSION,
        "fields": Value::Object(fields),
        "measurement_rows": rows,
    });
    let canonical = serde_json::to_string(&form)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

#[cfg(test)]
mod tests;
