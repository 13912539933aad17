// SPDX-License-Identifier: MIT OR Apache-2.0
//! Field-contract loading for the inspection pipeline.
//!
//! The contract file is a declarative TOML document listing the fields a
//! packet may carry (type, importance, aliases, override policy) and the
//! photo slots a job must satisfy (basename, required flag, preferred
//! extensions, retention). Loaded once at startup; immutable per process.
//!
//! The loader is the sole source of truth for which fields are in scope of
//! the judgement-equality hash: critical fields always, reference fields
//! only when their type is token, number, or date.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use irp_core::{FieldType, Importance, PurgeMode, RetentionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or compiling a contract file.
#[derive(Debug, thiserror::Error)]
pub enum ContractLoadError {
    /// The requested contract file was not found or unreadable.
    #[error("contract file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse contract: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Two fields declare the same alias after folding.
    #[error("alias '{alias}' declared by both '{first}' and '{second}'")]
    AliasCollision {
        /// The folded alias.
        alias: String,
        /// First field claiming it.
        first: String,
        /// Second field claiming it.
        second: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("contract validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Declarative file types
// ---------------------------------------------------------------------------

/// The on-disk shape of a contract file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractFile {
    /// Contract definition version, embedded in every run record.
    pub version: String,
    /// Field declarations keyed by canonical field key.
    pub fields: BTreeMap<String, FieldDecl>,
    /// Photo slot declarations.
    pub photos: PhotoDecl,
}

/// One declared field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Value type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Critical or reference.
    pub importance: Importance,
    /// Accepted aliases (matched case- and whitespace-insensitively).
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Whether an operator override may stand in for the value.
    #[serde(default)]
    pub override_allowed: bool,
    /// Whether that override must carry a structured reason.
    #[serde(default)]
    pub override_requires_reason: bool,
}

/// The `[photos]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoDecl {
    /// Extensions eligible for exact-basename matching.
    pub allowed_extensions: Vec<String>,
    /// Tie-break order across extensions.
    pub prefer_order: Vec<String>,
    /// Declared slots.
    pub slots: Vec<SlotDecl>,
    /// Retention settings for `_trash/` (falls back to process config).
    #[serde(default)]
    pub trash_retention: Option<RetentionDecl>,
}

/// One declared photo slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotDecl {
    /// Slot key (e.g. `overview`).
    pub key: String,
    /// Expected filename stem (e.g. `01_overview`).
    pub basename: String,
    /// Whether the slot must be satisfied for a run to succeed.
    #[serde(default)]
    pub required: bool,
    /// Whether an operator override may satisfy the slot.
    #[serde(default)]
    pub override_allowed: bool,
    /// Whether that override must carry a structured reason.
    #[serde(default)]
    pub override_requires_reason: bool,
    /// OCR keywords marking this slot as structured-text-bearing
    /// (e.g. `S/N`, `Serial`, `LOT`, `Model`). Empty means no OCR boost.
    #[serde(default)]
    pub ocr_keywords: Vec<String>,
}

/// Declarative retention block (sizes in MB/GB as authored).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionDecl {
    /// Age ceiling in days.
    pub retention_days: u32,
    /// Per-job `_trash/` size ceiling in megabytes.
    pub max_size_per_job_mb: u64,
    /// Host-level quota in gigabytes (advisory).
    pub max_total_size_gb: u64,
    /// Eviction behaviour.
    pub purge_mode: PurgeMode,
    /// Directory receiving compressed buckets.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
    /// Newest buckets always kept.
    pub min_keep_count: usize,
}

fn default_archive_dir() -> String {
    "_archive".into()
}

impl RetentionDecl {
    /// Convert to the compiled byte-denominated policy.
    #[must_use]
    pub fn compile(&self) -> RetentionPolicy {
        RetentionPolicy {
            days: self.retention_days,
            per_job_bytes: self.max_size_per_job_mb * 1024 * 1024,
            total_bytes: self.max_total_size_gb * 1024 * 1024 * 1024,
            min_keep_count: self.min_keep_count,
            mode: self.purge_mode,
            archive_dir: self.archive_dir.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled contract
// ---------------------------------------------------------------------------

/// A compiled field specification.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Canonical field key.
    pub key: String,
    /// Value type.
    pub field_type: FieldType,
    /// Critical or reference.
    pub importance: Importance,
    /// Declared aliases as authored.
    pub aliases: Vec<String>,
    /// Whether an override may stand in for the value.
    pub override_allowed: bool,
    /// Whether that override must carry a structured reason.
    pub override_requires_reason: bool,
}

impl FieldSpec {
    /// Whether this field participates in the judgement-equality hash.
    ///
    /// Free text never does, regardless of importance; prose edits must not
    /// flip judgement equality.
    #[must_use]
    pub fn in_judgement_scope(&self) -> bool {
        !matches!(self.field_type, FieldType::FreeText)
    }
}

/// A compiled photo slot specification.
#[derive(Debug, Clone)]
pub struct SlotSpec {
    /// Slot key.
    pub key: String,
    /// Expected filename stem.
    pub basename: String,
    /// Whether the slot must be satisfied.
    pub required: bool,
    /// Whether an override may satisfy the slot.
    pub override_allowed: bool,
    /// Whether that override must carry a structured reason.
    pub override_requires_reason: bool,
    /// OCR keywords for structured-text slots.
    pub ocr_keywords: Vec<String>,
}

/// The loaded, immutable field contract.
#[derive(Debug, Clone)]
pub struct FieldContract {
    version: String,
    fields: BTreeMap<String, FieldSpec>,
    alias_index: BTreeMap<String, String>,
    slots: Vec<SlotSpec>,
    allowed_extensions: Vec<String>,
    prefer_order: Vec<String>,
    retention: Option<RetentionPolicy>,
}

/// Fold a key or alias for case- and whitespace-insensitive lookup.
fn fold_alias(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl FieldContract {
    /// Load and compile a contract from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ContractLoadError`] on unreadable files, parse failures,
    /// alias collisions, or semantic validation problems.
    pub fn load(path: &Path) -> Result<Self, ContractLoadError> {
        let content =
            std::fs::read_to_string(path).map_err(|_| ContractLoadError::FileNotFound {
                path: path.display().to_string(),
            })?;
        Self::parse(&content)
    }

    /// Parse and compile a contract from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ContractLoadError`] on parse failures, alias collisions, or
    /// semantic validation problems.
    pub fn parse(content: &str) -> Result<Self, ContractLoadError> {
        let file: ContractFile =
            toml::from_str(content).map_err(|e| ContractLoadError::ParseError {
                reason: e.to_string(),
            })?;
        Self::compile(file)
    }

    /// Compile a parsed [`ContractFile`].
    ///
    /// # Errors
    ///
    /// Returns [`ContractLoadError`] on alias collisions or semantic
    /// validation problems.
    pub fn compile(file: ContractFile) -> Result<Self, ContractLoadError> {
        let mut errors: Vec<String> = Vec::new();

        if file.version.trim().is_empty() {
            errors.push("contract version must not be empty".into());
        }
        if file.photos.allowed_extensions.is_empty() {
            errors.push("photos.allowed_extensions must not be empty".into());
        }

        let mut fields = BTreeMap::new();
        let mut alias_index: BTreeMap<String, String> = BTreeMap::new();

        for (key, decl) in &file.fields {
            if key.trim().is_empty() {
                errors.push("field key must not be empty".into());
                continue;
            }
            // The canonical key is itself an alias of the field.
            let mut names = vec![key.clone()];
            names.extend(decl.aliases.iter().cloned());
            for name in &names {
                let folded = fold_alias(name);
                if let Some(existing) = alias_index.get(&folded) {
                    if existing != key {
                        return Err(ContractLoadError::AliasCollision {
                            alias: folded,
                            first: existing.clone(),
                            second: key.clone(),
                        });
                    }
                } else {
                    alias_index.insert(folded, key.clone());
                }
            }
            fields.insert(
                key.clone(),
                FieldSpec {
                    key: key.clone(),
                    field_type: decl.field_type,
                    importance: decl.importance,
                    aliases: decl.aliases.clone(),
                    override_allowed: decl.override_allowed,
                    override_requires_reason: decl.override_requires_reason,
                },
            );
        }

        let mut slots = Vec::new();
        let mut seen_slot_keys = BTreeMap::new();
        for decl in &file.photos.slots {
            if decl.key.trim().is_empty() || decl.basename.trim().is_empty() {
                errors.push(format!("slot '{}' needs a key and a basename", decl.key));
                continue;
            }
            if seen_slot_keys.insert(decl.key.clone(), ()).is_some() {
                errors.push(format!("duplicate slot key '{}'", decl.key));
                continue;
            }
            slots.push(SlotSpec {
                key: decl.key.clone(),
                basename: decl.basename.clone(),
                required: decl.required,
                override_allowed: decl.override_allowed,
                override_requires_reason: decl.override_requires_reason,
                ocr_keywords: decl.ocr_keywords.clone(),
            });
        }

        if !errors.is_empty() {
            return Err(ContractLoadError::ValidationError { reasons: errors });
        }

        Ok(Self {
            version: file.version,
            fields,
            alias_index,
            slots,
            allowed_extensions: file.photos.allowed_extensions,
            prefer_order: file.photos.prefer_order,
            retention: file.photos.trash_retention.as_ref().map(RetentionDecl::compile),
        })
    }

    /// The contract's definition version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a field by canonical key.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.get(key)
    }

    /// Resolve a key or alias (case- and whitespace-insensitive) to its
    /// field spec.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&FieldSpec> {
        let folded = fold_alias(name);
        self.alias_index.get(&folded).and_then(|k| self.fields.get(k))
    }

    /// All declared fields, in key order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }

    /// All declared photo slots, in declaration order.
    #[must_use]
    pub fn slots(&self) -> &[SlotSpec] {
        &self.slots
    }

    /// Look up a slot by key.
    #[must_use]
    pub fn slot(&self, key: &str) -> Option<&SlotSpec> {
        self.slots.iter().find(|s| s.key == key)
    }

    /// Extensions eligible for slot matching.
    #[must_use]
    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    /// Extension tie-break order.
    #[must_use]
    pub fn prefer_order(&self) -> &[String] {
        &self.prefer_order
    }

    /// The compiled retention policy, when the contract declares one.
    #[must_use]
    pub fn retention(&self) -> Option<&RetentionPolicy> {
        self.retention.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
