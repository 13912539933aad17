// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! irp-render
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Workbook rendering: named cells and header-driven measurement rows.
pub mod workbook;

use chrono::{DateTime, Utc};
use irp_contract::FieldContract;
use irp_core::{NormalizedPacket, Warning, WarningCode};
use irp_error::{ErrorCode, PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub use workbook::render_workbook;

/// A minimal valid 1x1 transparent PNG, emitted when a template's photo
/// fallback policy asks for a blank image.
pub const BLANK_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0B, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

// ---------------------------------------------------------------------------
// Template manifest
// ---------------------------------------------------------------------------

/// What an image anchor renders to when its slot has no photo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoFallback {
    /// Embed a blank placeholder image.
    #[default]
    Blank,
    /// Drop the anchor entirely.
    Omit,
}

/// The `template.toml` manifest of a template folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateManifest {
    /// Document section.
    pub document: DocumentManifest,
    /// Workbook section.
    pub workbook: workbook::WorkbookManifest,
}

/// Document template declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentManifest {
    /// Template file, relative to the template folder.
    pub file: String,
    /// Fallback policy for image anchors without a photo.
    #[serde(default)]
    pub photo_fallback: PhotoFallback,
}

/// A loaded template folder.
#[derive(Debug, Clone)]
pub struct Template {
    manifest: TemplateManifest,
    document_text: String,
    workbook_grid: Vec<Vec<String>>,
}

impl Template {
    /// Load a template folder (`template.toml` plus the files it names).
    ///
    /// # Errors
    ///
    /// [`ErrorCode::Io`] on unreadable files or a malformed manifest.
    pub fn load(dir: &Path) -> PipelineResult<Self> {
        let manifest_path = dir.join("template.toml");
        let manifest_text = std::fs::read_to_string(&manifest_path)
            .map_err(|e| PipelineError::io(format!("read {}", manifest_path.display()), &e))?;
        let manifest: TemplateManifest = toml::from_str(&manifest_text).map_err(|e| {
            PipelineError::new(
                ErrorCode::Io,
                format!("malformed manifest {}: {e}", manifest_path.display()),
            )
        })?;

        let doc_path = dir.join(&manifest.document.file);
        let document_text = std::fs::read_to_string(&doc_path)
            .map_err(|e| PipelineError::io(format!("read {}", doc_path.display()), &e))?;

        let grid_path = dir.join(&manifest.workbook.file);
        let workbook_grid = workbook::read_grid(&grid_path)?;

        Ok(Self {
            manifest,
            document_text,
            workbook_grid,
        })
    }

    /// The parsed manifest.
    #[must_use]
    pub fn manifest(&self) -> &TemplateManifest {
        &self.manifest
    }

    /// The raw document template text.
    #[must_use]
    pub fn document_text(&self) -> &str {
        &self.document_text
    }

    /// The workbook template grid.
    #[must_use]
    pub fn workbook_grid(&self) -> &[Vec<String>] {
        &self.workbook_grid
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// One image the packager must place under `deliverables/images/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePlacement {
    /// Slot the image belongs to.
    pub slot_key: String,
    /// Source file under `derived/`; `None` means "write [`BLANK_PNG`]".
    pub source: Option<PathBuf>,
    /// Destination path relative to the deliverables folder.
    pub dest_rel: String,
}

/// The rendered artifacts, ready for the delivery packager.
#[derive(Debug, Clone)]
pub struct RenderedArtifacts {
    /// The report document text.
    pub report: String,
    /// The workbook as CSV text.
    pub workbook: String,
    /// Images referenced by the report.
    pub images: Vec<ImagePlacement>,
    /// Volatile artifact identifier stamped into the report header.
    pub artifact_id: Uuid,
}

/// Render both artifacts from a template, a validated packet, and the set
/// of derived photos.
///
/// `photos` maps slot keys to their published files under `derived/`;
/// `overridden` names the slots satisfied by an override (they fall back per
/// the template's photo policy, without an unresolved warning).
///
/// # Errors
///
/// [`ErrorCode::TemplateUnknownPlaceholder`] when the template references a
/// name the contract does not declare.
pub fn render(
    template: &Template,
    contract: &FieldContract,
    packet: &NormalizedPacket,
    photos: &BTreeMap<String, PathBuf>,
    overridden: &BTreeSet<String>,
    generated_at: DateTime<Utc>,
) -> PipelineResult<(RenderedArtifacts, Vec<Warning>)> {
    let artifact_id = Uuid::new_v4();
    let mut warnings = Vec::new();
    let mut images = Vec::new();

    let body = substitute_document(
        template,
        contract,
        packet,
        photos,
        overridden,
        &mut warnings,
        &mut images,
    )?;
    let report = format!(
        "<!-- generated_at: {} artifact: {} -->\n{}",
        generated_at.format("%Y-%m-%dT%H:%M:%SZ"),
        artifact_id,
        body
    );

    let workbook = workbook::render_workbook(template, contract, packet, &mut warnings)?;

    debug!(target: "irp.render", images = images.len(), "render complete");
    Ok((
        RenderedArtifacts {
            report,
            workbook,
            images,
            artifact_id,
        },
        warnings,
    ))
}

/// Substitute `{{ name }}` placeholders in the document template.
fn substitute_document(
    template: &Template,
    contract: &FieldContract,
    packet: &NormalizedPacket,
    photos: &BTreeMap<String, PathBuf>,
    overridden: &BTreeSet<String>,
    warnings: &mut Vec<Warning>,
    images: &mut Vec<ImagePlacement>,
) -> PipelineResult<String> {
    let text = template.document_text();
    let fallback = template.manifest().document.photo_fallback;
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            // An unterminated brace pair is literal text.
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let name = after[..close].trim();
        rest = &after[close + 2..];

        if let Some(slot_key) = name.strip_prefix("photo_") {
            out.push_str(&resolve_photo_anchor(
                contract, slot_key, photos, overridden, fallback, warnings, images,
            )?);
        } else {
            out.push_str(&resolve_field(contract, name, packet, warnings)?);
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn resolve_field(
    contract: &FieldContract,
    name: &str,
    packet: &NormalizedPacket,
    warnings: &mut Vec<Warning>,
) -> PipelineResult<String> {
    if contract.field(name).is_none() {
        return Err(PipelineError::new(
            ErrorCode::TemplateUnknownPlaceholder,
            format!("template references undeclared field '{name}'"),
        )
        .with_context("placeholder", name));
    }
    match packet.get(name) {
        Some(value) => Ok(value.as_str().to_string()),
        None => {
            warnings.push(Warning::new(
                WarningCode::PlaceholderUnresolved,
                name,
                "placeholder resolved to empty string",
            ));
            Ok(String::new())
        }
    }
}

fn resolve_photo_anchor(
    contract: &FieldContract,
    slot_key: &str,
    photos: &BTreeMap<String, PathBuf>,
    overridden: &BTreeSet<String>,
    fallback: PhotoFallback,
    warnings: &mut Vec<Warning>,
    images: &mut Vec<ImagePlacement>,
) -> PipelineResult<String> {
    if contract.slot(slot_key).is_none() {
        return Err(PipelineError::new(
            ErrorCode::TemplateUnknownPlaceholder,
            format!("template references undeclared photo slot '{slot_key}'"),
        )
        .with_context("placeholder", format!("photo_{slot_key}")));
    }

    if let Some(source) = photos.get(slot_key) {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_lowercase();
        let dest_rel = format!("images/{slot_key}.{ext}");
        images.push(ImagePlacement {
            slot_key: slot_key.to_string(),
            source: Some(source.clone()),
            dest_rel: dest_rel.clone(),
        });
        return Ok(format!("![{slot_key}]({dest_rel})"));
    }

    if !overridden.contains(slot_key) {
        warnings.push(Warning::new(
            WarningCode::PlaceholderUnresolved,
            slot_key,
            "image anchor has no photo and no override",
        ));
    }

    match fallback {
        PhotoFallback::Blank => {
            let dest_rel = "images/blank.png".to_string();
            if !images.iter().any(|i| i.dest_rel == dest_rel) {
                images.push(ImagePlacement {
                    slot_key: slot_key.to_string(),
                    source: None,
                    dest_rel: dest_rel.clone(),
                });
            }
            Ok(format!("![{slot_key}]({dest_rel})"))
        }
        PhotoFallback::Omit => Ok(String::new()),
    }
}

// ---------------------------------------------------------------------------
// Golden normalization
// ---------------------------------------------------------------------------

/// Fold volatile metadata for golden comparisons: ISO timestamps become
/// `<TS>` and UUIDs become `<UUID>`.
#[must_use]
pub fn normalize_volatile(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if let Some(len) = match_uuid(&text[i..]) {
            out.push_str("<UUID>");
            i += len;
        } else if let Some(len) = match_timestamp(&text[i..]) {
            out.push_str("<TS>");
            i += len;
        } else {
            let ch = text[i..].chars().next().unwrap_or('\u{FFFD}');
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    out
}

/// Match a `8-4-4-4-12` hex UUID at the start of `s`.
fn match_uuid(s: &str) -> Option<usize> {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];
    let mut pos = 0;
    for (idx, group) in GROUPS.iter().enumerate() {
        if idx > 0 {
            if s[pos..].chars().next() != Some('-') {
                return None;
            }
            pos += 1;
        }
        for _ in 0..*group {
            let c = s[pos..].chars().next()?;
            if !c.is_ascii_hexdigit() {
                return None;
            }
            pos += 1;
        }
    }
    Some(pos)
}

/// Match `YYYY-MM-DDTHH:MM:SS` with an optional fraction and `Z` suffix.
fn match_timestamp(s: &str) -> Option<usize> {
    let pattern = "DDDD-DD-DDTDD:DD:DD";
    if s.len() < pattern.len() {
        return None;
    }
    for (i, p) in pattern.bytes().enumerate() {
        let c = s.as_bytes()[i];
        match p {
            b'D' => {
                if !c.is_ascii_digit() {
                    return None;
                }
            }
            _ => {
                if c != p {
                    return None;
                }
            }
        }
    }
    let mut pos = pattern.len();
    if s.as_bytes().get(pos) == Some(&b'.') {
        pos += 1;
        while s.as_bytes().get(pos).is_some_and(u8::is_ascii_digit) {
            pos += 1;
        }
    }
    if s.as_bytes().get(pos) == Some(&b'Z') {
        pos += 1;
    }
    Some(pos)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
