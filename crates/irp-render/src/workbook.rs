// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workbook rendering.
//!
//! The workbook template is a CSV grid plus a manifest section declaring
//! named cells (`field_key -> "B2"`) and, optionally, the header labels of a
//! measurement table. Header-driven mode locates each label's column in the
//! header row, so reordering columns in the template does not break the
//! render.

use irp_contract::FieldContract;
use irp_core::{NormalizedPacket, Warning, WarningCode};
use irp_error::{ErrorCode, PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::Template;

/// The `[workbook]` section of a template manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkbookManifest {
    /// CSV grid file, relative to the template folder.
    pub file: String,
    /// Direct named-range mapping: field key to cell reference.
    #[serde(default)]
    pub named_cells: BTreeMap<String, String>,
    /// Header-driven measurement extraction, when declared.
    #[serde(default)]
    pub measurements: Option<MeasurementManifest>,
}

/// Header-driven measurement declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementManifest {
    /// Labels that identify the header row (all must be present in it).
    pub header_labels: Vec<String>,
}

/// Read a CSV grid file into rows of cells.
///
/// # Errors
///
/// [`ErrorCode::Io`] on unreadable or malformed CSV.
pub fn read_grid(path: &Path) -> PipelineResult<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::new(ErrorCode::Io, format!("open {}: {e}", path.display())))?;
    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|e| PipelineError::new(ErrorCode::Io, format!("read {}: {e}", path.display())))?;
        grid.push(record.iter().map(str::to_string).collect());
    }
    Ok(grid)
}

/// Render the workbook: substitute named cells, then materialise
/// measurement rows below the header row.
///
/// # Errors
///
/// [`ErrorCode::TemplateUnknownPlaceholder`] for undeclared field keys or a
/// missing header row; [`ErrorCode::Io`] for malformed cell references.
pub fn render_workbook(
    template: &Template,
    contract: &FieldContract,
    packet: &NormalizedPacket,
    warnings: &mut Vec<Warning>,
) -> PipelineResult<String> {
    let manifest = &template.manifest().workbook;
    let mut grid: Vec<Vec<String>> = template.workbook_grid().to_vec();

    for (field_key, cell_ref) in &manifest.named_cells {
        if contract.field(field_key).is_none() {
            return Err(PipelineError::new(
                ErrorCode::TemplateUnknownPlaceholder,
                format!("workbook names undeclared field '{field_key}'"),
            )
            .with_context("placeholder", field_key.clone()));
        }
        let (row, col) = parse_cell_ref(cell_ref)?;
        let value = match packet.get(field_key) {
            Some(v) => v.as_str().to_string(),
            None => {
                warnings.push(Warning::new(
                    WarningCode::PlaceholderUnresolved,
                    field_key.clone(),
                    format!("named cell {cell_ref} resolved to empty"),
                ));
                String::new()
            }
        };
        set_cell(&mut grid, row, col, value);
    }

    if let Some(measurements) = &manifest.measurements
        && !packet.measurement_rows.is_empty()
    {
        let header_row = find_header_row(&grid, &measurements.header_labels).ok_or_else(|| {
            PipelineError::new(
                ErrorCode::TemplateUnknownPlaceholder,
                "workbook declares measurement labels but no row carries them all",
            )
            .with_context("labels", measurements.header_labels.join(", "))
        })?;

        let columns: BTreeMap<&str, usize> = measurements
            .header_labels
            .iter()
            .filter_map(|label| {
                column_of(&grid[header_row], label).map(|idx| (label.as_str(), idx))
            })
            .collect();

        for (offset, measurement) in packet.measurement_rows.iter().enumerate() {
            let row = header_row + 1 + offset;
            for (label, col) in &columns {
                let value = lookup_cell(measurement, label).unwrap_or_default();
                set_cell(&mut grid, row, *col, value);
            }
        }
    }

    write_grid(&grid)
}

/// Find the first row containing every header label.
fn find_header_row(grid: &[Vec<String>], labels: &[String]) -> Option<usize> {
    grid.iter().position(|row| {
        labels.iter().all(|label| column_of(row, label).is_some())
    })
}

/// Locate a label's column within a row (case-insensitive, trimmed).
fn column_of(row: &[String], label: &str) -> Option<usize> {
    row.iter()
        .position(|cell| cell.trim().eq_ignore_ascii_case(label.trim()))
}

/// Case-insensitive lookup of a measurement cell by column label.
fn lookup_cell(row: &irp_core::MeasurementRow, label: &str) -> Option<String> {
    row.cells
        .iter()
        .find(|(key, _)| key.trim().eq_ignore_ascii_case(label.trim()))
        .map(|(_, value)| value.clone())
}

fn set_cell(grid: &mut Vec<Vec<String>>, row: usize, col: usize, value: String) {
    while grid.len() <= row {
        grid.push(Vec::new());
    }
    let cells = &mut grid[row];
    while cells.len() <= col {
        cells.push(String::new());
    }
    cells[col] = value;
}

/// Parse an `A1`-style reference into zero-based `(row, col)`.
fn parse_cell_ref(cell_ref: &str) -> PipelineResult<(usize, usize)> {
    let trimmed = cell_ref.trim();
    let letters: String = trimmed
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    let digits = &trimmed[letters.len()..];
    if letters.is_empty() || digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PipelineError::new(
            ErrorCode::Io,
            format!("malformed cell reference '{cell_ref}'"),
        ));
    }
    let col = letters
        .chars()
        .fold(0usize, |acc, c| acc * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1))
        - 1;
    let row: usize = digits.parse().map_err(|_| {
        PipelineError::new(ErrorCode::Io, format!("malformed cell reference '{cell_ref}'"))
    })?;
    if row == 0 {
        return Err(PipelineError::new(
            ErrorCode::Io,
            format!("malformed cell reference '{cell_ref}'"),
        ));
    }
    Ok((row - 1, col))
}

fn write_grid(grid: &[Vec<String>]) -> PipelineResult<String> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for row in grid {
        // csv refuses zero-field records; pad blank lines to one cell.
        if row.is_empty() {
            writer
                .write_record([""])
                .map_err(|e| PipelineError::new(ErrorCode::Internal, format!("write grid: {e}")))?;
            continue;
        }
        writer
            .write_record(row)
            .map_err(|e| PipelineError::new(ErrorCode::Internal, format!("write grid: {e}")))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| PipelineError::new(ErrorCode::Internal, format!("flush grid: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| PipelineError::new(ErrorCode::Internal, format!("grid not UTF-8: {e}")))
}
