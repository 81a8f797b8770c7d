//! Heightfield import and export
//!
//! CSV: one line per grid row, values separated by commas, no header.
//! PNG: 8-bit grayscale.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use image::{GrayImage, Luma};
use thiserror::Error;

use crate::heightfield::Heightfield;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("line {line}: cannot parse `{value}` as a height")]
    Parse { line: usize, value: String },

    #[error("line {line}: expected {expected} values, found {found}")]
    RaggedRow { line: usize, expected: usize, found: usize },

    #[error("grid has {rows} rows of {columns} values; heightfields must be square")]
    NotSquare { rows: usize, columns: usize },

    #[error("line {line}: height {value} is not finite")]
    NonFinite { line: usize, value: f32 },

    #[error("no heights found")]
    Empty,
}

/// Write rows as comma-separated values, one line per row.
pub fn write_csv<W: Write>(grid: &Heightfield, writer: W) -> Result<(), ExportError> {
    let mut out = BufWriter::new(writer);
    for row in grid.rows() {
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                out.write_all(b",")?;
            }
            write!(out, "{}", value)?;
        }
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub fn save_csv(grid: &Heightfield, path: impl AsRef<Path>) -> Result<(), ExportError> {
    write_csv(grid, File::create(path)?)
}

/// Parse a square heightfield written by [`write_csv`] (or any CSV of the
/// same shape). Blank lines are ignored.
pub fn read_csv<R: Read>(reader: R) -> Result<Heightfield, ExportError> {
    let mut rows: Vec<Vec<f32>> = Vec::new();

    for (number, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line_no = number + 1;
        if line.trim().is_empty() {
            continue;
        }

        let row = line
            .split(',')
            .map(|field| {
                let field = field.trim();
                let value: f32 = field.parse().map_err(|_| ExportError::Parse {
                    line: line_no,
                    value: field.to_string(),
                })?;
                if !value.is_finite() {
                    return Err(ExportError::NonFinite { line: line_no, value });
                }
                Ok(value)
            })
            .collect::<Result<Vec<f32>, ExportError>>()?;

        if let Some(first) = rows.first() {
            if row.len() != first.len() {
                return Err(ExportError::RaggedRow {
                    line: line_no,
                    expected: first.len(),
                    found: row.len(),
                });
            }
        }
        rows.push(row);
    }

    let columns = rows.first().map(Vec::len).ok_or(ExportError::Empty)?;
    if rows.len() != columns {
        return Err(ExportError::NotSquare { rows: rows.len(), columns });
    }

    let size = rows.len();
    let data = rows.into_iter().flatten().collect();
    Heightfield::from_vec(size, data).map_err(|_| ExportError::NotSquare { rows: size, columns })
}

pub fn load_csv(path: impl AsRef<Path>) -> Result<Heightfield, ExportError> {
    read_csv(File::open(path)?)
}

/// How heights map to gray levels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Normalization {
    /// Heights are taken as [0, 1]; values outside are clamped
    #[default]
    Clamp,
    /// Stretch the grid's own minimum and maximum to black and white
    MinMax,
}

/// Render a heightfield to an 8-bit grayscale image.
pub fn render_grayscale(grid: &Heightfield, normalization: Normalization) -> GrayImage {
    let (offset, range) = match (normalization, grid.min_max()) {
        (Normalization::MinMax, Some((min_h, max_h))) if max_h > min_h => (min_h, max_h - min_h),
        _ => (0.0, 1.0),
    };

    let size = grid.size() as u32;
    GrayImage::from_fn(size, size, |x, z| {
        let t = ((grid.get(x as usize, z as usize) - offset) / range).clamp(0.0, 1.0);
        Luma([(t * 255.0).round() as u8])
    })
}

pub fn save_png(
    grid: &Heightfield,
    path: impl AsRef<Path>,
    normalization: Normalization,
) -> Result<(), ExportError> {
    render_grayscale(grid, normalization).save(path)?;
    Ok(())
}
