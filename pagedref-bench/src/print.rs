//! Text dump of a 2-D score slice for eyeballing against kernel output.

use std::ops::Range;

use pagedref::{Error, Result};

/// Format `matrix` (`rows x cols`, row-major) restricted to
/// `row_range x col_range`, one row per line.
///
/// Ranges are clamped to the matrix; a range that is empty after clamping
/// is an error.
pub fn format_slice(
    matrix: &[f32],
    rows: usize,
    cols: usize,
    row_range: Range<usize>,
    col_range: Range<usize>,
) -> Result<String> {
    if matrix.len() != rows * cols {
        return Err(Error::ShapeMismatch {
            what: "slice matrix",
            expected: vec![rows, cols],
            got: vec![matrix.len()],
        });
    }
    let row_end = row_range.end.min(rows);
    let col_end = col_range.end.min(cols);
    if row_range.start >= row_end || col_range.start >= col_end {
        return Err(Error::InvalidShape(format!(
            "invalid slicing range {row_range:?} x {col_range:?} for {rows} x {cols}"
        )));
    }

    let mut out = String::new();
    for row in matrix.chunks_exact(cols).take(row_end).skip(row_range.start) {
        let line: String = row[col_range.start..col_end]
            .iter()
            .map(|v| format!("{v} "))
            .collect();
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}
