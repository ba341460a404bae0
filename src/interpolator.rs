//! Resampling helpers for rendering MPR planes at the physical aspect ratio.

use ndarray::ArrayView2;

/// Shape `(slices, rows, columns)` of a volume of shape `shape` resampled so
/// that every axis uses the finest of the three spacings.
///
/// `spacing` is (column, row, slice) in mm. Non-positive spacings count as 1 mm.
pub(crate) fn isotropic_shape(
    spacing: (f64, f64, f64),
    shape: (usize, usize, usize),
) -> (u32, u32, u32) {
    let mm = |s: f64| if s > 0.0 { s } else { 1.0 };
    let (column_mm, row_mm, slice_mm) = (mm(spacing.0), mm(spacing.1), mm(spacing.2));
    let finest = column_mm.min(row_mm).min(slice_mm);
    let resampled = |count: usize, mm: f64| ((count as f64 * mm / finest).round() as u32).max(1);

    (
        resampled(shape.0, slice_mm),
        resampled(shape.1, row_mm),
        resampled(shape.2, column_mm),
    )
}

/// Maps output pixel `index` of `output_len` onto a source axis of
/// `source_len` samples, aligning pixel centers and clamping to the edges.
#[inline]
pub(crate) fn source_position(index: u32, output_len: u32, source_len: usize) -> f32 {
    let center = (index as f32 + 0.5) / output_len as f32;
    (center * source_len as f32 - 0.5).clamp(0.0, source_len.saturating_sub(1) as f32)
}

/// Value of `plane` at the fractional position (`row`, `column`), blended from
/// the four surrounding samples. Neighbours past the last row or column repeat
/// the edge.
#[inline]
pub(crate) fn sample_bilinear(plane: &ArrayView2<i16>, row: f32, column: f32) -> f32 {
    let (rows, columns) = plane.dim();
    let (top, left) = (row.floor() as usize, column.floor() as usize);
    let bottom = (top + 1).min(rows - 1);
    let right = (left + 1).min(columns - 1);
    let (down, across) = (row - top as f32, column - left as f32);

    let at = |r: usize, c: usize| f32::from(plane[[r, c]]);
    let lerp = |a: f32, b: f32, t: f32| (b - a).mul_add(t, a);

    lerp(
        lerp(at(top, left), at(top, right), across),
        lerp(at(bottom, left), at(bottom, right), across),
        down,
    )
}
