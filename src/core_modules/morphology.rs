// THEORY:
// Binary dilation with elliptical structuring elements. Dilation only ever adds
// pixels: an output pixel is set when any element of the kernel, placed with
// its anchor on that pixel, covers a set input pixel.
//
// The element is the discrete ellipse inscribed in a `size x size` box with its
// anchor at `(size / 2, size / 2)`. Each kernel row is one contiguous horizontal
// run, which the dilation exploits: per kernel row it slides a run-length window
// over a prefix count of the shifted source row, so the cost is
// O(rows_in_kernel * width * height) regardless of the run lengths.
//
// Two fixed uses exist in the pipeline: thickening surviving strokes (a `k x k`
// ellipse followed by a 2x2 one to close single-pixel gaps in thin diagonals),
// and growing masks by a disk of radius `t` (an ellipse of size `2t + 1`) for
// match merging.
//
// Kernel sizes come straight from caller parameters and are unbounded. Once an
// element reaches `width + height` pixels from its anchor in every direction it
// covers every offset inside the image, so any nonempty mask dilates to a full
// plane. `thicken` and `grow` answer that case without building the element.

use crate::core_modules::error::CoreError;
use crate::core_modules::mask::{BinaryMask, FOREGROUND, try_gray};

/// One row of a structuring element: offsets `dx_start..=dx_end` at vertical offset `dy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelRow {
    pub dy: i64,
    pub dx_start: i64,
    pub dx_end: i64,
}

/// A structuring element described by its horizontal runs, relative to the anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuringElement {
    rows: Vec<KernelRow>,
}

impl StructuringElement {
    /// The discrete ellipse inscribed in a `size x size` box.
    pub fn ellipse(size: u32) -> Self {
        Self::with_size(size as i64)
    }

    /// A disk of the given radius.
    pub fn disk(radius: u32) -> Self {
        Self::with_size(2 * radius as i64 + 1)
    }

    fn with_size(size: i64) -> Self {
        let size = size.max(1);
        let anchor = size / 2;
        let radius = anchor;
        let inverse_r2 = if radius > 0 { 1.0 / (radius * radius) as f64 } else { 0.0 };

        let mut rows = Vec::new();
        for i in 0..size {
            let dy = i - radius;
            if dy.abs() > radius {
                continue;
            }
            let dx = if radius > 0 {
                let ratio = ((radius * radius - dy * dy) as f64) * inverse_r2;
                (anchor as f64 * ratio.sqrt()).round() as i64
            } else {
                0
            };
            let start = (anchor - dx).max(0);
            let end = (anchor + dx + 1).min(size);
            if start < end {
                rows.push(KernelRow {
                    dy: i - anchor,
                    dx_start: start - anchor,
                    dx_end: end - 1 - anchor,
                });
            }
        }
        Self { rows }
    }

    pub fn rows(&self) -> &[KernelRow] {
        &self.rows
    }

    /// Number of offsets covered by the element.
    pub fn area(&self) -> usize {
        self.rows
            .iter()
            .map(|row| (row.dx_end - row.dx_start + 1) as usize)
            .sum()
    }

    pub fn contains(&self, dx: i64, dy: i64) -> bool {
        self.rows
            .iter()
            .any(|row| row.dy == dy && (row.dx_start..=row.dx_end).contains(&dx))
    }
}

/// Dilates `mask` with `element`. Pixels outside the image count as unset.
pub fn dilate(mask: &BinaryMask, element: &StructuringElement) -> Result<BinaryMask, CoreError> {
    let (width, height) = mask.dimensions();
    let mut out = try_gray(width, height)?;
    if width == 0 || height == 0 {
        return Ok(BinaryMask::from_gray(out));
    }

    let (w, h) = (width as i64, height as i64);
    let src = mask.as_raw();
    let out_raw: &mut [u8] = &mut out;
    let mut prefix = vec![0u32; width as usize + 1];

    for y in 0..h {
        let out_row = &mut out_raw[(y * w) as usize..((y + 1) * w) as usize];
        for row in element.rows() {
            // dst(x, y) |= src(x + dx, y + dy) for every dx in the run.
            let sy = y + row.dy;
            if sy < 0 || sy >= h {
                continue;
            }
            let src_row = &src[(sy * w) as usize..((sy + 1) * w) as usize];
            for (i, &v) in src_row.iter().enumerate() {
                prefix[i + 1] = prefix[i] + (v != 0) as u32;
            }
            for (x, dst) in out_row.iter_mut().enumerate() {
                if *dst != 0 {
                    continue;
                }
                let x = x as i64;
                let lo = (x + row.dx_start).max(0);
                let hi = (x + row.dx_end).min(w - 1);
                if lo <= hi && prefix[(hi + 1) as usize] > prefix[lo as usize] {
                    *dst = FOREGROUND;
                }
            }
        }
    }

    Ok(BinaryMask::from_gray(out))
}

/// Dilates with the ellipse of `size`, or fills the plane when that ellipse
/// would reach past every image offset.
fn dilate_ellipse(mask: &BinaryMask, size: u64) -> Result<BinaryMask, CoreError> {
    let (width, height) = mask.dimensions();
    let reach = size.saturating_sub(1) / 2;
    if reach >= width as u64 + height as u64 {
        if mask.is_empty() {
            return Ok(mask.clone());
        }
        return BinaryMask::from_fn(width, height, |_, _| true);
    }
    // reach < width + height, so size fits comfortably in an i64.
    dilate(mask, &StructuringElement::with_size(size as i64))
}

/// Thickens strokes: an elliptical `kernel x kernel` pass followed by a 2x2 pass.
/// Kernel sizes of 1 or less leave the mask unchanged.
pub fn thicken(mask: &BinaryMask, kernel: u32) -> Result<BinaryMask, CoreError> {
    if kernel <= 1 {
        return Ok(mask.clone());
    }
    let grown = dilate_ellipse(mask, kernel as u64)?;
    dilate(&grown, &StructuringElement::ellipse(2))
}

/// Grows a mask by a disk of radius `radius`.
pub fn grow(mask: &BinaryMask, radius: u32) -> Result<BinaryMask, CoreError> {
    if radius == 0 {
        return Ok(mask.clone());
    }
    dilate_ellipse(mask, 2 * radius as u64 + 1)
}
