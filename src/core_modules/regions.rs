// THEORY:
// The noise and shape filter turns a raw threshold mask into a set of solid,
// meaningful shapes. A percentile threshold on a real drawing always lets through
// a sprinkle of isolated pixels (anti-aliasing, JPEG ringing, dithering); this
// module removes them and gives the survivors a clean silhouette.
//
// Key architectural principles & algorithm steps:
// 1.  **Component Extraction**: The mask is labelled into 8-connected components.
//     Every component is summarised as a `Region`: its bounding box plus the number
//     of pixels it actually covers.
// 2.  **Area Filter**: Components covering fewer than `min_area` pixels are noise
//     and are dropped. The mask is rebuilt from the survivors only.
// 3.  **Solid Fill**: A survivor that encloses background (the inside of a ring,
//     the counter of a letter) is filled solid. Enclosed background is found as
//     4-connected background components that never touch the image border.
// 4.  **Thickening**: Finally the mask is dilated (see `morphology`) so thin
//     strokes become visible in the overlay.
// 5.  **Stateless Utility**: Regions are recomputed on every call and never
//     outlive it.

use crate::core_modules::error::CoreError;
use crate::core_modules::mask::{BinaryMask, FOREGROUND, try_gray};
use crate::core_modules::morphology;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

/// Per-pixel component labels; 0 is background.
pub type Labels = ImageBuffer<Luma<u32>, Vec<u32>>;

/// An axis-aligned box around one connected component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Region {
    /// Left edge, inclusive.
    pub x: u32,
    /// Top edge, inclusive.
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of pixels the component covers, which is at most `width * height`.
    pub area: u32,
}

impl Region {
    fn seed(x: u32, y: u32) -> Self {
        Self { x, y, width: 1, height: 1, area: 1 }
    }

    fn absorb(&mut self, x: u32, y: u32) {
        let right = self.right().max(x + 1);
        let bottom = self.bottom().max(y + 1);
        self.x = self.x.min(x);
        self.y = self.y.min(y);
        self.width = right - self.x;
        self.height = bottom - self.y;
        self.area += 1;
    }

    /// One past the rightmost column.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// One past the bottom row.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Labels the 8-connected foreground components of a mask.
pub fn label(mask: &BinaryMask) -> Labels {
    connected_components(mask.as_image(), Connectivity::Eight, Luma([0u8]))
}

/// Bounding box and area for every label, indexed by `label - 1`.
fn label_stats(labels: &Labels) -> Vec<Option<Region>> {
    let mut stats: Vec<Option<Region>> = Vec::new();
    for (x, y, pixel) in labels.enumerate_pixels() {
        let id = pixel[0] as usize;
        if id == 0 {
            continue;
        }
        if stats.len() < id {
            stats.resize(id, None);
        }
        match &mut stats[id - 1] {
            Some(region) => region.absorb(x, y),
            slot => *slot = Some(Region::seed(x, y)),
        }
    }
    stats
}

/// All 8-connected components covering at least `min_area` pixels, in raster
/// order of their first pixel.
pub fn regions(mask: &BinaryMask, min_area: u32) -> Vec<Region> {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    label_stats(&label(mask))
        .into_iter()
        .flatten()
        .filter(|region| region.area >= min_area)
        .collect()
}

/// Drops components smaller than `min_area` and fills the survivors solid.
pub fn remove_small_components(mask: &BinaryMask, min_area: u32) -> Result<BinaryMask, CoreError> {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 || mask.is_empty() {
        return BinaryMask::empty(width, height);
    }

    // --- 1. Extraction ---
    let labels = label(mask);
    let keep: Vec<bool> = label_stats(&labels)
        .iter()
        .map(|stat| stat.is_some_and(|region| region.area >= min_area))
        .collect();

    // --- 2. Rebuild from survivors ---
    let mut plane = try_gray(width, height)?;
    let mut any = false;
    for (dst, &id) in plane.iter_mut().zip(labels.iter()) {
        if id != 0 && keep[id as usize - 1] {
            *dst = FOREGROUND;
            any = true;
        }
    }
    drop(labels);
    if !any {
        return Ok(BinaryMask::from_gray(plane));
    }

    // --- 3. Solid fill ---
    fill_enclosed_background(&mut plane);
    Ok(BinaryMask::from_gray(plane))
}

/// Sets every background pixel whose 4-connected background component does not
/// reach the border.
fn fill_enclosed_background(plane: &mut GrayImage) {
    let (width, height) = plane.dimensions();
    let pockets = connected_components(&*plane, Connectivity::Four, Luma([FOREGROUND]));
    let count = pockets.iter().copied().max().unwrap_or(0) as usize;
    if count == 0 {
        return;
    }

    let mut open = vec![false; count + 1];
    for (x, y, pixel) in pockets.enumerate_pixels() {
        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
            open[pixel[0] as usize] = true;
        }
    }
    for (dst, &id) in plane.iter_mut().zip(pockets.iter()) {
        if id != 0 && !open[id as usize] {
            *dst = FOREGROUND;
        }
    }
}

/// The full noise and shape filter: area filter with solid fill, then thickening
/// with a `dilation x dilation` ellipse.
pub fn shape_filter(
    mask: &BinaryMask,
    min_area: u32,
    dilation: u32,
) -> Result<BinaryMask, CoreError> {
    let solid = remove_small_components(mask, min_area)?;
    morphology::thicken(&solid, dilation)
}
