// THEORY:
// Between two revisions of a drawing, a lot of content is not really new or gone:
// it moved by a couple of pixels (a re-export, a nudged label). Showing that as a
// pair of added/removed slivers is noise. The match merger reclassifies any area
// where added and removed content lie within `tolerance` pixels of each other as
// "matched".
//
// Key architectural principles:
// 1.  **Proximity by dilation**: Both masks are grown by a disk of radius
//     `tolerance`. Where the grown masks overlap, an added feature and a removed
//     feature are close enough to be one shifted feature.
// 2.  **Exclusivity**: The matched area is carved out of the original (ungrown)
//     added and removed masks, so every pixel ends up in at most one category.
//     Without matching, a pixel flagged in both directions is reported as removed.
// 3.  **Matched may bleed**: The matched mask is the overlap of the grown masks
//     and may cover pixels that were in neither input. That halo is kept; it is
//     what makes a shifted stroke read as a single colored band.

use crate::core_modules::error::CoreError;
use crate::core_modules::mask::BinaryMask;
use crate::core_modules::morphology;

/// The three mutually exclusive category masks of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedMasks {
    pub added: BinaryMask,
    pub removed: BinaryMask,
    pub matched: BinaryMask,
}

impl MergedMasks {
    pub fn dimensions(&self) -> (u32, u32) {
        self.added.dimensions()
    }
}

/// Reclassifies added/removed content lying within `tolerance` pixels of each
/// other as matched. A tolerance of 0 leaves the matched mask empty.
pub fn merge(
    added: BinaryMask,
    removed: BinaryMask,
    tolerance: u32,
) -> Result<MergedMasks, CoreError> {
    debug_assert_eq!(added.dimensions(), removed.dimensions());
    let (width, height) = added.dimensions();
    if tolerance == 0 || added.is_empty() || removed.is_empty() {
        return Ok(MergedMasks {
            added: added.subtract(&removed)?,
            removed,
            matched: BinaryMask::empty(width, height)?,
        });
    }

    let matched = {
        let grown_added = morphology::grow(&added, tolerance)?;
        let grown_removed = morphology::grow(&removed, tolerance)?;
        grown_added.intersect(&grown_removed)?
    };
    let added = added.subtract(&matched)?;
    let removed = removed.subtract(&matched)?;
    Ok(MergedMasks { added, removed, matched })
}
