// THEORY:
// Masks are the currency between the stages of the comparison core. Each stage
// takes masks by reference and hands back freshly allocated ones, so a stage can
// be exercised in isolation and no two stages ever alias the same bytes.
//
// A `BinaryMask` is a single-channel plane whose pixels are either 0 or 255.
// The newtype keeps that invariant out of every caller's head: constructors
// normalise any nonzero byte to 255, and the set operations (intersection,
// subtraction, union) preserve it.
//
// Planes owned by the pipeline are allocated through `try_gray`, which reserves
// memory fallibly. On a multi-megapixel pair each plane is `width * height`
// bytes, and a refusal from the allocator must surface as an error, not abort.

use crate::core_modules::error::CoreError;
use image::{GrayImage, Luma};

/// The byte value of a set mask pixel.
pub const FOREGROUND: u8 = 255;

/// Number of bytes needed for a `width x height` plane with `channels` channels.
pub(crate) fn plane_len(width: u32, height: u32, channels: usize) -> Result<usize, CoreError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(channels))
        .ok_or(CoreError::AllocationFailure { bytes: usize::MAX })
}

/// Allocates a zero-filled byte vector, reporting allocator refusal as an error.
pub(crate) fn try_zeroed(len: usize) -> Result<Vec<u8>, CoreError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| CoreError::AllocationFailure { bytes: len })?;
    data.resize(len, 0);
    Ok(data)
}

/// Allocates a zero-filled single-channel plane.
pub(crate) fn try_gray(width: u32, height: u32) -> Result<GrayImage, CoreError> {
    let len = plane_len(width, height, 1)?;
    GrayImage::from_raw(width, height, try_zeroed(len)?)
        .ok_or(CoreError::AllocationFailure { bytes: len })
}

/// A single-channel {0, 255} mask marking category membership per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask(GrayImage);

impl BinaryMask {
    /// An all-zero mask of the given size.
    pub fn empty(width: u32, height: u32) -> Result<Self, CoreError> {
        Ok(Self(try_gray(width, height)?))
    }

    /// Wraps a grayscale plane, treating every nonzero byte as set.
    pub fn from_gray(mut image: GrayImage) -> Self {
        for value in image.iter_mut() {
            if *value != 0 {
                *value = FOREGROUND;
            }
        }
        Self(image)
    }

    /// Builds a mask by evaluating `predicate` at every pixel.
    pub(crate) fn from_fn(
        width: u32,
        height: u32,
        mut predicate: impl FnMut(u32, u32) -> bool,
    ) -> Result<Self, CoreError> {
        let mut plane = try_gray(width, height)?;
        for (x, y, pixel) in plane.enumerate_pixels_mut() {
            if predicate(x, y) {
                *pixel = Luma([FOREGROUND]);
            }
        }
        Ok(Self(plane))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    #[inline]
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y)[0] != 0
    }

    #[inline]
    pub(crate) fn set(&mut self, x: u32, y: u32) {
        self.0.put_pixel(x, y, Luma([FOREGROUND]));
    }

    /// Number of set pixels.
    pub fn count(&self) -> usize {
        self.0.as_raw().iter().filter(|&&v| v != 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_raw().iter().all(|&v| v == 0)
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    pub fn as_raw(&self) -> &[u8] {
        self.0.as_raw()
    }

    /// Pixels set in both masks.
    pub fn intersect(&self, other: &BinaryMask) -> Result<BinaryMask, CoreError> {
        self.combine(other, |a, b| a && b)
    }

    /// Pixels set in `self` but not in `other`.
    pub fn subtract(&self, other: &BinaryMask) -> Result<BinaryMask, CoreError> {
        self.combine(other, |a, b| a && !b)
    }

    /// Pixels set in either mask.
    pub fn union(&self, other: &BinaryMask) -> Result<BinaryMask, CoreError> {
        self.combine(other, |a, b| a || b)
    }

    fn combine(
        &self,
        other: &BinaryMask,
        op: impl Fn(bool, bool) -> bool,
    ) -> Result<BinaryMask, CoreError> {
        debug_assert_eq!(self.dimensions(), other.dimensions());
        let (width, height) = self.dimensions();
        let mut out = try_gray(width, height)?;
        for ((dst, &a), &b) in out.iter_mut().zip(self.as_raw()).zip(other.as_raw()) {
            if op(a != 0, b != 0) {
                *dst = FOREGROUND;
            }
        }
        Ok(BinaryMask(out))
    }

    /// ORs `patch` into this mask with its top-left corner at `(x0, y0)`.
    /// Parts of the patch falling outside this mask are ignored.
    pub(crate) fn union_patch(&mut self, patch: &BinaryMask, x0: u32, y0: u32) {
        let (width, height) = self.dimensions();
        for (x, y, pixel) in patch.0.enumerate_pixels() {
            let (tx, ty) = (x0 + x, y0 + y);
            if pixel[0] != 0 && tx < width && ty < height {
                self.set(tx, ty);
            }
        }
    }
}
