// THEORY:
// `Parameters` enumerates every tunable of one comparison call. It is a plain
// value: the caller builds it (usually from `Default` plus a few `with_*`
// tweaks), hands it to `compare`, and the pipeline never mutates it.
//
// Validation is eager. `validate` runs before any pixel is touched, so a bad
// value fails fast with `InvalidParameter` instead of producing a half-built
// overlay. The documented ranges are:
//
// - `sensitivity`       0..=100 (percent of the strength distribution kept)
// - `blur`              0 or 1 (off) or an odd kernel size
// - `min_area`          >= 1 pixel
// - `dilation`          kernel size, values <= 1 disable thickening
// - `alpha_gamma`       finite and > 0; 1.0 means hard binary alpha
// - `match_tolerance`   pixels, 0 disables match merging
// - `coarse_to_fine`    optional fast path, `scale` in (0, 1], `equal_ratio` in [0, 1)

use crate::core_modules::error::CoreError;

/// An 8-bit RGB color used to paint one overlay category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    pub const fn to_array(self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }
}

/// How the two inputs are turned into difference strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DistanceMode {
    /// Signed CIE L*a*b* differences, one map per direction.
    #[default]
    Perceptual,
    /// Signed sRGB channel differences, one map per direction. Cheaper and less
    /// faithful to perception.
    Rgb,
    /// Local structural dissimilarity of the luma planes; direction is not tracked.
    Structural,
}

/// Settings for the low-resolution candidate pass.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoarseToFine {
    /// Downscale factor of the coarse pass (0.25 means a quarter of the width).
    pub scale: f32,
    /// Coarse changed-pixel ratio under which the pair is reported equal outright.
    pub equal_ratio: f64,
}

impl Default for CoarseToFine {
    fn default() -> Self {
        Self {
            scale: 0.25,
            equal_ratio: 0.001,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parameters {
    /// Percentage of the strongest differences that survive thresholding.
    pub sensitivity: f64,
    /// Gaussian blur kernel applied to the strength maps, 0 or 1 disables it.
    pub blur: u32,
    /// Components smaller than this many pixels are treated as noise.
    pub min_area: u32,
    /// Size of the elliptical dilation kernel used to thicken surviving strokes.
    pub dilation: u32,
    /// Exponent shaping overlay alpha from difference strength.
    pub alpha_gamma: f64,
    pub added_color: Rgb,
    pub removed_color: Rgb,
    pub matched_color: Rgb,
    /// Distance in pixels under which an added and a removed feature count as matched.
    pub match_tolerance: u32,
    pub mode: DistanceMode,
    pub coarse_to_fine: Option<CoarseToFine>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            sensitivity: 1.0,
            blur: 3,
            min_area: 20,
            dilation: 3,
            alpha_gamma: 1.0,
            added_color: Rgb::new(255, 102, 0),
            removed_color: Rgb::new(0, 51, 255),
            matched_color: Rgb::new(0, 0, 255),
            match_tolerance: 0,
            mode: DistanceMode::Perceptual,
            coarse_to_fine: None,
        }
    }
}

impl Parameters {
    pub fn with_sensitivity(mut self, sensitivity: f64) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    pub fn with_blur(mut self, blur: u32) -> Self {
        self.blur = blur;
        self
    }

    pub fn with_min_area(mut self, min_area: u32) -> Self {
        self.min_area = min_area;
        self
    }

    pub fn with_dilation(mut self, dilation: u32) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_alpha_gamma(mut self, gamma: f64) -> Self {
        self.alpha_gamma = gamma;
        self
    }

    pub fn with_match_tolerance(mut self, tolerance: u32) -> Self {
        self.match_tolerance = tolerance;
        self
    }

    pub fn with_mode(mut self, mode: DistanceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_coarse_to_fine(mut self, coarse: CoarseToFine) -> Self {
        self.coarse_to_fine = Some(coarse);
        self
    }

    /// Checks every field against its documented range.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.sensitivity.is_finite() || !(0.0..=100.0).contains(&self.sensitivity) {
            return Err(CoreError::invalid(
                "sensitivity",
                format!("{} is outside 0..=100", self.sensitivity),
            ));
        }
        if self.blur != 0 && self.blur % 2 == 0 {
            return Err(CoreError::invalid(
                "blur",
                format!("kernel size {} must be odd or 0", self.blur),
            ));
        }
        if self.min_area == 0 {
            return Err(CoreError::invalid("min_area", "must be at least 1"));
        }
        if !self.alpha_gamma.is_finite() || self.alpha_gamma <= 0.0 {
            return Err(CoreError::invalid(
                "alpha_gamma",
                format!("{} must be finite and positive", self.alpha_gamma),
            ));
        }
        if let Some(coarse) = &self.coarse_to_fine {
            if !coarse.scale.is_finite() || coarse.scale <= 0.0 || coarse.scale > 1.0 {
                return Err(CoreError::invalid(
                    "coarse_to_fine.scale",
                    format!("{} is outside (0, 1]", coarse.scale),
                ));
            }
            if !coarse.equal_ratio.is_finite() || !(0.0..1.0).contains(&coarse.equal_ratio) {
                return Err(CoreError::invalid(
                    "coarse_to_fine.equal_ratio",
                    format!("{} is outside [0, 1)", coarse.equal_ratio),
                ));
            }
        }
        Ok(())
    }
}
