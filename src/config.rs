// config.rs — Engine-wide configuration.
//
// Everything the kernels need that used to be a module-wide constant lives
// here and is threaded explicitly: pyramid depth, the multiscale LOD step,
// the keypoint encoder budget. Per-algorithm tunables (FAST threshold,
// Harris quality) live on the algorithms themselves; see algorithm.rs.

use crate::error::{Error, Result};

/// Hard upper bound on pyramid depth. LODs are stored in 8.8 fixed point
/// inside the encoded keypoint set, so anything beyond this is meaningless.
pub const MAX_PYRAMID_LEVELS: usize = 16;

/// Pyramid construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidConfig {
    /// Number of levels including the base image. LODs live in
    /// `[0, levels - 1]`.
    pub levels: usize,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        PyramidConfig { levels: 4 }
    }
}

impl PyramidConfig {
    /// Highest LOD that can be sampled.
    pub fn max_lod(&self) -> f32 {
        (self.levels - 1) as f32
    }

    /// Number of levels actually representable for an image of the given
    /// size. Each level halves the resolution; we stop before any side
    /// drops below one pixel.
    pub fn levels_for(&self, width: usize, height: usize) -> usize {
        let mut n = 1;
        let (mut w, mut h) = (width, height);
        while n < self.levels && w >= 2 && h >= 2 {
            w /= 2;
            h /= 2;
            n += 1;
        }
        n
    }
}

/// Configuration shared by every algorithm run through a [`FeatureDetector`].
///
/// [`FeatureDetector`]: crate::detector::FeatureDetector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub pyramid: PyramidConfig,
    /// Upper bound on the number of keypoints the encoder reserves room
    /// for. The encoder length is derived from it.
    pub max_keypoints: usize,
    /// LOD increment between multiscale detection passes. Also bounds the
    /// scale-space neighbourhood in multiscale NMS.
    pub lod_step: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            pyramid: PyramidConfig::default(),
            max_keypoints: 4096,
            lod_step: 0.5,
        }
    }
}

impl EngineConfig {
    /// Check every field. Called once when a detector is built.
    pub fn validate(&self) -> Result<()> {
        if self.pyramid.levels == 0 || self.pyramid.levels > MAX_PYRAMID_LEVELS {
            return Err(Error::invalid(format!(
                "pyramid levels must be in 1..={MAX_PYRAMID_LEVELS} (got {})",
                self.pyramid.levels
            )));
        }
        if self.max_keypoints == 0 {
            return Err(Error::invalid("max_keypoints must be > 0"));
        }
        if !(self.lod_step > 0.0 && self.lod_step.is_finite()) {
            return Err(Error::invalid(format!(
                "lod_step must be a positive number (got {})",
                self.lod_step
            )));
        }
        Ok(())
    }

    /// LODs visited by multiscale detection: `0, s, 2s, …` up to the
    /// deepest level the image supports.
    pub fn lods(&self, width: usize, height: usize) -> Vec<f32> {
        let max_lod = (self.pyramid.levels_for(width, height) - 1) as f32;
        let mut lods = Vec::new();
        let mut k = 0usize;
        loop {
            let lod = k as f32 * self.lod_step;
            if lod > max_lod + 1e-6 {
                break;
            }
            lods.push(lod);
            k += 1;
        }
        lods
    }
}
