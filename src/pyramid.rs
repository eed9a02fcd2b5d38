// pyramid.rs — Gaussian image pyramid stored as texture levels.
//
// Algorithm at each level:
//   1. 5-tap binomial blur of the previous level (convolution.rs)
//   2. Downsample 2× by averaging each 2×2 block
//
// Averaging (rather than picking every other pixel) keeps level k aligned
// with the pixel-centre mapping used by `Texture::sample_lod`:
//   level pixel x covers base pixels 2x and 2x+1, centred at 2x + 0.5.
//
// Depth is explicit: `PyramidKernel` is built from a `PyramidConfig` and
// never goes deeper than the image allows.

use crate::config::PyramidConfig;
use crate::convolution::{convolve_separable, BINOMIAL_5};
use crate::kernel::{Input, Kernel, Param};
use crate::texture::{Plane, Texture};

/// Build a pyramid texture from the base level of `src`.
///
/// The result has `config.levels_for(w, h)` levels, level 0 being a copy
/// of `src`'s base plane.
pub fn build_pyramid(src: &Texture, config: &PyramidConfig) -> Texture {
    let mut out = Texture::from_plane(src.base().clone());
    let levels = config.levels_for(src.width(), src.height());
    for k in 1..levels {
        let blurred = convolve_separable(out.level(k - 1), &BINOMIAL_5, &BINOMIAL_5);
        out.push_level(downsample_2x(&blurred));
    }
    out
}

/// Downsample a plane by 2× in both dimensions, averaging 2×2 blocks.
///
/// Output dimensions: `(width / 2, height / 2)` using integer division
/// (odd dimensions drop the last row/column).
fn downsample_2x(src: &Plane) -> Plane {
    let new_w = src.width() / 2;
    let new_h = src.height() / 2;
    let mut dst = Plane::new(new_w, new_h);

    for y in 0..new_h {
        for x in 0..new_w {
            let a = src.get(2 * x, 2 * y);
            let b = src.get(2 * x + 1, 2 * y);
            let c = src.get(2 * x, 2 * y + 1);
            let d = src.get(2 * x + 1, 2 * y + 1);
            let mut t = [0.0f32; 4];
            for ch in 0..4 {
                t[ch] = 0.25 * (a[ch] + b[ch] + c[ch] + d[ch]);
            }
            dst.set(x, y, t);
        }
    }
    dst
}

/// Graph kernel: `pyramid(image)`.
pub struct PyramidKernel {
    config: PyramidConfig,
}

impl PyramidKernel {
    /// # Panics
    /// Panics if `config.levels == 0`.
    pub fn new(config: PyramidConfig) -> Self {
        assert!(config.levels >= 1, "pyramid must have at least 1 level");
        PyramidKernel { config }
    }
}

impl Kernel for PyramidKernel {
    fn params(&self) -> &[Param] {
        &[Param::Texture]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        *output = build_pyramid(inputs[0].texture(), &self.config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_dimensions() {
        let down = downsample_2x(&Plane::new(100, 80));
        assert_eq!((down.width(), down.height()), (50, 40));
    }

    #[test]
    fn test_downsample_odd_dimensions() {
        let down = downsample_2x(&Plane::new(7, 5));
        assert_eq!((down.width(), down.height()), (3, 2));
    }

    #[test]
    fn test_downsample_averages_blocks() {
        let src = Texture::from_luma(2, 2, &[0.0, 0.2, 0.4, 0.6]);
        let down = downsample_2x(src.base());
        assert!((down.get(0, 0)[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_pyramid_level_dimensions() {
        let img = Texture::new(640, 480);
        let pyr = build_pyramid(&img, &PyramidConfig { levels: 5 });
        assert_eq!(pyr.level_count(), 5);
        let dims: Vec<(usize, usize)> =
            (0..5).map(|k| (pyr.level(k).width(), pyr.level(k).height())).collect();
        assert_eq!(dims, vec![(640, 480), (320, 240), (160, 120), (80, 60), (40, 30)]);
    }

    #[test]
    fn test_pyramid_depth_limited_by_size() {
        let img = Texture::new(8, 8);
        let pyr = build_pyramid(&img, &PyramidConfig { levels: 10 });
        assert_eq!(pyr.level_count(), 4); // 8, 4, 2, 1
    }

    #[test]
    fn test_pyramid_constant_image() {
        let img = Texture::from_luma(64, 64, &[0.5; 64 * 64]);
        let pyr = build_pyramid(&img, &PyramidConfig { levels: 4 });
        for k in 0..pyr.level_count() {
            for t in pyr.level(k).as_slice() {
                assert!((t[0] - 0.5).abs() < 1e-5, "level {k} value {}", t[0]);
            }
        }
    }

    #[test]
    fn test_pyramid_decreasing_variance() {
        let data: Vec<f32> = (0..128 * 128)
            .map(|i| if (i / 128 + i % 128) % 2 == 0 { 1.0 } else { 0.0 })
            .collect();
        let img = Texture::from_luma(128, 128, &data);
        let pyr = build_pyramid(&img, &PyramidConfig { levels: 5 });

        let variance = |p: &Plane| {
            let n = p.as_slice().len() as f32;
            let mean = p.as_slice().iter().map(|t| t[0]).sum::<f32>() / n;
            p.as_slice().iter().map(|t| (t[0] - mean) * (t[0] - mean)).sum::<f32>() / n
        };
        let mut prev = variance(pyr.level(0));
        for k in 1..pyr.level_count() {
            let v = variance(pyr.level(k));
            assert!(v <= prev + 1e-6, "variance increased at level {k}: {prev} → {v}");
            prev = v;
        }
    }

    #[test]
    fn test_sample_lod_matches_level_centre() {
        // A horizontal ramp keeps its value at pixel centres across levels.
        let w = 32;
        let data: Vec<f32> = (0..w * w).map(|i| (i % w) as f32 / w as f32).collect();
        let img = Texture::from_luma(w, w, &data);
        let pyr = build_pyramid(&img, &PyramidConfig { levels: 3 });
        let a = pyr.sample_lod(15.5, 15.5, 0.0);
        let b = pyr.sample_lod(15.5, 15.5, 1.0);
        assert!((a - b).abs() < 1e-3, "lod0 {a} vs lod1 {b}");
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn test_zero_levels_panics() {
        PyramidKernel::new(PyramidConfig { levels: 0 });
    }
}
