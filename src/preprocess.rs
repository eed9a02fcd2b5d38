// preprocess.rs — Image conditioning kernels run before detection.
//
//   greyscale     RGBA → luma (Rec. 601 weights), written to r, g, b
//   normalize     local contrast normalisation for dark or unevenly lit
//                 scenes: every pixel is re-expressed relative to the mean
//                 and standard deviation of its neighbourhood
//
// Denoising and the extra smoothing after normalisation reuse
// `SeparableFilter` from convolution.rs.

use crate::convolution::{convolve_separable, gaussian_kernel_1d};
use crate::kernel::{map_texels, Input, Kernel, Param};
use crate::texture::{Plane, Texture};

/// Rec. 601 luma weights.
pub const LUMA_WEIGHTS: [f32; 3] = [0.299, 0.587, 0.114];

/// `greyscale(image)`.
pub struct Greyscale;

impl Kernel for Greyscale {
    fn params(&self) -> &[Param] {
        &[Param::Texture]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let src = inputs[0].texture();
        let (w, h) = src.size();
        map_texels(output, w, h, |x, y| {
            let t = src.get(x, y);
            let l = LUMA_WEIGHTS[0] * t[0] + LUMA_WEIGHTS[1] * t[1] + LUMA_WEIGHTS[2] * t[2];
            [l, l, l, 1.0]
        });
    }
}

/// `normalize_illumination(image)`.
///
/// `out = clamp(0.5 + gain · (I − μ) / (σ + ε), 0, 1)` with μ and σ taken
/// over a Gaussian window. Flat regions map to mid-grey; edges keep their
/// contrast regardless of absolute brightness.
pub struct NormalizeIllumination {
    window: Vec<f32>,
    gain: f32,
}

impl NormalizeIllumination {
    const EPS: f32 = 0.01;

    pub fn new(half_size: usize, sigma: f32, gain: f32) -> Self {
        NormalizeIllumination { window: gaussian_kernel_1d(half_size, sigma), gain }
    }
}

impl Default for NormalizeIllumination {
    fn default() -> Self {
        Self::new(8, 4.0, 0.25)
    }
}

impl Kernel for NormalizeIllumination {
    fn params(&self) -> &[Param] {
        &[Param::Texture]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let src = inputs[0].texture();
        let (w, h) = src.size();

        // [I, I², 0, 1] so one separable pass yields both moments.
        let mut moments = Plane::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let i = src.get(x, y)[0];
                moments.set(x, y, [i, i * i, 0.0, 1.0]);
            }
        }
        let local = convolve_separable(&moments, &self.window, &self.window);

        map_texels(output, w, h, |x, y| {
            let i = src.get(x, y)[0];
            let m = local.get(x, y);
            let sigma = (m[1] - m[0] * m[0]).max(0.0).sqrt();
            let v = (0.5 + self.gain * (i - m[0]) / (sigma + Self::EPS)).clamp(0.0, 1.0);
            [v, v, v, 1.0]
        });
    }
}
