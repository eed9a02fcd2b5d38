// convolution.rs — Separable 1D convolution over texture planes.
//
// The split mirrors the usual GPU kernel pair:
//   convolve_rows()      (horizontal pass)
//   convolve_cols()      (vertical pass)
//   convolve_separable() (both)
//
// All four channels are filtered, so the same code blurs an RGBA frame
// before greyscale conversion and a greyscale plane afterwards.
//
// BORDER HANDLING: Clamp (replicate edge pixels), the same behaviour as a
// GPU sampler in clamp-to-edge mode.
//
// `SeparableFilter` wraps a symmetric kernel as a graph `Kernel`; the
// registry declares the fixed smoothing steps (gauss3, gauss5, and the
// wider ORB pre-smoothing) as instances of it.

use crate::kernel::{Input, Kernel, Param};
use crate::texture::{Plane, Texel, Texture};

#[inline]
fn madd(acc: &mut Texel, t: Texel, k: f32) {
    for c in 0..4 {
        acc[c] += t[c] * k;
    }
}

/// Convolve each row of `src` with a 1D kernel (horizontal pass).
///
/// The kernel is applied centered: for a kernel of length K, the center
/// element is at index K/2.
///
/// # Panics
/// Panics if the kernel is empty or has even length.
pub fn convolve_rows(src: &Plane, kernel: &[f32]) -> Plane {
    assert!(!kernel.is_empty(), "kernel must not be empty");
    assert!(kernel.len() % 2 == 1, "kernel length must be odd (got {})", kernel.len());

    let w = src.width();
    let h = src.height();
    let half = kernel.len() as isize / 2;
    let mut dst = Plane::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = x as isize + ki as isize - half;
                madd(&mut acc, src.get_clamped(sx, y as isize), kv);
            }
            dst.set(x, y, acc);
        }
    }
    dst
}

/// Convolve each column of `src` with a 1D kernel (vertical pass).
pub fn convolve_cols(src: &Plane, kernel: &[f32]) -> Plane {
    assert!(!kernel.is_empty(), "kernel must not be empty");
    assert!(kernel.len() % 2 == 1, "kernel length must be odd (got {})", kernel.len());

    let w = src.width();
    let h = src.height();
    let half = kernel.len() as isize / 2;
    let mut dst = Plane::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = y as isize + ki as isize - half;
                madd(&mut acc, src.get_clamped(x as isize, sy), kv);
            }
            dst.set(x, y, acc);
        }
    }
    dst
}

/// Full separable 2D convolution: horizontal pass then vertical pass.
///
/// For a Gaussian blur with kernel g, call
/// `convolve_separable(&plane, &g, &g)`.
pub fn convolve_separable(src: &Plane, kernel_row: &[f32], kernel_col: &[f32]) -> Plane {
    let intermediate = convolve_rows(src, kernel_row);
    convolve_cols(&intermediate, kernel_col)
}

/// Generate a 1D Gaussian kernel with the given half-size and sigma.
///
/// Returns a kernel of length `2 * half_size + 1`, normalized so the
/// coefficients sum to 1.0.
///
/// # Examples
/// ```
/// let k = fastorb::convolution::gaussian_kernel_1d(2, 1.0);
/// assert_eq!(k.len(), 5);
/// assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-6);
/// ```
pub fn gaussian_kernel_1d(half_size: usize, sigma: f32) -> Vec<f32> {
    assert!(sigma > 0.0, "sigma must be positive");
    let len = 2 * half_size + 1;
    let two_sigma_sq = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..len)
        .map(|i| {
            let x = i as f32 - half_size as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();

    let sum: f32 = kernel.iter().sum();
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Binomial 3-tap kernel `[1 2 1] / 4`.
pub const BINOMIAL_3: [f32; 3] = [0.25, 0.5, 0.25];

/// Binomial 5-tap kernel `[1 4 6 4 1] / 16`.
pub const BINOMIAL_5: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];

/// A symmetric separable filter applied to the base level of its input.
pub struct SeparableFilter {
    taps: Vec<f32>,
}

impl SeparableFilter {
    /// # Panics
    /// Panics if `taps` is empty or has even length.
    pub fn new(taps: &[f32]) -> Self {
        assert!(taps.len() % 2 == 1, "kernel length must be odd (got {})", taps.len());
        SeparableFilter { taps: taps.to_vec() }
    }

    /// 3×3 binomial smoothing.
    pub fn gauss3() -> Self {
        Self::new(&BINOMIAL_3)
    }

    /// 5×5 binomial smoothing.
    pub fn gauss5() -> Self {
        Self::new(&BINOMIAL_5)
    }

    pub fn gaussian(half_size: usize, sigma: f32) -> Self {
        Self::new(&gaussian_kernel_1d(half_size, sigma))
    }
}

impl Kernel for SeparableFilter {
    fn params(&self) -> &[Param] {
        &[Param::Texture]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let src = inputs[0].texture();
        *output = Texture::from_plane(convolve_separable(src.base(), &self.taps, &self.taps));
    }
}
