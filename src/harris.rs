// harris.rs — Harris / Shi-Tomasi corner scores.
//
// The detector analyses the structure tensor (second moment matrix) of
// image gradients. Unlike FAST, which uses a binary arc test, it scores
// each pixel by eigenvalue analysis, so it also fires on X-junctions such
// as chessboard intersections.
//
// Pipeline, one program per step:
//
//   harris_derivatives(pyramid, lod)      → [Σ Ix², Σ IxIy, Σ Iy², 0]
//       Sobel at `lod`, products integrated over the 3×3 neighbourhood
//       (taps 2^lod apart). A window of 1 is therefore still meaningful.
//
//   harrisW(corners, tensor, lod)          ping-pong, W ∈ {1, 3, 5, 7}
//       Sum the tensor over a W×W window and score with the smaller
//       eigenvalue (Shi-Tomasi) or det − k·trace² (Harris). Accumulates
//       into `corners` like FAST: a texel changes only on a strictly
//       higher score.
//
//   harris_score_find_max(corners, i)     ping-pong, i = 0, 1, …
//       Iteration i folds the max of texels (0,0), (s,0), (0,s), (s,s),
//       s = 2^i, into channel 2. After `reduction_iterations(w, h)` passes
//       texel (0,0) holds the global maximum.
//
//   harris_score_cutoff(corners, quality) zero scores below quality·max
//   harris_score_to_8bits(corners)        score/max quantised to 1/255
//
// The last two read the maximum from channel 2 of texel (0,0), so they
// must be fed the output of the reduction (or of each other).

use crate::fast::quantize_8bit;
use crate::gradient::sobel_plane;
use crate::kernel::{map_texels, Input, Kernel, Param};
use crate::texture::{Plane, Texture};

/// Default Harris `k`.
pub const HARRIS_K: f32 = 0.04;

/// Square window over which the tensor is summed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarrisWindow {
    W1,
    W3,
    W5,
    W7,
}

impl HarrisWindow {
    pub fn size(&self) -> usize {
        match self {
            HarrisWindow::W1 => 1,
            HarrisWindow::W3 => 3,
            HarrisWindow::W5 => 5,
            HarrisWindow::W7 => 7,
        }
    }

    /// Registry name of the corresponding kernel program.
    pub fn program(&self) -> &'static str {
        match self {
            HarrisWindow::W1 => "harris1",
            HarrisWindow::W3 => "harris3",
            HarrisWindow::W5 => "harris5",
            HarrisWindow::W7 => "harris7",
        }
    }

    /// Parse a window size.
    pub fn from_size(size: usize) -> Option<Self> {
        match size {
            1 => Some(HarrisWindow::W1),
            3 => Some(HarrisWindow::W3),
            5 => Some(HarrisWindow::W5),
            7 => Some(HarrisWindow::W7),
            _ => None,
        }
    }
}

/// How a summed tensor is turned into a score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HarrisResponse {
    /// Smaller eigenvalue.
    ShiTomasi,
    /// `det − k·trace²`.
    Harris { k: f32 },
}

impl HarrisResponse {
    /// Score of the tensor `[[a, b], [b, c]]`, clamped at zero.
    pub fn score(&self, a: f32, b: f32, c: f32) -> f32 {
        let r = match self {
            HarrisResponse::ShiTomasi => {
                let half_tr = 0.5 * (a + c);
                let half_diff = 0.5 * (a - c);
                half_tr - (half_diff * half_diff + b * b).sqrt()
            }
            HarrisResponse::Harris { k } => {
                let tr = a + c;
                a * c - b * b - k * tr * tr
            }
        };
        r.max(0.0)
    }
}

/// Integer tap spacing for neighbourhood sums at `lod`.
#[inline]
fn step_for(lod: f32) -> isize {
    (lod.exp2().round() as isize).max(1)
}

/// Number of find-max passes needed for a `w × h` map.
pub fn reduction_iterations(w: usize, h: usize) -> usize {
    let n = w.max(h).max(1);
    let mut k = 0;
    while (1usize << k) < n {
        k += 1;
    }
    k.max(1)
}

// ---------------------------------------------------------------------------
// Derivatives
// ---------------------------------------------------------------------------

/// `harris_derivatives(pyramid, lod)`.
pub struct HarrisDerivatives;

impl Kernel for HarrisDerivatives {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Float]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let pyramid = inputs[0].texture();
        let lod = inputs[1].float();
        let (w, h) = pyramid.size();

        let grad = sobel_plane(pyramid, lod);
        let mut products = Plane::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let [gx, gy, _, _] = grad.get(x, y);
                products.set(x, y, [gx * gx, gx * gy, gy * gy, 0.0]);
            }
        }

        let step = step_for(lod);
        map_texels(output, w, h, |x, y| {
            let mut acc = [0.0f32; 4];
            for j in -1..=1 {
                for i in -1..=1 {
                    let t = products.get_clamped(x as isize + i * step, y as isize + j * step);
                    for c in 0..3 {
                        acc[c] += t[c];
                    }
                }
            }
            acc
        });
    }
}

// ---------------------------------------------------------------------------
// Window score
// ---------------------------------------------------------------------------

/// Accumulating `harrisW(corners, tensor, lod)`.
pub struct HarrisKernel {
    window: HarrisWindow,
    response: HarrisResponse,
}

impl HarrisKernel {
    pub fn new(window: HarrisWindow, response: HarrisResponse) -> Self {
        HarrisKernel { window, response }
    }
}

impl Kernel for HarrisKernel {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Texture, Param::Float]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let prev = inputs[0].texture();
        let tensor = inputs[1].texture();
        let lod = inputs[2].float();
        let (w, h) = prev.size();

        let step = step_for(lod);
        let r = (self.window.size() / 2) as isize;
        // 3×3 integration from the derivatives pass times the window.
        let norm = 1.0 / (9 * self.window.size() * self.window.size()) as f32;

        map_texels(output, w, h, |x, y| {
            let p = prev.get(x, y);
            let kept = [p[0], p[1], 0.0, 0.0];
            let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
            for j in -r..=r {
                for i in -r..=r {
                    let t = tensor.get_clamped(x as isize + i * step, y as isize + j * step);
                    a += t[0];
                    b += t[1];
                    c += t[2];
                }
            }
            let score = self.response.score(a * norm, b * norm, c * norm);
            if score > kept[0] {
                [score, lod, 0.0, 0.0]
            } else {
                kept
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Max reduction, cutoff, 8-bit
// ---------------------------------------------------------------------------

/// `harris_score_find_max(corners, iteration)`.
pub struct HarrisFindMax;

impl Kernel for HarrisFindMax {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Int]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let src = inputs[0].texture();
        let iteration = inputs[1].usize();
        let (w, h) = src.size();
        let s = 1usize << iteration;
        // The first pass seeds the running max from the scores themselves.
        let ch = if iteration == 0 { 0 } else { 2 };

        map_texels(output, w, h, |x, y| {
            let t = src.get(x, y);
            let mut m = t[ch];
            for (dx, dy) in [(s, 0), (0, s), (s, s)] {
                if x + dx < w && y + dy < h {
                    m = m.max(src.get(x + dx, y + dy)[ch]);
                }
            }
            [t[0], t[1], m, 0.0]
        });
    }
}

/// Global maximum left in texel (0,0) by the reduction.
#[inline]
fn reduced_max(t: &Texture) -> f32 {
    t.get(0, 0)[2]
}

/// `harris_score_cutoff(corners, quality)`.
pub struct HarrisCutoff;

impl Kernel for HarrisCutoff {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Float]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let src = inputs[0].texture();
        let quality = inputs[1].float();
        let (w, h) = src.size();
        let cut = quality * reduced_max(src);
        map_texels(output, w, h, |x, y| {
            let t = src.get(x, y);
            if t[0] < cut {
                [0.0, 0.0, t[2], 0.0]
            } else {
                t
            }
        });
    }
}

/// `harris_score_to_8bits(corners)`.
pub struct HarrisScoreTo8Bits;

impl Kernel for HarrisScoreTo8Bits {
    fn params(&self) -> &[Param] {
        &[Param::Texture]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let src = inputs[0].texture();
        let (w, h) = src.size();
        let max = reduced_max(src);
        let inv = if max > 0.0 { 1.0 / max } else { 0.0 };
        map_texels(output, w, h, |x, y| {
            let t = src.get(x, y);
            [quantize_8bit(t[0] * inv), t[1], 0.0, 0.0]
        });
    }
}

/// Single-scale Harris score map of `image` at LOD 0. Convenience wrapper
/// that bypasses the graph; scores are raw (not 8-bit).
pub fn harris_scores(image: &Texture, window: HarrisWindow, response: HarrisResponse) -> Texture {
    let (w, h) = image.size();
    let mut tensor = Texture::new(w, h);
    HarrisDerivatives.run(&[Input::Texture(image), Input::Float(0.0)], &mut tensor);
    let blank = Texture::new(w, h);
    let mut out = Texture::new(w, h);
    HarrisKernel::new(window, response).run(
        &[Input::Texture(&blank), Input::Texture(&tensor), Input::Float(0.0)],
        &mut out,
    );
    out
}
