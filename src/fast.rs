// fast.rs — FAST corner scores (Features from Accelerated Segment Test).
//
// Reference: Rosten & Drummond, "Machine learning for high-speed corner
// detection" (ECCV 2006).
//
// Algorithm:
//   For each pixel, sample a ring of N points (16, 12 or 8). A corner
//   exists if at least `arc` contiguous ring points are all brighter than
//   center + t, or all darker than center − t.
//
// SCORE
// ─────
// Instead of a binary mask we write a continuous score: the largest
// threshold at which the test still passes. For one contiguous window of
// `arc` ring points the test passes for every t below
//
//     min over the window of (p − c)        (bright arc)
//     min over the window of (c − p)        (dark arc)
//
// so the score is the maximum of that quantity over all N cyclic windows
// and both polarities. A pixel is a corner at threshold t iff score > t.
//
// MULTISCALE
// ──────────
// The kernel samples the pyramid at an arbitrary (possibly fractional)
// LOD with ring offsets scaled by 2^lod, and accumulates into the previous
// score map: a texel is replaced only when the new score is strictly
// larger, so ties keep the finer scale. Running it over LODs 0, s, 2s, …
// through a ping-pong program yields the best (score, lod) per pixel.
//
// Score map texel: [score, lod, 0, 0].

use crate::kernel::{map_texels, Input, Kernel, Param};
use crate::texture::Texture;

/// Bresenham circle of radius 3: 16 (dx, dy) offsets, clockwise from
/// 12 o'clock.
const RING_16: [(i32, i32); 16] = [
    ( 0, -3), ( 1, -3), ( 2, -2), ( 3, -1),
    ( 3,  0), ( 3,  1), ( 2,  2), ( 1,  3),
    ( 0,  3), (-1,  3), (-2,  2), (-3,  1),
    (-3,  0), (-3, -1), (-2, -2), (-1, -3),
];

/// Circle of radius 2: 12 offsets.
const RING_12: [(i32, i32); 12] = [
    ( 0, -2), ( 1, -2), ( 2, -1), ( 2,  0),
    ( 2,  1), ( 1,  2), ( 0,  2), (-1,  2),
    (-2,  1), (-2,  0), (-2, -1), (-1, -2),
];

/// The 8-neighbourhood.
const RING_8: [(i32, i32); 8] = [
    ( 0, -1), ( 1, -1), ( 1,  0), ( 1,  1),
    ( 0,  1), (-1,  1), (-1,  0), (-1, -1),
];

/// Upper end of the FAST threshold range used by the sensitivity mapping.
/// Intensities are normalised to [0, 1].
pub const FAST_MAX_THRESHOLD: f32 = 0.5;

/// FAST ring/arc configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastVariant {
    /// 9 contiguous out of a 16-point ring of radius 3.
    Fast9_16,
    /// 7 contiguous out of a 12-point ring of radius 2.
    Fast7_12,
    /// 5 contiguous out of the 8-neighbourhood.
    Fast5_8,
}

impl FastVariant {
    pub fn ring(&self) -> &'static [(i32, i32)] {
        match self {
            FastVariant::Fast9_16 => &RING_16,
            FastVariant::Fast7_12 => &RING_12,
            FastVariant::Fast5_8 => &RING_8,
        }
    }

    pub fn arc_length(&self) -> usize {
        match self {
            FastVariant::Fast9_16 => 9,
            FastVariant::Fast7_12 => 7,
            FastVariant::Fast5_8 => 5,
        }
    }

    pub fn radius(&self) -> usize {
        match self {
            FastVariant::Fast9_16 => 3,
            FastVariant::Fast7_12 => 2,
            FastVariant::Fast5_8 => 1,
        }
    }

    /// Registry name of the corresponding kernel program.
    pub fn program(&self) -> &'static str {
        match self {
            FastVariant::Fast9_16 => "fast9_16",
            FastVariant::Fast7_12 => "fast7_12",
            FastVariant::Fast5_8 => "fast5_8",
        }
    }
}

/// Largest threshold at which `ring` still contains `arc` contiguous
/// points all brighter (or all darker) than `center`. Zero or negative
/// means no arc exists at any threshold.
pub fn arc_score(center: f32, ring: &[f32], arc: usize) -> f32 {
    let n = ring.len();
    assert!(arc >= 1 && arc <= n, "arc length {arc} out of range for a {n}-point ring");
    let mut best = 0.0f32;
    for start in 0..n {
        let mut bright = f32::INFINITY;
        let mut dark = f32::INFINITY;
        for k in 0..arc {
            let d = ring[(start + k) % n] - center;
            bright = bright.min(d);
            dark = dark.min(-d);
        }
        best = best.max(bright).max(dark);
    }
    best
}

/// Accumulating FAST kernel: `fastN(corners, pyramid, lod, threshold)`.
pub struct FastKernel {
    variant: FastVariant,
}

impl FastKernel {
    pub fn new(variant: FastVariant) -> Self {
        FastKernel { variant }
    }
}

impl Kernel for FastKernel {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Texture, Param::Float, Param::Float]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let prev = inputs[0].texture();
        let pyramid = inputs[1].texture();
        let lod = inputs[2].float();
        let threshold = inputs[3].float();
        let (w, h) = prev.size();

        let scale = lod.exp2();
        let margin = (self.variant.radius() as f32 * scale).ceil() as usize;
        let ring = self.variant.ring();
        let arc = self.variant.arc_length();
        let mut samples = [0.0f32; 16];

        map_texels(output, w, h, |x, y| {
            let p = prev.get(x, y);
            let kept = [p[0], p[1], 0.0, 0.0];
            if x < margin || y < margin || x + margin >= w || y + margin >= h {
                return kept;
            }
            let (fx, fy) = (x as f32, y as f32);
            let center = pyramid.sample_lod(fx, fy, lod);
            for (i, &(dx, dy)) in ring.iter().enumerate() {
                samples[i] = pyramid.sample_lod(fx + dx as f32 * scale, fy + dy as f32 * scale, lod);
            }
            let score = arc_score(center, &samples[..ring.len()], arc);
            if score > threshold && score > kept[0] {
                [score, lod, 0.0, 0.0]
            } else {
                kept
            }
        });
    }
}

/// Quantise a score in [0, 1] to a multiple of 1/255.
#[inline]
pub fn quantize_8bit(score: f32) -> f32 {
    (score.clamp(0.0, 1.0) * 255.0).round() / 255.0
}

/// `fast_score_to_8bits(corners)`.
pub struct FastScoreTo8Bits;

impl Kernel for FastScoreTo8Bits {
    fn params(&self) -> &[Param] {
        &[Param::Texture]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let src = inputs[0].texture();
        let (w, h) = src.size();
        map_texels(output, w, h, |x, y| {
            let t = src.get(x, y);
            [quantize_8bit(t[0]), t[1], 0.0, 0.0]
        });
    }
}

/// Single-scale FAST score map of `image` at LOD 0. Convenience wrapper
/// that bypasses the graph.
pub fn fast_scores(image: &Texture, variant: FastVariant, threshold: f32) -> Texture {
    let blank = Texture::new(image.width(), image.height());
    let mut out = Texture::new(image.width(), image.height());
    FastKernel::new(variant).run(
        &[
            Input::Texture(&blank),
            Input::Texture(image),
            Input::Float(0.0),
            Input::Float(threshold),
        ],
        &mut out,
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat image with the ring around the centre set to `ring_val`.
    fn make_ring_image(size: usize, variant: FastVariant, center: f32, ring_val: f32) -> Texture {
        let mut data = vec![center; size * size];
        let c = size / 2;
        for &(dx, dy) in variant.ring() {
            let px = (c as i32 + dx) as usize;
            let py = (c as i32 + dy) as usize;
            data[py * size + px] = ring_val;
        }
        Texture::from_luma(size, size, &data)
    }

    #[test]
    fn test_arc_score_full_ring() {
        let ring = [0.8f32; 16];
        assert!((arc_score(0.2, &ring, 9) - 0.6).abs() < 1e-6);
        assert!((arc_score(0.9, &ring, 9) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_arc_score_is_weakest_link_of_best_window() {
        // Ten bright points, one of them only slightly bright.
        let mut ring = [0.5f32; 16];
        for v in ring.iter_mut().take(10) {
            *v = 0.9;
        }
        ring[0] = 0.6;
        // Window 1..=9 avoids the weak point: min diff = 0.4.
        assert!((arc_score(0.5, &ring, 9) - 0.4).abs() < 1e-6);
        // A 10-long arc must include index 0: min diff = 0.1.
        assert!((arc_score(0.5, &ring, 10) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_arc_score_wraps_around() {
        let mut ring = [0.5f32; 16];
        for i in [12, 13, 14, 15, 0, 1, 2, 3, 4] {
            ring[i] = 0.1;
        }
        assert!((arc_score(0.5, &ring, 9) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_bright_and_dark_corners_all_variants() {
        for v in [FastVariant::Fast9_16, FastVariant::Fast7_12, FastVariant::Fast5_8] {
            let img = make_ring_image(21, v, 0.2, 0.8);
            let s = fast_scores(&img, v, 0.1);
            assert!((s.get(10, 10)[0] - 0.6).abs() < 1e-5, "{v:?}: {}", s.get(10, 10)[0]);

            let img = make_ring_image(21, v, 0.8, 0.1);
            let s = fast_scores(&img, v, 0.1);
            assert!((s.get(10, 10)[0] - 0.7).abs() < 1e-5, "{v:?} dark");
        }
    }

    #[test]
    fn test_no_corner_flat() {
        let img = Texture::from_luma(20, 20, &[0.5; 400]);
        let s = fast_scores(&img, FastVariant::Fast9_16, 0.01);
        assert!(s.as_slice().iter().all(|t| t[0] == 0.0));
    }

    #[test]
    fn test_threshold_is_strict() {
        let img = make_ring_image(21, FastVariant::Fast9_16, 0.4, 0.5);
        let diff = 0.5f32 - 0.4f32;
        let below = fast_scores(&img, FastVariant::Fast9_16, diff - 0.01);
        let above = fast_scores(&img, FastVariant::Fast9_16, diff + 0.01);
        assert!(below.get(10, 10)[0] > 0.0);
        assert_eq!(above.get(10, 10)[0], 0.0);
    }

    #[test]
    fn test_arc_length_sensitivity() {
        // Eight contiguous bright points: too short for FAST-9/16.
        let mut data = vec![0.4f32; 21 * 21];
        for &(dx, dy) in RING_16.iter().take(8) {
            data[((10 + dy) * 21 + 10 + dx) as usize] = 0.9;
        }
        let img = Texture::from_luma(21, 21, &data);
        let s = fast_scores(&img, FastVariant::Fast9_16, 0.05);
        assert_eq!(s.get(10, 10)[0], 0.0);
    }

    #[test]
    fn test_border_exclusion() {
        let mut data = vec![0.9f32; 20 * 20];
        data[2 * 20 + 2] = 0.1;
        let img = Texture::from_luma(20, 20, &data);
        let s = fast_scores(&img, FastVariant::Fast9_16, 0.05);
        for y in 0..20 {
            for x in 0..20 {
                if x < 3 || y < 3 || x >= 17 || y >= 17 {
                    assert_eq!(s.get(x, y)[0], 0.0, "border pixel ({x},{y}) scored");
                }
            }
        }
    }

    #[test]
    fn test_accumulation_keeps_best() {
        let img = make_ring_image(21, FastVariant::Fast9_16, 0.2, 0.8);
        let mut prev = Texture::new(21, 21);
        prev.set(10, 10, [0.9, 2.0, 0.0, 0.0]);
        prev.set(5, 5, [0.3, 1.0, 0.0, 0.0]);
        let mut out = Texture::new(21, 21);
        FastKernel::new(FastVariant::Fast9_16).run(
            &[Input::Texture(&prev), Input::Texture(&img), Input::Float(0.0), Input::Float(0.1)],
            &mut out,
        );
        // Stronger previous score survives with its LOD.
        assert_eq!(out.get(10, 10), [0.9, 2.0, 0.0, 0.0]);
        // Unrelated previous texel carried over.
        assert_eq!(out.get(5, 5), [0.3, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_scaled_ring_at_lod_one() {
        // A ring of radius 6 (radius 3 at LOD 1) drawn as 2×2 blocks.
        let size = 40;
        let mut data = vec![0.2f32; size * size];
        let c = 20i32;
        for &(dx, dy) in &RING_16 {
            for oy in 0..2 {
                for ox in 0..2 {
                    let px = (c + 2 * dx + ox) as usize;
                    let py = (c + 2 * dy + oy) as usize;
                    data[py * size + px] = 0.8;
                }
            }
        }
        let img = crate::pyramid::build_pyramid(
            &Texture::from_luma(size, size, &data),
            &crate::config::PyramidConfig { levels: 2 },
        );
        let blank = Texture::new(size, size);
        let mut out = Texture::new(size, size);
        FastKernel::new(FastVariant::Fast9_16).run(
            &[Input::Texture(&blank), Input::Texture(&img), Input::Float(1.0), Input::Float(0.05)],
            &mut out,
        );
        let best = out.as_slice().iter().map(|t| t[0]).fold(0.0f32, f32::max);
        assert!(best > 0.05, "expected a corner at LOD 1, best score {best}");
        assert!(out.as_slice().iter().filter(|t| t[0] > 0.0).all(|t| t[1] == 1.0));
    }

    #[test]
    fn test_quantize_8bit() {
        assert_eq!(quantize_8bit(0.0), 0.0);
        assert_eq!(quantize_8bit(1.0), 1.0);
        assert_eq!(quantize_8bit(2.0), 1.0);
        assert!((quantize_8bit(0.5) - 128.0 / 255.0).abs() < 1e-7);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_invalid_arc_length() {
        arc_score(0.0, &[0.0; 8], 9);
    }
}
