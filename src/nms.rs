// nms.rs — Non-maximum suppression on score maps.
//
// Reduces a score map to isolated local maxima. Survivors keep their whole
// texel (score and LOD); every other texel becomes zero, so the output is a
// score map again and can be fed straight into the keypoint encoder.
//
//   nonmax(image)                   8-neighbourhood at base resolution
//   pyrnonmax(image, lod_step)      neighbourhood grows with the LOD at
//                                   which either corner was found, and only
//                                   corners within one LOD step compete
//
// Tie-break: of two equal neighbours the one earlier in row-major order
// wins. Both the neighbour relation and the tie-break are symmetric, so the
// result does not depend on evaluation order and a second pass changes
// nothing.

use crate::kernel::{map_texels, Input, Kernel, Param};
use crate::texture::Texture;

/// Slack when comparing LOD differences against the step.
const LOD_EPS: f32 = 1e-3;

/// Chebyshev radius of the neighbourhood of a corner found at `lod`.
#[inline]
fn radius_at(lod: f32) -> usize {
    (lod.max(0.0).exp2().round() as usize).max(1)
}

/// Does `p = (x, y)` with score `sp` survive against `q = (qx, qy)`?
#[inline]
fn beats(sp: f32, sq: f32, (x, y): (usize, usize), (qx, qy): (usize, usize)) -> bool {
    sq < sp || (sq == sp && (qy, qx) > (y, x))
}

/// Shared scan. `related(p_lod, q_lod, chebyshev)` decides whether two
/// corners compete.
fn suppress<F>(src: &Texture, reach: usize, related: F, output: &mut Texture)
where
    F: Fn(f32, f32, usize) -> bool,
{
    let (w, h) = src.size();
    map_texels(output, w, h, |x, y| {
        let p = src.get(x, y);
        if p[0] <= 0.0 {
            return [0.0; 4];
        }
        let (x0, x1) = (x.saturating_sub(reach), (x + reach).min(w - 1));
        let (y0, y1) = (y.saturating_sub(reach), (y + reach).min(h - 1));
        for qy in y0..=y1 {
            for qx in x0..=x1 {
                if (qx, qy) == (x, y) {
                    continue;
                }
                let q = src.get(qx, qy);
                if q[0] <= 0.0 {
                    continue;
                }
                let dist = x.abs_diff(qx).max(y.abs_diff(qy));
                if related(p[1], q[1], dist) && !beats(p[0], q[0], (x, y), (qx, qy)) {
                    return [0.0; 4];
                }
            }
        }
        p
    });
}

/// `nonmax(image)`.
pub struct NonMax;

impl Kernel for NonMax {
    fn params(&self) -> &[Param] {
        &[Param::Texture]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        suppress(inputs[0].texture(), 1, |_, _, _| true, output);
    }
}

/// `pyrnonmax(image, lod_step)`.
pub struct PyrNonMax;

impl Kernel for PyrNonMax {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Float]
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let src = inputs[0].texture();
        let lod_step = inputs[1].float();
        assert!(lod_step > 0.0, "pyrnonmax: lod step must be positive, got {lod_step}");

        let max_lod = src
            .as_slice()
            .iter()
            .filter(|t| t[0] > 0.0)
            .map(|t| t[1])
            .fold(0.0f32, f32::max);
        let related = |lp: f32, lq: f32, dist: usize| {
            (lp - lq).abs() <= lod_step + LOD_EPS && dist <= radius_at(lp.max(lq))
        };
        suppress(src, radius_at(max_lod), related, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonmax(src: &Texture) -> Texture {
        let mut out = Texture::new(src.width(), src.height());
        NonMax.run(&[Input::Texture(src)], &mut out);
        out
    }

    fn pyrnonmax(src: &Texture, step: f32) -> Texture {
        let mut out = Texture::new(src.width(), src.height());
        PyrNonMax.run(&[Input::Texture(src), Input::Float(step)], &mut out);
        out
    }

    fn survivors(t: &Texture) -> Vec<(usize, usize)> {
        let mut v = Vec::new();
        for y in 0..t.height() {
            for x in 0..t.width() {
                if t.get(x, y)[0] > 0.0 {
                    v.push((x, y));
                }
            }
        }
        v
    }

    /// Deterministic pseudo-random score map with plenty of ties.
    fn noisy_map(w: usize, h: usize, levels: u32) -> Texture {
        let mut t = Texture::new(w, h);
        let mut state = 12345u32;
        for y in 0..h {
            for x in 0..w {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                let s = ((state >> 24) % 6) as f32 / 5.0;
                let lod = ((state >> 8) % levels) as f32 * 0.5;
                t.set(x, y, [s, lod, 0.0, 0.0]);
            }
        }
        t
    }

    #[test]
    fn test_isolated_peak_survives() {
        let mut t = Texture::new(5, 5);
        t.set(2, 2, [0.8, 0.0, 0.0, 0.0]);
        t.set(1, 2, [0.3, 0.0, 0.0, 0.0]);
        t.set(4, 4, [0.2, 0.0, 0.0, 0.0]);
        let out = nonmax(&t);
        assert_eq!(survivors(&out), vec![(2, 2), (4, 4)]);
        assert_eq!(out.get(2, 2), [0.8, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_tie_broken_by_raster_order() {
        let mut t = Texture::new(4, 4);
        t.set(1, 1, [0.5, 0.0, 0.0, 0.0]);
        t.set(2, 2, [0.5, 0.0, 0.0, 0.0]);
        t.set(0, 2, [0.5, 0.0, 0.0, 0.0]);
        // (1,1) precedes both neighbours.
        assert_eq!(survivors(&nonmax(&t)), vec![(1, 1)]);
    }

    #[test]
    fn test_plateau_keeps_one() {
        let t = Texture::filled(6, 6, [0.4, 0.0, 0.0, 0.0]);
        let s = survivors(&nonmax(&t));
        // Only texels with no earlier neighbour survive: the top-left one.
        assert_eq!(s, vec![(0, 0)]);
    }

    #[test]
    fn test_nonmax_idempotent() {
        let t = noisy_map(24, 17, 1);
        let once = nonmax(&t);
        let twice = nonmax(&once);
        assert_eq!(once.as_slice(), twice.as_slice());
        assert!(!survivors(&once).is_empty());
    }

    #[test]
    fn test_pyrnonmax_idempotent() {
        let t = noisy_map(24, 17, 4);
        let once = pyrnonmax(&t, 0.5);
        let twice = pyrnonmax(&once, 0.5);
        assert_eq!(once.as_slice(), twice.as_slice());
    }

    #[test]
    fn test_pyrnonmax_scale_aware_neighbourhood() {
        let mut t = Texture::new(12, 12);
        // Corner found at LOD 2 suppresses a weaker one 3 pixels away.
        t.set(4, 4, [0.9, 2.0, 0.0, 0.0]);
        t.set(7, 4, [0.5, 1.5, 0.0, 0.0]);
        // Same distance, but two LOD steps apart: both compete elsewhere.
        t.set(4, 7, [0.5, 0.0, 0.0, 0.0]);
        let out = pyrnonmax(&t, 0.5);
        assert_eq!(survivors(&out), vec![(4, 4), (4, 7)]);

        // Single-scale NMS only looks at direct neighbours.
        assert_eq!(survivors(&nonmax(&t)).len(), 3);
    }

    #[test]
    #[should_panic(expected = "lod step")]
    fn test_pyrnonmax_rejects_zero_step() {
        pyrnonmax(&Texture::new(2, 2), 0.0);
    }
}
