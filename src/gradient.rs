// gradient.rs — Sobel gradients sampled from a pyramid at any LOD.
//
// Sobel kernels are separable:
//   Sobel_x: derivative [-1, 0, 1] along x, smoothing [1, 2, 1] along y
//   Sobel_y: smoothing [1, 2, 1] along x, derivative [-1, 0, 1] along y
//
// Taps are spaced 2^lod base pixels apart and read through
// `Texture::sample_lod`, so the same code computes derivatives at LOD 0
// and at any coarser (possibly fractional) scale. Responses are divided
// by 8, which makes a ramp of slope m per level pixel read back as m.

use crate::texture::{Plane, Texture};

const SOBEL_DERIV: [f32; 3] = [-1.0, 0.0, 1.0];
const SOBEL_SMOOTH: [f32; 3] = [1.0, 2.0, 1.0];

/// Normalised Sobel gradient `(Ix, Iy)` at base coordinates `(x, y)`.
pub fn sobel_at(pyramid: &Texture, x: f32, y: f32, lod: f32) -> (f32, f32) {
    let s = lod.exp2();
    let mut gx = 0.0;
    let mut gy = 0.0;
    for j in 0..3 {
        for i in 0..3 {
            let v = pyramid.sample_lod(x + (i as f32 - 1.0) * s, y + (j as f32 - 1.0) * s, lod);
            gx += SOBEL_DERIV[i] * SOBEL_SMOOTH[j] * v;
            gy += SOBEL_SMOOTH[i] * SOBEL_DERIV[j] * v;
        }
    }
    (gx / 8.0, gy / 8.0)
}

/// Gradient of every base pixel at `lod`, packed as `[Ix, Iy, 0, 0]`.
pub fn sobel_plane(pyramid: &Texture, lod: f32) -> Plane {
    let (w, h) = pyramid.size();
    let mut out = Plane::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let (gx, gy) = sobel_at(pyramid, x as f32, y as f32, lod);
            out.set(x, y, [gx, gy, 0.0, 0.0]);
        }
    }
    out
}
