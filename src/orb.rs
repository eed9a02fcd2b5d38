// orb.rs — ORB orientation and binary descriptors on encoded keypoints.
//
// Both stages read keypoints from the encoded set (encoding.rs) and sample
// the image pyramid at each keypoint's own LOD, so one kernel handles every
// scale:
//
//   orb_orientation(pyramid, encoded, d, e, L)
//       Intensity centroid over a disc of radius 15 level pixels;
//       angle = atan2(m01, m10). One texel per keypoint in a compact
//       ⌈√capacity⌉² buffer, NaN for empty slots.
//
//   transfer_orientation(orientations, encoded, d, e, L)
//       Writes those angles back into the header cells.
//
//   orb(pyramid, encoded, d, e, L)
//       256 intensity comparisons from the learned 31×31 pattern, rotated
//       by the keypoint orientation. Bit j of byte b is test 8b + j.
//
// The orientation stage needs one output per keypoint rather than one per
// cell, hence the separate compact buffer plus transfer pass.

use std::f32::consts::PI;

use crate::encoding::{
    is_sentinel, read_header, with_orientation, write_bytes, EncoderLayout,
};
use crate::kernel::{Input, Kernel, Param};
use crate::texture::Texture;

/// Descriptor width in bytes (256 bits).
pub const DESCRIPTOR_SIZE: usize = 32;

/// Radius of the orientation patch, in level pixels.
pub const ORIENTATION_RADIUS: i32 = 15;

/// Learned ORB test pairs `(x1, y1, x2, y2)` inside a 31×31 patch.
#[rustfmt::skip]
pub const ORB_PATTERN: [(i8, i8, i8, i8); 256] = [
    (8, -3, 9, 5), (-11, 9, -8, 2), (3, -12, -13, 2), (-3, -7, -4, 5),
    (1, -11, 12, -2), (1, -1, 11, -1), (4, -2, -5, -8), (2, -13, -8, 9),
    (-11, 1, 6, 2), (11, 11, 12, -1), (6, -12, -9, -8), (12, 5, 3, -6),
    (1, 1, -4, -1), (7, -4, -6, 7), (-3, 2, 9, -8), (-4, -8, 3, 3),
    (-5, 3, 0, -4), (2, -11, -13, 0), (10, 5, 5, 2), (0, 9, 10, -3),
    (5, -8, -10, 1), (8, 3, -8, -5), (2, -6, -9, -4), (-12, 2, 0, -10),
    (5, -10, -7, -2), (-7, 9, -1, 0), (0, -1, -3, 3), (-12, 5, -2, -1),
    (-1, 1, -5, -11), (-1, 2, -3, 0), (-5, -6, 7, -1), (4, 7, 0, -8),
    (-9, 9, 3, -13), (7, -3, 13, -7), (10, -4, -5, 3), (6, 1, -13, -13),
    (-12, -11, 7, 0), (0, -1, -8, -6), (-10, -5, -6, 7), (10, 2, -6, -12),
    (-11, 8, 4, -2), (9, 0, -11, -4), (0, 11, 6, -11), (4, 1, -10, -3),
    (-6, 12, 1, 12), (-4, -8, 8, -7), (-3, 0, 8, 3), (3, 3, -3, -1),
    (-6, -11, -2, 12), (0, -3, -6, -3), (-6, 3, -12, -8), (6, 3, -2, -10),
    (-3, -10, -1, 0), (11, 2, 11, 3), (1, -8, -10, 8), (2, -2, -7, 8),
    (0, -13, 13, 0), (6, -9, -1, -1), (7, 5, 6, 3), (-13, 7, -7, -7),
    (-5, -13, 5, -11), (6, 7, -2, 12), (-6, -11, 8, 6), (-2, -2, -5, 9),
    (5, 4, 7, -6), (0, 11, -4, -5), (10, 1, 2, -8), (-3, -10, -10, -10),
    (1, 9, 6, -5), (-7, -11, 11, 3), (11, -2, -4, 3), (7, -1, 5, 12),
    (-5, 5, -2, -5), (8, -11, -1, -13), (-13, 2, -11, -8), (-2, 9, 5, 0),
    (2, -5, 2, 0), (3, -13, -12, 9), (6, -3, 5, 4), (10, 10, 1, -9),
    (-13, -8, -4, 10), (2, -2, -3, 8), (-13, -11, -8, -3), (2, -4, -7, -3),
    (12, 0, -2, 13), (-11, 7, -10, -1), (-5, -10, 0, -11), (6, 7, 12, -3),
    (-1, -1, 8, -6), (-6, 3, -1, -3), (-2, -11, -11, -3), (12, -2, 3, -10),
    (-11, -1, -2, -8), (3, -1, 7, 3), (2, -2, -12, 12), (6, -4, 12, -2),
    (-3, 11, 2, -12), (-1, 3, 2, 3), (1, 3, -11, -3), (2, -8, -7, -5),
    (0, -5, -11, -6), (-12, 8, -2, 9), (3, -7, 9, -8), (-10, -6, -1, -11),
    (11, -6, -3, -13), (3, 0, 0, -8), (-5, -2, -1, -13), (-8, -5, -10, -13),
    (7, -13, 0, -3), (1, -4, -1, -13), (6, -5, -7, 8), (8, 7, -5, -13),
    (2, 0, -8, -6), (-8, -3, -13, -6), (-6, 5, 0, 6), (-8, 8, -9, 1),
    (10, 1, -9, 4), (-4, -8, -5, 7), (7, 7, 10, -8), (-7, -3, -1, 1),
    (10, -1, 3, 1), (5, 6, -10, -8), (-6, -13, 5, -8), (4, -3, -4, -13),
    (-3, 4, -2, -13), (10, -11, 9, 11), (-9, 0, 12, 2), (-4, -2, 13, -6),
    (2, -10, -6, 1), (11, -13, 4, -13), (1, -1, 1, 9), (1, -5, -13, -5),
    (7, 4, 12, -7), (0, -2, -8, 3), (7, 2, 2, -8), (-2, 7, -12, -4),
    (1, 11, 6, -2), (-1, -1, -4, 10), (0, 8, 0, -13), (3, 12, 5, -13),
    (-9, -1, 9, -13), (12, 4, -6, -4), (-13, 13, 1, -4), (0, -2, -7, -9),
    (10, -8, -13, 3), (2, -13, 6, 8), (10, -6, -7, 0), (-11, 7, -1, -7),
    (12, 0, 5, -4), (-7, -8, 4, -12), (-13, 5, -5, -2), (0, 5, 4, 4),
    (-2, -11, -1, 8), (9, 3, -1, -12), (0, 6, -10, 12), (1, -8, -7, -10),
    (-6, 4, -6, 3), (5, 1, -3, -9), (-6, 6, -6, 3), (7, -8, 1, -7),
    (3, 8, -9, -5), (2, -4, 5, 7), (11, 4, 6, -3), (-8, -1, 11, -1),
    (-3, -6, -10, -8), (2, 7, 3, -12), (-4, -10, 12, -3), (1, -2, -4, 6),
    (3, 11, -11, 0), (-6, 2, 3, -8), (6, 12, 0, -13), (3, 2, -2, -5),
    (-4, 1, -6, 5), (-12, 0, -13, 9), (-6, 2, 7, -8), (-2, -4, -6, 5),
    (0, 0, 0, -13), (9, -13, -2, 0), (3, -13, 5, -12), (10, 11, -13, -13),
    (-2, 3, -12, 3), (11, 7, -7, 0), (12, 2, 1, -13), (12, -11, 12, -8),
    (-7, -2, -4, -7), (7, 5, -1, -13), (-5, -8, -9, 10), (6, 0, -3, -13),
    (12, 4, -13, 1), (-7, 8, 8, -3), (10, -4, 0, -13), (2, 1, -7, 0),
    (-5, 4, 2, -8), (12, 8, 4, -13), (8, 7, -10, 0), (-3, 6, -2, 4),
    (-5, -1, -8, -12), (4, -1, -2, -10), (6, -4, -13, 9), (-7, 8, -6, -12),
    (-10, 2, -13, 10), (-1, -7, 0, 2), (-5, 6, -5, -12), (6, -13, 7, -3),
    (-13, 2, -1, 8), (2, 8, -13, 0), (-6, -9, 1, -4), (-9, 13, 0, -13),
    (-2, -3, 8, 0), (4, 0, -11, 12), (0, 3, -10, 10), (-6, -9, -3, -2),
    (9, -4, -6, 2), (5, 0, -13, -10), (-3, -8, -13, 3), (-12, -1, -4, -2),
    (7, -9, -4, 3), (-8, -4, 1, 11), (11, 6, 2, -12), (6, 6, -8, 12),
    (-3, -8, 2, -10), (2, 5, -8, 8), (-9, 8, -6, -8), (-4, 0, -11, -7),
    (7, 6, -3, 8), (-5, 7, -12, 5), (2, -8, -5, 1), (0, 4, -5, -3),
    (9, -9, -6, -12), (0, -13, 0, -13), (-7, -11, -3, -13), (6, -12, -7, 10),
    (6, -8, -13, 7), (8, 7, -11, -1), (-11, -5, -6, 9), (6, 4, 2, -13),
    (-1, -6, 3, -9), (1, -4, 4, -3), (-6, 8, -12, 0), (-11, 3, -6, 2),
    (7, -10, 11, -6), (5, 0, 12, -13), (4, -8, 1, -1), (-13, 12, -6, 3),
    (1, 4, -9, -2), (-8, -12, -8, 7), (-9, 5, 0, -5), (9, 7, 5, 3),
    (-12, -2, 8, -8), (3, 7, 12, -8), (-13, 3, -1, -1), (-10, -4, -10, 12),
    (5, -2, 0, 13), (-7, 1, -12, 8), (2, 9, -5, -11), (11, -13, 0, 2)
];

/// Slot `i` of the compact orientation buffer.
#[inline]
fn compact_xy(slot: usize, side: usize) -> (usize, usize) {
    (slot % side, slot / side)
}

/// Side of the compact orientation buffer for a layout.
pub fn orientation_buffer_side(layout: &EncoderLayout) -> usize {
    ((layout.capacity() as f64).sqrt().ceil() as usize).max(1)
}

/// Intensity-centroid orientation at base coordinates `(x, y)`, in
/// `[-π, π)`.
pub fn centroid_angle(pyramid: &Texture, x: f32, y: f32, lod: f32) -> f32 {
    let s = lod.exp2();
    let r = ORIENTATION_RADIUS;
    let (mut m10, mut m01) = (0.0f32, 0.0f32);
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let v = pyramid.sample_lod(x + dx as f32 * s, y + dy as f32 * s, lod);
            m10 += v * dx as f32;
            m01 += v * dy as f32;
        }
    }
    let angle = m01.atan2(m10);
    if angle >= PI { -PI } else { angle }
}

/// 256-bit descriptor of the patch at `(x, y)` rotated by `angle`.
pub fn describe_at(pyramid: &Texture, x: f32, y: f32, lod: f32, angle: f32) -> [u8; DESCRIPTOR_SIZE] {
    let scale = lod.exp2();
    let (sin, cos) = angle.sin_cos();
    let rotate = |px: i8, py: i8| {
        let (px, py) = (px as f32, py as f32);
        (x + scale * (px * cos - py * sin), y + scale * (px * sin + py * cos))
    };

    let mut out = [0u8; DESCRIPTOR_SIZE];
    for (i, &(x1, y1, x2, y2)) in ORB_PATTERN.iter().enumerate() {
        let (ax, ay) = rotate(x1, y1);
        let (bx, by) = rotate(x2, y2);
        if pyramid.sample_lod(ax, ay, lod) < pyramid.sample_lod(bx, by, lod) {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

/// `orb_orientation(pyramid, encoded, d, e, L)`.
pub struct OrbOrientation;

impl Kernel for OrbOrientation {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Texture, Param::Int, Param::Int, Param::Int]
    }

    fn output_size(&self, inputs: &[Input<'_>]) -> (usize, usize) {
        let side = orientation_buffer_side(&EncoderLayout::from_inputs(inputs, 2));
        (side, side)
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let pyramid = inputs[0].texture();
        let encoded = inputs[1].texture();
        let layout = EncoderLayout::from_inputs(inputs, 2);
        let side = output.width();

        output.as_mut_slice().fill([f32::NAN, 0.0, 0.0, 0.0]);
        for slot in 0..layout.capacity().min(side * side) {
            let (hx, hy) = layout.header_xy(slot);
            let t = encoded.get(hx, hy);
            if is_sentinel(t) {
                break;
            }
            let h = read_header(t);
            let (ox, oy) = compact_xy(slot, side);
            output.set(ox, oy, [centroid_angle(pyramid, h.x, h.y, h.lod), 0.0, 0.0, 0.0]);
        }
    }
}

/// `transfer_orientation(orientations, encoded, d, e, L)`.
pub struct TransferOrientation;

impl Kernel for TransferOrientation {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Texture, Param::Int, Param::Int, Param::Int]
    }

    fn output_size(&self, inputs: &[Input<'_>]) -> (usize, usize) {
        inputs[1].texture().size()
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let orientations = inputs[0].texture();
        let encoded = inputs[1].texture();
        let layout = EncoderLayout::from_inputs(inputs, 2);
        let side = orientations.width();

        output.as_mut_slice().copy_from_slice(encoded.as_slice());
        for slot in 0..layout.capacity().min(side * orientations.height()) {
            let (hx, hy) = layout.header_xy(slot);
            let t = encoded.get(hx, hy);
            if is_sentinel(t) {
                break;
            }
            let (ox, oy) = compact_xy(slot, side);
            let angle = orientations.get(ox, oy)[0];
            if !angle.is_nan() {
                output.set(hx, hy, with_orientation(t, angle));
            }
        }
    }
}

/// `orb(pyramid, encoded, d, e, L)`.
pub struct OrbDescriptor;

impl Kernel for OrbDescriptor {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Texture, Param::Int, Param::Int, Param::Int]
    }

    fn output_size(&self, inputs: &[Input<'_>]) -> (usize, usize) {
        inputs[1].texture().size()
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let pyramid = inputs[0].texture();
        let encoded = inputs[1].texture();
        let layout = EncoderLayout::from_inputs(inputs, 2);
        assert_eq!(
            layout.descriptor_size, DESCRIPTOR_SIZE,
            "ORB descriptors are {DESCRIPTOR_SIZE} bytes wide"
        );

        output.as_mut_slice().copy_from_slice(encoded.as_slice());
        for slot in 0..layout.capacity() {
            let (hx, hy) = layout.header_xy(slot);
            let t = encoded.get(hx, hy);
            if is_sentinel(t) {
                break;
            }
            let h = read_header(t);
            let bytes = describe_at(pyramid, h.x, h.y, h.lod, h.orientation);
            write_bytes(output, &layout, slot, 0, &bytes);
        }
    }
}
