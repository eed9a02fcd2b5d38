// encoding.rs — Packed keypoint buffer.
//
// Detection yields a sparse score map as large as the image; everything
// downstream (orientation, descriptors, download) wants a short list. The
// encoder packs that list into a small square texture of `L × L` cells,
// where a cell is one texel reinterpreted as four 32-bit words:
//
//   keypoint i → cells [i·cpk, (i+1)·cpk), row-major
//
//   header cell   w0 = x (f32 bits)      w1 = y (f32 bits)
//                 w2 = score (f32 bits)  w3 = lod (u16, 8.8 fixed point)
//                                           | orientation << 16 (u16)
//   data cells    descriptor bytes, then extra bytes, little-endian
//                 within each word, zero-padded to whole cells
//
// with cpk = 1 + ceil((descriptor_size + extra_size) / 16). A header with
// x = NaN marks the end of the list.
//
// NEW RUST CONCEPTS:
// - `f32::to_bits` / `f32::from_bits` to reuse float storage for raw words.
// - A validated layout type (`EncoderLayout::new` returns `Result`) next to
//   an asserting constructor for kernel arguments that were already
//   validated upstream.

use std::f32::consts::PI;

use crate::error::{Error, Result};
use crate::kernel::{Input, Kernel, Param};
use crate::texture::{Texel, Texture};

/// Bytes per 32-bit word.
pub const WORD_SIZE: usize = 4;

/// Bytes per cell.
pub const CELL_SIZE: usize = 4 * WORD_SIZE;

const LOD_SCALE: f32 = 256.0;

/// Number of cells occupied by one keypoint.
pub fn cells_per_keypoint(descriptor_size: usize, extra_size: usize) -> usize {
    1 + (descriptor_size + extra_size).div_ceil(CELL_SIZE)
}

/// Maximum number of keypoints an `L × L` buffer can hold.
///
/// ```
/// use fastorb::encoding::capacity;
/// assert_eq!(capacity(0, 0, 16), 256);
/// assert_eq!(capacity(32, 0, 16), 85);
/// ```
pub fn capacity(descriptor_size: usize, extra_size: usize, encoder_length: usize) -> usize {
    encoder_length * encoder_length / cells_per_keypoint(descriptor_size, extra_size)
}

/// Smallest encoder length whose capacity is at least `n` (never below 1).
pub fn min_encoder_length(n: usize, descriptor_size: usize, extra_size: usize) -> usize {
    let cells = n * cells_per_keypoint(descriptor_size, extra_size);
    let mut len = (cells as f64).sqrt().ceil().max(1.0) as usize;
    while capacity(descriptor_size, extra_size, len) < n {
        len += 1;
    }
    len
}

/// Shape of an encoded keypoint buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderLayout {
    pub descriptor_size: usize,
    pub extra_size: usize,
    pub encoder_length: usize,
}

impl EncoderLayout {
    /// Validate and build a layout. Both byte sizes must be word multiples.
    pub fn new(descriptor_size: usize, extra_size: usize, encoder_length: usize) -> Result<Self> {
        if descriptor_size % WORD_SIZE != 0 {
            return Err(Error::invalid(format!(
                "descriptor size {descriptor_size} is not a multiple of {WORD_SIZE}"
            )));
        }
        if extra_size % WORD_SIZE != 0 {
            return Err(Error::invalid(format!(
                "extra size {extra_size} is not a multiple of {WORD_SIZE}"
            )));
        }
        if encoder_length == 0 {
            return Err(Error::invalid("encoder length must be positive"));
        }
        Ok(EncoderLayout { descriptor_size, extra_size, encoder_length })
    }

    /// Layout from kernel arguments `d, e, L` starting at `first`.
    ///
    /// # Panics
    /// Panics on a malformed layout; kernel arguments are produced by the
    /// engine, never by users.
    pub(crate) fn from_inputs(inputs: &[Input<'_>], first: usize) -> Self {
        let (d, e, l) = (inputs[first].usize(), inputs[first + 1].usize(), inputs[first + 2].usize());
        match Self::new(d, e, l) {
            Ok(layout) => layout,
            Err(err) => panic!("bad keypoint layout: {err}"),
        }
    }

    pub fn cells_per_keypoint(&self) -> usize {
        cells_per_keypoint(self.descriptor_size, self.extra_size)
    }

    pub fn capacity(&self) -> usize {
        capacity(self.descriptor_size, self.extra_size, self.encoder_length)
    }

    /// Texel coordinates of cell `index`.
    #[inline]
    pub(crate) fn cell_xy(&self, index: usize) -> (usize, usize) {
        (index % self.encoder_length, index / self.encoder_length)
    }

    #[inline]
    pub(crate) fn header_xy(&self, slot: usize) -> (usize, usize) {
        self.cell_xy(slot * self.cells_per_keypoint())
    }
}

// ---------------------------------------------------------------------------
// Words and cells
// ---------------------------------------------------------------------------

#[inline]
pub(crate) fn texel_to_words(t: Texel) -> [u32; 4] {
    [t[0].to_bits(), t[1].to_bits(), t[2].to_bits(), t[3].to_bits()]
}

#[inline]
pub(crate) fn words_to_texel(w: [u32; 4]) -> Texel {
    [f32::from_bits(w[0]), f32::from_bits(w[1]), f32::from_bits(w[2]), f32::from_bits(w[3])]
}

/// Angle in radians → 16-bit code. `[-π, π)` maps onto `[0, 65536)`.
pub fn encode_orientation(angle: f32) -> u32 {
    let turns = ((angle + PI) / (2.0 * PI)).rem_euclid(1.0);
    ((turns * 65536.0).round() as u32) & 0xffff
}

pub fn decode_orientation(code: u32) -> f32 {
    (code & 0xffff) as f32 / 65536.0 * 2.0 * PI - PI
}

#[inline]
fn encode_lod(lod: f32) -> u32 {
    (lod * LOD_SCALE).round().clamp(0.0, 65535.0) as u32
}

#[inline]
fn decode_lod(word: u32) -> f32 {
    (word & 0xffff) as f32 / LOD_SCALE
}

/// Header cell of a keypoint.
pub(crate) fn header_texel(x: f32, y: f32, score: f32, lod: f32, orientation: f32) -> Texel {
    words_to_texel([
        x.to_bits(),
        y.to_bits(),
        score.to_bits(),
        encode_lod(lod) | (encode_orientation(orientation) << 16),
    ])
}

/// Header cell of an empty slot.
pub(crate) fn sentinel_texel() -> Texel {
    [f32::NAN, 0.0, 0.0, 0.0]
}

#[inline]
pub(crate) fn is_sentinel(header: Texel) -> bool {
    header[0].is_nan()
}

/// Fields of a header cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Header {
    pub x: f32,
    pub y: f32,
    pub score: f32,
    pub lod: f32,
    pub orientation: f32,
}

pub(crate) fn read_header(t: Texel) -> Header {
    let w = texel_to_words(t);
    Header {
        x: f32::from_bits(w[0]),
        y: f32::from_bits(w[1]),
        score: f32::from_bits(w[2]),
        lod: decode_lod(w[3]),
        orientation: decode_orientation(w[3] >> 16),
    }
}

/// Replace the orientation bits of a header cell, keeping everything else.
pub(crate) fn with_orientation(t: Texel, angle: f32) -> Texel {
    let mut w = texel_to_words(t);
    w[3] = (w[3] & 0xffff) | (encode_orientation(angle) << 16);
    words_to_texel(w)
}

/// Write `bytes` into the data cells of `slot`, starting `offset` bytes in.
pub(crate) fn write_bytes(t: &mut Texture, layout: &EncoderLayout, slot: usize, offset: usize, bytes: &[u8]) {
    debug_assert!(offset % WORD_SIZE == 0 && bytes.len() % WORD_SIZE == 0);
    let first_cell = slot * layout.cells_per_keypoint() + 1;
    for (k, chunk) in bytes.chunks_exact(WORD_SIZE).enumerate() {
        let word = offset / WORD_SIZE + k;
        let (x, y) = layout.cell_xy(first_cell + word / 4);
        let mut words = texel_to_words(t.get(x, y));
        words[word % 4] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        t.set(x, y, words_to_texel(words));
    }
}

/// Read `len` bytes from the data cells of `slot`, starting `offset` bytes in.
pub(crate) fn read_bytes(t: &Texture, layout: &EncoderLayout, slot: usize, offset: usize, len: usize) -> Vec<u8> {
    let first_cell = slot * layout.cells_per_keypoint() + 1;
    let mut out = Vec::with_capacity(len);
    for k in 0..len / WORD_SIZE {
        let word = offset / WORD_SIZE + k;
        let (x, y) = layout.cell_xy(first_cell + word / 4);
        out.extend_from_slice(&texel_to_words(t.get(x, y))[word % 4].to_le_bytes());
    }
    out
}

// ---------------------------------------------------------------------------
// Host-side keypoints
// ---------------------------------------------------------------------------

/// A downloaded keypoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
    /// Pyramid level at which the keypoint was found.
    pub lod: f32,
    /// Radians in `[-π, π)`.
    pub orientation: f32,
    pub descriptor: Option<Vec<u8>>,
    pub extra: Vec<u8>,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, score: f32, lod: f32) -> Self {
        Keypoint { x, y, score, lod, orientation: 0.0, descriptor: None, extra: Vec::new() }
    }

    /// Scale factor relative to the base image.
    pub fn scale(&self) -> f32 {
        self.lod.exp2()
    }
}

/// Pack `keypoints` into a fresh buffer. Keypoints past capacity are dropped.
pub fn encode(keypoints: &[Keypoint], layout: &EncoderLayout) -> Texture {
    let l = layout.encoder_length;
    let mut out = Texture::new(l, l);
    let cap = layout.capacity();
    for slot in 0..cap {
        let (hx, hy) = layout.header_xy(slot);
        let Some(kp) = keypoints.get(slot) else {
            out.set(hx, hy, sentinel_texel());
            continue;
        };
        out.set(hx, hy, header_texel(kp.x, kp.y, kp.score, kp.lod, kp.orientation));
        if let Some(desc) = &kp.descriptor {
            let n = desc.len().min(layout.descriptor_size);
            write_bytes(&mut out, layout, slot, 0, &desc[..n - n % WORD_SIZE]);
        }
        let n = kp.extra.len().min(layout.extra_size);
        write_bytes(&mut out, layout, slot, layout.descriptor_size, &kp.extra[..n - n % WORD_SIZE]);
    }
    out
}

/// Read keypoints up to the first empty slot.
pub fn decode(encoded: &Texture, layout: &EncoderLayout) -> Vec<Keypoint> {
    assert_eq!(
        encoded.size(),
        (layout.encoder_length, layout.encoder_length),
        "encoded buffer does not match its layout"
    );
    let mut out = Vec::new();
    for slot in 0..layout.capacity() {
        let (hx, hy) = layout.header_xy(slot);
        let t = encoded.get(hx, hy);
        if is_sentinel(t) {
            break;
        }
        let h = read_header(t);
        let descriptor = (layout.descriptor_size > 0)
            .then(|| read_bytes(encoded, layout, slot, 0, layout.descriptor_size));
        out.push(Keypoint {
            x: h.x,
            y: h.y,
            score: h.score,
            lod: h.lod,
            orientation: h.orientation,
            descriptor,
            extra: read_bytes(encoded, layout, slot, layout.descriptor_size, layout.extra_size),
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

/// `encode_keypoints(corners, d, e, L)`: one keypoint per non-zero score,
/// row-major.
pub struct EncodeKeypoints;

impl Kernel for EncodeKeypoints {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Int, Param::Int, Param::Int]
    }

    fn output_size(&self, inputs: &[Input<'_>]) -> (usize, usize) {
        let l = inputs[3].usize();
        (l, l)
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let corners = inputs[0].texture();
        let layout = EncoderLayout::from_inputs(inputs, 1);
        let cap = layout.capacity();

        let mut found = 0;
        for y in 0..corners.height() {
            for x in 0..corners.width() {
                let t = corners.get(x, y);
                if t[0] <= 0.0 {
                    continue;
                }
                if found < cap {
                    let (hx, hy) = layout.header_xy(found);
                    output.set(hx, hy, header_texel(x as f32, y as f32, t[0], t[1], 0.0));
                }
                found += 1;
            }
        }
        if found > cap {
            log::debug!("encode_keypoints: {found} corners, capacity {cap}; dropped {}", found - cap);
        }
        for slot in found.min(cap)..cap {
            let (hx, hy) = layout.header_xy(slot);
            output.set(hx, hy, sentinel_texel());
        }
    }
}

/// `suppress_descriptors(encoded, d, e, L, L')`: header-only copy of an
/// encoded set in an `L' × L'` buffer.
pub struct SuppressDescriptors;

impl Kernel for SuppressDescriptors {
    fn params(&self) -> &[Param] {
        &[Param::Texture, Param::Int, Param::Int, Param::Int, Param::Int]
    }

    fn output_size(&self, inputs: &[Input<'_>]) -> (usize, usize) {
        let l = inputs[4].usize();
        (l, l)
    }

    fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
        let encoded = inputs[0].texture();
        let src = EncoderLayout::from_inputs(inputs, 1);
        let target_len = inputs[4].usize();
        assert!(
            target_len <= src.encoder_length,
            "suppress_descriptors can only shrink: {target_len} > {}",
            src.encoder_length
        );
        let dst = EncoderLayout { descriptor_size: 0, extra_size: 0, encoder_length: target_len };

        let mut ended = false;
        for slot in 0..dst.capacity() {
            let (dx, dy) = dst.header_xy(slot);
            let t = if !ended && slot < src.capacity() {
                let (sx, sy) = src.header_xy(slot);
                encoded.get(sx, sy)
            } else {
                sentinel_texel()
            };
            ended |= is_sentinel(t);
            output.set(dx, dy, if ended { sentinel_texel() } else { t });
        }
    }
}
