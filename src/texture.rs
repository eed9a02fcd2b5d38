// texture.rs — Four-channel f32 raster buffers, optionally mipmapped.
//
// Every buffer that flows between kernels is a `Texture`: a row-major grid
// of `[f32; 4]` texels, the host-side analogue of an RGBA32F GPU texture.
// What the four channels mean depends on the producing kernel:
//
//   greyscale image    →  [ i, i, i, 1 ]
//   score map          →  [ score, lod, scratch, 0 ]
//   structure tensor   →  [ Σ Ix², Σ IxIy, Σ Iy², 0 ]
//   encoded keypoints  →  four raw 32-bit words per texel (see encoding.rs)
//
// A texture built by the pyramid kernel carries extra levels. Level k has
// size ⌊w/2^k⌋ × ⌊h/2^k⌋ and is addressed in base-image coordinates through
// `sample_lod`, which interpolates trilinearly between adjacent levels so
// fractional LODs work the same way a GPU sampler with linear mip filtering
// would.
//
// Coordinate mapping between levels uses pixel centres:
//
//     x_k = (x_0 + 0.5) / 2^k - 0.5
//
// so the centre of the image stays the centre at every level.
//
// NEW RUST CONCEPTS:
// - `type` alias for a fixed-size array (`Texel`)
// - `std::mem::take` with a `Default` impl, used by the executor to move a
//   buffer out of its slot while other slots are borrowed

/// One texel: four f32 channels.
pub type Texel = [f32; 4];

/// A single level of a texture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<Texel>,
}

impl Plane {
    /// Create a zero-filled plane.
    pub fn new(width: usize, height: usize) -> Self {
        Plane { width, height, data: vec![[0.0; 4]; width * height] }
    }

    /// Wrap existing texel data.
    ///
    /// # Panics
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<Texel>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "plane data length {} does not match {width}×{height}",
            data.len()
        );
        Plane { width, height, data }
    }

    pub fn width(&self) -> usize { self.width }
    pub fn height(&self) -> usize { self.height }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Texel {
        debug_assert!(x < self.width && y < self.height);
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, t: Texel) {
        debug_assert!(x < self.width && y < self.height);
        self.data[y * self.width + x] = t;
    }

    /// Texel with clamp-to-edge addressing.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> Texel {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x]
    }

    /// Bilinear sample of channel 0 at level-local coordinates, clamped to
    /// the plane's edges.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let p00 = self.data[y0 * self.width + x0][0];
        let p10 = self.data[y0 * self.width + x1][0];
        let p01 = self.data[y1 * self.width + x0][0];
        let p11 = self.data[y1 * self.width + x1][0];
        (1.0 - fx) * (1.0 - fy) * p00
            + fx * (1.0 - fy) * p10
            + (1.0 - fx) * fy * p01
            + fx * fy * p11
    }

    pub fn as_slice(&self) -> &[Texel] { &self.data }
    pub fn as_mut_slice(&mut self) -> &mut [Texel] { &mut self.data }
}

/// A raster buffer: one base plane plus optional coarser levels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Texture {
    levels: Vec<Plane>,
}

impl Texture {
    /// Zero-filled single-level texture.
    pub fn new(width: usize, height: usize) -> Self {
        Texture { levels: vec![Plane::new(width, height)] }
    }

    /// Single-level texture with every texel set to `t`.
    pub fn filled(width: usize, height: usize, t: Texel) -> Self {
        Texture { levels: vec![Plane::from_vec(width, height, vec![t; width * height])] }
    }

    /// Build a greyscale texture from normalized intensities in [0, 1].
    ///
    /// # Panics
    /// Panics if `values.len() != width * height`.
    pub fn from_luma(width: usize, height: usize, values: &[f32]) -> Self {
        assert_eq!(values.len(), width * height, "luma length mismatch");
        let data = values.iter().map(|&v| [v, v, v, 1.0]).collect();
        Texture { levels: vec![Plane::from_vec(width, height, data)] }
    }

    /// Build a greyscale texture from 8-bit intensities.
    pub fn from_luma_u8(width: usize, height: usize, values: &[u8]) -> Self {
        let v: Vec<f32> = values.iter().map(|&p| p as f32 / 255.0).collect();
        Self::from_luma(width, height, &v)
    }

    pub fn from_plane(plane: Plane) -> Self {
        Texture { levels: vec![plane] }
    }

    pub fn width(&self) -> usize { self.levels.first().map_or(0, |p| p.width) }
    pub fn height(&self) -> usize { self.levels.first().map_or(0, |p| p.height) }
    pub fn size(&self) -> (usize, usize) { (self.width(), self.height()) }
    pub fn is_empty(&self) -> bool { self.width() == 0 || self.height() == 0 }

    /// Resize to a zero-filled single-level texture, reusing the allocation
    /// when possible.
    pub fn reset(&mut self, width: usize, height: usize) {
        self.levels.truncate(1);
        match self.levels.first_mut() {
            Some(p) => {
                p.width = width;
                p.height = height;
                p.data.clear();
                p.data.resize(width * height, [0.0; 4]);
            }
            None => self.levels.push(Plane::new(width, height)),
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Texel { self.levels[0].get(x, y) }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, t: Texel) { self.levels[0].set(x, y, t) }

    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> Texel { self.levels[0].get_clamped(x, y) }

    pub fn base(&self) -> &Plane { &self.levels[0] }
    pub fn base_mut(&mut self) -> &mut Plane { &mut self.levels[0] }
    pub fn as_slice(&self) -> &[Texel] { self.levels[0].as_slice() }
    pub fn as_mut_slice(&mut self) -> &mut [Texel] { self.levels[0].as_mut_slice() }

    /// Number of levels (1 for a plain texture).
    pub fn level_count(&self) -> usize { self.levels.len() }

    pub fn level(&self, k: usize) -> &Plane { &self.levels[k] }

    /// Append a coarser level. Used by the pyramid kernel.
    pub fn push_level(&mut self, plane: Plane) { self.levels.push(plane) }

    /// Sample channel 0 at base-image coordinates `(x, y)` and a possibly
    /// fractional `lod`. LODs outside `[0, level_count - 1]` are clamped.
    pub fn sample_lod(&self, x: f32, y: f32, lod: f32) -> f32 {
        let max_lod = (self.levels.len() - 1) as f32;
        let lod = lod.clamp(0.0, max_lod);
        let lo = lod.floor() as usize;
        let t = lod - lo as f32;
        let a = self.sample_level(x, y, lo);
        if t <= 0.0 || lo + 1 >= self.levels.len() {
            return a;
        }
        let b = self.sample_level(x, y, lo + 1);
        a + (b - a) * t
    }

    fn sample_level(&self, x: f32, y: f32, k: usize) -> f32 {
        let s = (1u32 << k) as f32;
        self.levels[k].sample((x + 0.5) / s - 0.5, (y + 0.5) / s - 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_zero() {
        let t = Texture::new(5, 3);
        assert_eq!(t.size(), (5, 3));
        assert!(t.as_slice().iter().all(|&p| p == [0.0; 4]));
    }

    #[test]
    fn test_from_luma_u8_normalizes() {
        let t = Texture::from_luma_u8(2, 1, &[0, 255]);
        assert_eq!(t.get(0, 0), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(t.get(1, 0), [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_clamped_access() {
        let t = Texture::from_luma(2, 2, &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(t.get_clamped(-5, -5)[0], 0.1);
        assert_eq!(t.get_clamped(9, 0)[0], 0.2);
        assert_eq!(t.get_clamped(1, 9)[0], 0.4);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let t = Texture::from_luma(2, 1, &[0.0, 1.0]);
        assert!((t.sample_lod(0.5, 0.0, 0.0) - 0.5).abs() < 1e-6);
        // Clamped beyond the right edge.
        assert!((t.sample_lod(4.0, 0.0, 0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_trilinear_between_levels() {
        let mut t = Texture::filled(4, 4, [0.2, 0.2, 0.2, 1.0]);
        t.push_level(Plane::from_vec(2, 2, vec![[0.6, 0.6, 0.6, 1.0]; 4]));
        assert!((t.sample_lod(1.0, 1.0, 0.0) - 0.2).abs() < 1e-6);
        assert!((t.sample_lod(1.0, 1.0, 1.0) - 0.6).abs() < 1e-6);
        assert!((t.sample_lod(1.0, 1.0, 0.5) - 0.4).abs() < 1e-6);
        // Beyond the deepest level: clamped.
        assert!((t.sample_lod(1.0, 1.0, 3.0) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_reset_drops_levels() {
        let mut t = Texture::filled(4, 4, [1.0; 4]);
        t.push_level(Plane::new(2, 2));
        t.reset(3, 2);
        assert_eq!(t.level_count(), 1);
        assert_eq!(t.size(), (3, 2));
        assert!(t.as_slice().iter().all(|&p| p == [0.0; 4]));
    }

    #[test]
    fn test_default_is_empty() {
        let t = Texture::default();
        assert!(t.is_empty());
        assert_eq!(t.size(), (0, 0));
    }
}
