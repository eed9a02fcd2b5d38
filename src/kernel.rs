// kernel.rs — The kernel contract.
//
// A kernel is a pure function from an ordered argument list to one output
// texture. It declares its parameter kinds up front so the graph can reject
// a malformed invocation at record time, long before anything executes.
//
// Kernels never see graph handles: by the time `run` is called, every
// texture argument has been resolved to a borrowed `&Texture` and the
// output buffer has been sized and zero-filled.
//
// NEW RUST CONCEPTS:
// - Trait objects (`Arc<dyn Kernel>`) so the registry can hold kernels of
//   different concrete types, including GPU-backed ones.
// - Default trait methods (`output_size`) that implementors may override.
// - Lifetimes on enum payloads (`Input<'a>`) borrowing from the graph.

use crate::texture::Texture;

/// Kind of a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Texture,
    Float,
    Int,
}

/// A resolved kernel argument.
#[derive(Clone, Copy)]
pub enum Input<'a> {
    Texture(&'a Texture),
    Float(f32),
    Int(i64),
}

impl<'a> Input<'a> {
    pub fn kind(&self) -> Param {
        match self {
            Input::Texture(_) => Param::Texture,
            Input::Float(_) => Param::Float,
            Input::Int(_) => Param::Int,
        }
    }

    /// # Panics
    /// Panics if the argument is not a texture.
    pub fn texture(&self) -> &'a Texture {
        match self {
            Input::Texture(t) => *t,
            other => panic!("expected a texture argument, got {:?}", other.kind()),
        }
    }

    /// Scalar value. Integers are widened so a caller may pass either.
    ///
    /// # Panics
    /// Panics if the argument is a texture.
    pub fn float(&self) -> f32 {
        match self {
            Input::Float(v) => *v,
            Input::Int(v) => *v as f32,
            Input::Texture(_) => panic!("expected a scalar argument, got a texture"),
        }
    }

    /// # Panics
    /// Panics if the argument is not an integer.
    pub fn int(&self) -> i64 {
        match self {
            Input::Int(v) => *v,
            other => panic!("expected an integer argument, got {:?}", other.kind()),
        }
    }

    /// Non-negative integer argument as `usize`.
    ///
    /// # Panics
    /// Panics if the argument is negative or not an integer.
    pub fn usize(&self) -> usize {
        let v = self.int();
        assert!(v >= 0, "expected a non-negative integer argument, got {v}");
        v as usize
    }
}

/// A raster kernel.
pub trait Kernel: Send + Sync {
    /// Ordered parameter kinds.
    fn params(&self) -> &[Param];

    /// Output size when the invocation does not set one explicitly.
    /// Defaults to the size of the first texture argument.
    ///
    /// # Panics
    /// The default panics when the kernel has no texture parameter; such
    /// kernels must override this method.
    fn output_size(&self, inputs: &[Input<'_>]) -> (usize, usize) {
        inputs
            .iter()
            .find_map(|i| match i {
                Input::Texture(t) => Some(t.size()),
                _ => None,
            })
            .unwrap_or_else(|| panic!("kernel without texture inputs must define output_size"))
    }

    /// Fill `output`, which arrives zero-filled at the size chosen by
    /// `output_size` (or by the invocation).
    fn run(&self, inputs: &[Input<'_>], output: &mut Texture);
}

/// Fill the base plane of `dst` with `f(x, y)` for every position of a
/// `width × height` grid. Most per-pixel kernels are a thin wrapper over this.
pub(crate) fn map_texels<F>(dst: &mut Texture, width: usize, height: usize, mut f: F)
where
    F: FnMut(usize, usize) -> crate::texture::Texel,
{
    for y in 0..height {
        for x in 0..width {
            dst.set(x, y, f(x, y));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity;

    impl Kernel for Identity {
        fn params(&self) -> &[Param] {
            &[Param::Texture]
        }

        fn run(&self, inputs: &[Input<'_>], output: &mut Texture) {
            let src = inputs[0].texture();
            output.as_mut_slice().copy_from_slice(src.as_slice());
        }
    }

    #[test]
    fn test_default_output_size_uses_first_texture() {
        let t = Texture::new(7, 3);
        let inputs = [Input::Float(1.0), Input::Texture(&t)];
        assert_eq!(Identity.output_size(&inputs), (7, 3));
    }

    #[test]
    fn test_scalar_widening() {
        assert_eq!(Input::Int(3).float(), 3.0);
        assert_eq!(Input::Int(3).usize(), 3);
    }

    #[test]
    #[should_panic(expected = "expected a texture argument")]
    fn test_texture_accessor_panics_on_scalar() {
        Input::Float(1.0).texture();
    }

    #[test]
    #[should_panic(expected = "non-negative")]
    fn test_negative_usize_panics() {
        Input::Int(-1).usize();
    }
}
