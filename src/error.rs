// error.rs — Recoverable error taxonomy.
//
// Only faults a caller can act on become `Error` values:
//   - malformed settings or layout parameters   → InvalidArgument
//   - operating on a released media resource    → IllegalOperation
//   - GPU initialisation problems               → Gpu
//
// Numerical degeneracy in the homography solvers is NOT an error — it is a
// NaN-filled matrix. Broken kernel preconditions (wrong descriptor width,
// growing a suppressed set, arity mismatches) are programming errors and
// panic via `assert!`.

use thiserror::Error;

use crate::gpu::device::GpuError;

/// Errors surfaced by the detection facade and layout constructors.
#[derive(Debug, Error)]
pub enum Error {
    /// A setting or layout parameter is out of range. Raised before any
    /// kernel is recorded.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the current state of a resource
    /// (e.g. detecting on released media).
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    /// GPU device selection or configuration failed.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn illegal(msg: impl Into<String>) -> Self {
        Error::IllegalOperation(msg.into())
    }
}
