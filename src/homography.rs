// homography.rs — Planar homography estimation.
//
// Two estimators for H mapping source points (u, v) to destination
// points (x, y):
//
//   homography_4p    exactly four correspondences, closed form
//   homography_dlt   n ≥ 4 correspondences, linear least squares (DLT)
//
// Closed form, in two legs:
//
//   source quad ──H1──▶ unit square ──H2──▶ destination quad
//
// Each leg is a 2×2 solve for the perspective terms (g, h) followed by
// direct formulas for the rest. H1 uses signed areas of source triangles,
// so a degenerate quadrilateral (three collinear points) shows up as a
// near-zero area before any division happens. H = H2·H1, scaled to unit
// Frobenius norm.
//
// Degenerate input never raises: the nine output entries are all NaN
// instead. Callers in per-frame loops test `is_valid` rather than matching
// on errors.
//
// Storage: matrices are written column-major through `layout.stride`
// (entry (r, c) at `out[c·stride + r]`), so a batch of homographies can
// live in one buffer. Point k of an input lives at `input[k·stride_k]`,
// `input[k·stride_k + 1]`.
//
// NEW RUST CONCEPTS:
// - `Option` + `?` as an early exit chain instead of nested ifs.
// - A trait (`LeastSquares`) as the seam for a pluggable solver, with an
//   nalgebra SVD implementation as the default.

use nalgebra::{DMatrix, DVector, Matrix3};

/// Smallest magnitude accepted for areas and determinants.
pub const EPS: f64 = 1e-6;

/// Strides of a homography call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomographyLayout {
    /// Column stride of the output matrix.
    pub stride: usize,
    /// Distance between consecutive points of `[src, dst]`.
    pub stride_of_inputs: [usize; 2],
    /// Number of points in `[src, dst]`.
    pub columns_of_inputs: [usize; 2],
}

impl HomographyLayout {
    /// Densely packed `2 × n` inputs and a `3 × 3` output.
    pub fn packed(n: usize) -> Self {
        HomographyLayout { stride: 3, stride_of_inputs: [2, 2], columns_of_inputs: [n, n] }
    }
}

type Point = (f64, f64);

fn read_points<const N: usize>(input: &[f64], stride: usize) -> [Point; N] {
    std::array::from_fn(|k| (input[k * stride], input[k * stride + 1]))
}

/// Write `m` column-major, or nine NaNs.
fn write_matrix(out: &mut [f64], stride: usize, m: Option<Matrix3<f64>>) {
    let m = m.unwrap_or_else(|| Matrix3::repeat(f64::NAN));
    for c in 0..3 {
        for r in 0..3 {
            out[c * stride + r] = m[(r, c)];
        }
    }
}

/// Read a matrix written by either estimator.
pub fn read_matrix(out: &[f64], stride: usize) -> Matrix3<f64> {
    Matrix3::from_fn(|r, c| out[c * stride + r])
}

/// `false` for the NaN sentinel (or any non-finite entry).
pub fn is_valid(out: &[f64], stride: usize) -> bool {
    read_matrix(out, stride).iter().all(|v| v.is_finite())
}

/// Map a point through `h`.
pub fn apply(h: &Matrix3<f64>, (u, v): Point) -> Point {
    let x = h[(0, 0)] * u + h[(0, 1)] * v + h[(0, 2)];
    let y = h[(1, 0)] * u + h[(1, 1)] * v + h[(1, 2)];
    let w = h[(2, 0)] * u + h[(2, 1)] * v + h[(2, 2)];
    (x / w, y / w)
}

#[inline]
fn cross((ax, ay): Point, (bx, by): Point, (cx, cy): Point) -> f64 {
    (cx - ax) * (by - ay) - (cy - ay) * (bx - ax)
}

/// `a` when `keep`, `-a` otherwise.
#[inline]
fn signed(keep: bool, a: f64) -> f64 {
    if keep { a } else { -a }
}

/// 2×2 solve of `M p = z`.
fn solve2(m: [[f64; 2]; 2], z: [f64; 2]) -> Option<(f64, f64)> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det.abs() < EPS {
        return None;
    }
    let idet = 1.0 / det;
    Some((
        (m[1][1] * z[0] - m[0][1] * z[1]) * idet,
        (m[0][0] * z[1] - m[1][0] * z[0]) * idet,
    ))
}

fn non_degenerate(m: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let det = m.determinant();
    (det.abs() >= EPS).then_some(m)
}

/// Source quadrilateral → unit square (p0 → (0,0), p1 → (1,0),
/// p2 → (1,1), p3 → (0,1)).
fn quad_to_unit_square(p: &[Point; 4]) -> Option<Matrix3<f64>> {
    let [(u0, v0), (u1, v1), (u2, v2), (u3, v3)] = *p;

    let alpha = cross(p[0], p[1], p[3]);
    let beta = cross(p[0], p[2], p[3]);
    let phi = cross(p[0], p[2], p[1]);
    let chi = cross(p[1], p[2], p[3]);
    let theta = -alpha;
    if [alpha, beta, phi, chi].iter().any(|a| a.abs() < EPS) {
        return None;
    }

    // Row signs follow the dominant axis of each edge.
    let s0 = (u3 - u0).abs() > (v3 - v0).abs();
    let s1 = (u1 - u0).abs() > (v1 - v0).abs();
    let (g, h) = solve2(
        [
            [signed(s0, u2 * alpha - u1 * beta), signed(s0, v2 * alpha - v1 * beta)],
            [signed(s1, u3 * phi - u2 * theta), signed(s1, v3 * phi - v2 * theta)],
        ],
        [signed(s0, beta - alpha), signed(s1, theta - phi)],
    )?;

    let w = |u: f64, v: f64| 1.0 + g * u + h * v;
    let (a, b) = if alpha.abs() > beta.abs() {
        (w(u1, v1) * (v3 - v0) / -alpha, w(u1, v1) * (u3 - u0) / alpha)
    } else {
        (w(u2, v2) * (v3 - v0) / -beta, w(u2, v2) * (u3 - u0) / beta)
    };
    let (d, e) = if phi.abs() > theta.abs() {
        (w(u2, v2) * (v1 - v0) / -phi, w(u2, v2) * (u1 - u0) / phi)
    } else {
        (w(u3, v3) * (v1 - v0) / -theta, w(u3, v3) * (u1 - u0) / theta)
    };
    let c = -a * u0 - b * v0;
    let f = -d * u0 - e * v0;

    non_degenerate(Matrix3::new(a, b, c, d, e, f, g, h, 1.0))
}

/// Unit square → destination quadrilateral.
fn unit_square_to_quad(q: &[Point; 4]) -> Option<Matrix3<f64>> {
    let [(x0, y0), (x1, y1), (x2, y2), (x3, y3)] = *q;

    let (g, h) = solve2(
        [[x1 - x2, x3 - x2], [y1 - y2, y3 - y2]],
        [(x0 - x1) + (x2 - x3), (y0 - y1) + (y2 - y3)],
    )?;

    non_degenerate(Matrix3::new(
        g * x1 + (x1 - x0),
        h * x3 + (x3 - x0),
        x0,
        g * y1 + (y1 - y0),
        h * y3 + (y3 - y0),
        y0,
        g,
        h,
        1.0,
    ))
}

/// Homography from four correspondences, normalized to unit Frobenius
/// norm. `None` when the configuration is degenerate.
pub fn find_homography_4p(src: &[Point; 4], dst: &[Point; 4]) -> Option<Matrix3<f64>> {
    let h1 = quad_to_unit_square(src)?;
    let h2 = unit_square_to_quad(dst)?;
    let h = h2 * h1;
    Some(h / h.norm())
}

/// `homography_4p(layout, output, [src, dst])`.
pub fn homography_4p(layout: &HomographyLayout, output: &mut [f64], inputs: [&[f64]; 2]) {
    let src = read_points::<4>(inputs[0], layout.stride_of_inputs[0]);
    let dst = read_points::<4>(inputs[1], layout.stride_of_inputs[1]);
    write_matrix(output, layout.stride, find_homography_4p(&src, &dst));
}

// ---------------------------------------------------------------------------
// DLT
// ---------------------------------------------------------------------------

/// Shape of a least-squares problem `A x ≈ b`, both column-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolveLayout {
    /// Rows of `A` and `b`.
    pub rows: usize,
    /// Columns of `A` (length of `x`).
    pub columns: usize,
    /// Column strides of `[A, b]`.
    pub stride_of_inputs: [usize; 2],
}

/// Linear least-squares solver. Implementations write NaN into `x` when
/// the system cannot be solved.
pub trait LeastSquares {
    fn solve(&self, layout: &SolveLayout, x: &mut [f64], inputs: [&[f64]; 2]);
}

/// Least squares through nalgebra's SVD.
#[derive(Debug, Clone, Copy)]
pub struct SvdSolver {
    /// Singular values below this are treated as zero.
    pub eps: f64,
}

impl Default for SvdSolver {
    fn default() -> Self {
        SvdSolver { eps: 1e-12 }
    }
}

impl LeastSquares for SvdSolver {
    fn solve(&self, layout: &SolveLayout, x: &mut [f64], inputs: [&[f64]; 2]) {
        let [a, b] = inputs;
        let [sa, _] = layout.stride_of_inputs;
        let m = DMatrix::from_fn(layout.rows, layout.columns, |r, c| a[c * sa + r]);
        let rhs = DVector::from_fn(layout.rows, |r, _| b[r]);
        match m.svd(true, true).solve(&rhs, self.eps) {
            Ok(sol) => x[..layout.columns].copy_from_slice(sol.as_slice()),
            Err(msg) => {
                log::debug!("least squares failed: {msg}");
                x[..layout.columns].fill(f64::NAN);
            }
        }
    }
}

/// `homography_dlt(layout, output, [src, dst], solver)`.
///
/// Builds the `2n × 8` system with h33 fixed to 1. Pre-normalizing the
/// points (e.g. into the unit square) is up to the caller.
///
/// # Panics
/// Panics if fewer than 4 correspondences are given.
pub fn homography_dlt<S: LeastSquares + ?Sized>(
    layout: &HomographyLayout,
    output: &mut [f64],
    inputs: [&[f64]; 2],
    solver: &S,
) {
    let n = layout.columns_of_inputs[0];
    assert!(n >= 4, "DLT needs at least 4 correspondences, got {n}");
    let [ss, ds] = layout.stride_of_inputs;
    let rows = 2 * n;

    let mut a = vec![0.0f64; 8 * rows];
    let mut b = vec![0.0f64; rows];
    for k in 0..n {
        let (u, v) = (inputs[0][k * ss], inputs[0][k * ss + 1]);
        let (x, y) = (inputs[1][k * ds], inputs[1][k * ds + 1]);
        let (r0, r1) = (2 * k, 2 * k + 1);
        // [ u v 1 0 0 0 -ux -vx ] = x
        // [ 0 0 0 u v 1 -uy -vy ] = y
        a[r0] = u;
        a[rows + r0] = v;
        a[2 * rows + r0] = 1.0;
        a[3 * rows + r1] = u;
        a[4 * rows + r1] = v;
        a[5 * rows + r1] = 1.0;
        a[6 * rows + r0] = -u * x;
        a[6 * rows + r1] = -u * y;
        a[7 * rows + r0] = -v * x;
        a[7 * rows + r1] = -v * y;
        b[r0] = x;
        b[r1] = y;
    }

    let mut h = [0.0f64; 8];
    let solve_layout = SolveLayout { rows, columns: 8, stride_of_inputs: [rows, rows] };
    solver.solve(&solve_layout, &mut h, [&a, &b]);

    let m = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    let det = m.determinant();
    let m = (!det.is_nan() && det.abs() >= EPS).then_some(m);
    write_matrix(output, layout.stride, m);
}
