use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::error::{check_same_len, RegistrationError};
use crate::weights::WeightMatrix;

/// Number of unknowns of the incremental rigid motion `(ω_x, ω_y, ω_z, t_x, t_y, t_z)`.
pub const NUM_PARAMS: usize = 6;

/// Weighted least squares system `A q = b` for an incremental rigid motion.
#[derive(Debug, Clone)]
pub struct LinearSystem {
    /// Design matrix with shape `(3N, 6)`.
    pub a: DMatrix<f64>,
    /// Right hand side with length `3N`.
    pub b: DVector<f64>,
}

/// Assemble the linearized system for a small rigid motion.
///
/// The rotation is linearized as `I + [ω]×` so for a transformed moving point `p` the
/// weighted residual `W (ω × p + Δt) - W (y - p)` is linear in `q`. Point `i` fills rows
/// `3i..3i+2` of `A` and `b`, one row per row `w_j` of its weight matrix:
///
/// ```text
/// A[3i + j] = [ -w_j1 pz + w_j2 py,  w_j0 pz - w_j2 px,  -w_j0 py + w_j1 px,  w_j0,  w_j1,  w_j2 ]
/// b[3i + j] = w_j · (y_i - p_i)
/// ```
///
/// Points are assembled in parallel into disjoint row blocks.
///
/// # Arguments
///
/// * `moving` - Moving points under the current transform estimate.
/// * `fixed` - Fixed points.
/// * `weights` - Weight matrix of every point pair.
pub fn build_linear_system(
    moving: &[[f64; 3]],
    fixed: &[[f64; 3]],
    weights: &[WeightMatrix],
) -> Result<LinearSystem, RegistrationError> {
    check_same_len("moving points", moving.len(), "fixed points", fixed.len())?;
    check_same_len("moving points", moving.len(), "weights", weights.len())?;

    let n = moving.len();
    let mut a_rows = vec![0.0; 3 * n * NUM_PARAMS];
    let mut b_rows = vec![0.0; 3 * n];

    a_rows
        .par_chunks_exact_mut(3 * NUM_PARAMS)
        .zip(b_rows.par_chunks_exact_mut(3))
        .zip(moving.par_iter())
        .zip(fixed.par_iter())
        .zip(weights.par_iter())
        .for_each(|((((a_block, b_block), p), y), w)| {
            let [px, py, pz] = *p;
            let d = [y[0] - px, y[1] - py, y[2] - pz];
            for j in 0..3 {
                let (w0, w1, w2) = (w[(j, 0)], w[(j, 1)], w[(j, 2)]);
                let row = &mut a_block[j * NUM_PARAMS..(j + 1) * NUM_PARAMS];
                row[0] = -w1 * pz + w2 * py;
                row[1] = w0 * pz - w2 * px;
                row[2] = -w0 * py + w1 * px;
                row[3] = w0;
                row[4] = w1;
                row[5] = w2;
                b_block[j] = w0 * d[0] + w1 * d[1] + w2 * d[2];
            }
        });

    Ok(LinearSystem {
        a: DMatrix::from_row_slice(3 * n, NUM_PARAMS, &a_rows),
        b: DVector::from_vec(b_rows),
    })
}

/// Solve the linearized system in the least squares sense with the SVD pseudo-inverse.
///
/// Singular values at or below `eps` times the largest one are treated as zero, which
/// yields the minimum-norm solution for rank deficient systems.
pub fn solve_increment(
    system: &LinearSystem,
    eps: f64,
) -> Result<[f64; NUM_PARAMS], RegistrationError> {
    if system.a.iter().chain(system.b.iter()).any(|v| !v.is_finite()) {
        return Err(RegistrationError::DegenerateSystem(
            "non-finite entries".to_string(),
        ));
    }

    let svd = system.a.clone().svd(true, true);
    let s_max = svd.singular_values.max();
    if !(s_max > 0.0) {
        return Err(RegistrationError::DegenerateSystem(
            "design matrix has rank zero".to_string(),
        ));
    }

    let q = svd
        .solve(&system.b, eps * s_max)
        .map_err(|e| RegistrationError::DegenerateSystem(e.to_string()))?;

    let mut params = [0.0; NUM_PARAMS];
    for (dst, src) in params.iter_mut().zip(q.iter()) {
        *dst = *src;
    }
    if params.iter().any(|v| !v.is_finite()) {
        return Err(RegistrationError::DegenerateSystem(
            "non-finite solution".to_string(),
        ));
    }
    Ok(params)
}
