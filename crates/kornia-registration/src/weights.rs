use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;

use crate::error::{check_same_len, RegistrationError};

/// A 3x3 row-major covariance matrix describing the localization uncertainty of one point.
pub type Covariance = [[f64; 3]; 3];

/// Per point-pair weight matrix.
pub type WeightMatrix = Matrix3<f64>;

/// Covariance of an isotropic error with the given variance.
pub fn isotropic_covariance(variance: f64) -> Covariance {
    [
        [variance, 0.0, 0.0],
        [0.0, variance, 0.0],
        [0.0, 0.0, variance],
    ]
}

pub(crate) fn covariance_to_matrix(cov: &Covariance) -> Matrix3<f64> {
    Matrix3::from_fn(|i, j| cov[i][j])
}

/// Check that a symmetric covariance has no eigenvalue below `-tol * max|Σ|`.
///
/// On failure the smallest eigenvalue is returned.
pub(crate) fn check_positive_semidefinite(cov: &Covariance, tol: f64) -> Result<(), f64> {
    let scale = cov.iter().flatten().fold(0.0f64, |acc, v| acc.max(v.abs()));
    let min_eigenvalue = covariance_to_matrix(cov).symmetric_eigen().eigenvalues.min();
    if min_eigenvalue < -tol * scale {
        return Err(min_eigenvalue);
    }
    Ok(())
}

/// Express a covariance in a rotated frame: `R * Σ * R^T`.
pub fn rotate_covariance(rotation: &Matrix3<f64>, cov: &Covariance) -> Matrix3<f64> {
    rotation * covariance_to_matrix(cov) * rotation.transpose()
}

/// Combine two covariances of a corresponded point pair into a weight matrix.
///
/// The weight is the inverse square root of the summed covariance, `W = (Σx + Σy)^(-1/2)`,
/// so that `|W e|²` is the Mahalanobis length of a residual `e`. It is computed from the
/// SVD of the sum, `Σ = U S V^T`, as `W = V S^(-1/2) U^T`.
///
/// Returns `None` when the smallest singular value of the sum is at or below
/// `eps` times the largest one.
pub fn weight_matrix(
    sigma_x: &Matrix3<f64>,
    sigma_y: &Matrix3<f64>,
    eps: f64,
) -> Option<WeightMatrix> {
    let sum = sigma_x + sigma_y;
    let svd = sum.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);

    let s = svd.singular_values;
    if !(s.min() > eps * s.max()) {
        return None;
    }

    let inv_sqrt = Vector3::new(1.0 / s[0].sqrt(), 1.0 / s[1].sqrt(), 1.0 / s[2].sqrt());
    Some(v_t.transpose() * Matrix3::from_diagonal(&inv_sqrt) * u.transpose())
}

/// Compute the weight matrix of every point pair at the current rotation estimate.
///
/// For point pair `i` the weight is `weight_matrix(R Σx_i R^T, Σy_i)`. Pairs are processed
/// in parallel; each pair only produces its own output.
///
/// # Arguments
///
/// * `cov_moving` - Covariances of the moving points.
/// * `cov_fixed` - Covariances of the fixed points.
/// * `rotation` - Current rotation estimate.
/// * `eps` - Relative singular value threshold below which a combined covariance is singular.
pub fn compute_weight_matrices(
    cov_moving: &[Covariance],
    cov_fixed: &[Covariance],
    rotation: &Matrix3<f64>,
    eps: f64,
) -> Result<Vec<WeightMatrix>, RegistrationError> {
    check_same_len(
        "moving covariances",
        cov_moving.len(),
        "fixed covariances",
        cov_fixed.len(),
    )?;

    cov_moving
        .par_iter()
        .zip(cov_fixed.par_iter())
        .enumerate()
        .map(|(index, (cov_x, cov_y))| {
            let sigma_x = rotate_covariance(rotation, cov_x);
            let sigma_y = covariance_to_matrix(cov_y);
            weight_matrix(&sigma_x, &sigma_y, eps)
                .ok_or(RegistrationError::SingularCovariance { index })
        })
        .collect()
}
