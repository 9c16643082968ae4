use nalgebra::Vector3;
use rayon::prelude::*;

use crate::error::{check_same_len, RegistrationError};
use crate::transform::RigidTransform;
use crate::weights::{covariance_to_matrix, rotate_covariance, weight_matrix, Covariance};

/// Weighted fiducial registration error of a candidate transform.
#[derive(Debug, Clone, PartialEq)]
pub struct FreResult {
    /// Normalized RMS of the weighted residuals.
    pub fre: f64,
    /// Weighted residual norm `|W_i (R x_i + t - y_i)|` of every point pair.
    pub residuals: Vec<f64>,
}

/// Compute the weighted fiducial registration error (FRE) of a transform.
///
/// For every pair the residual `e_i = R x_i + t - y_i` is weighted with
/// `W_i = (R Σx_i R^T + Σy_i)^(-1/2)` and
///
/// ```text
/// FRE = normalization * sqrt(Σ |W_i e_i|² / N)
/// ```
///
/// Per-pair residuals are evaluated in parallel and summed afterwards in index order, so
/// the result does not depend on the number of threads.
///
/// # Arguments
///
/// * `moving` - Moving points (X).
/// * `fixed` - Fixed points (Y).
/// * `cov_moving` - Covariances of the moving points.
/// * `cov_fixed` - Covariances of the fixed points.
/// * `transform` - Candidate transform applied to the moving points.
/// * `normalization` - Factor applied to the RMS value.
/// * `eps` - Relative singular value threshold for the combined covariances.
pub fn compute_weighted_fre(
    moving: &[[f64; 3]],
    fixed: &[[f64; 3]],
    cov_moving: &[Covariance],
    cov_fixed: &[Covariance],
    transform: &RigidTransform,
    normalization: f64,
    eps: f64,
) -> Result<FreResult, RegistrationError> {
    check_same_len("moving points", moving.len(), "fixed points", fixed.len())?;
    check_same_len("moving points", moving.len(), "moving covariances", cov_moving.len())?;
    check_same_len("fixed points", fixed.len(), "fixed covariances", cov_fixed.len())?;
    if moving.is_empty() {
        return Err(RegistrationError::InsufficientPoints {
            required: 1,
            actual: 0,
        });
    }

    let rotation = transform.rotation_matrix();

    let residuals = moving
        .par_iter()
        .zip(fixed.par_iter())
        .zip(cov_moving.par_iter().zip(cov_fixed.par_iter()))
        .enumerate()
        .map(|(index, ((x, y), (cov_x, cov_y)))| {
            let sigma_x = rotate_covariance(&rotation, cov_x);
            let sigma_y = covariance_to_matrix(cov_y);
            let e = Vector3::from(transform.transform_point(x)) - Vector3::from(*y);
            weight_matrix(&sigma_x, &sigma_y, eps)
                .map(|w| (w * e).norm())
                .ok_or(RegistrationError::SingularCovariance { index })
        })
        .collect::<Result<Vec<f64>, RegistrationError>>()?;

    let sum_sq = residuals.iter().map(|r| r * r).sum::<f64>();
    let fre = normalization * (sum_sq / residuals.len() as f64).sqrt();

    Ok(FreResult { fre, residuals })
}

/// Target registration error: RMS distance between transformed moving targets and the
/// corresponding fixed targets.
///
/// Targets are points that did not take part in the registration, e.g. held-out
/// landmarks with a known ground truth correspondence.
pub fn compute_tre(
    moving_targets: &[[f64; 3]],
    fixed_targets: &[[f64; 3]],
    transform: &RigidTransform,
) -> Result<f64, RegistrationError> {
    check_same_len(
        "moving targets",
        moving_targets.len(),
        "fixed targets",
        fixed_targets.len(),
    )?;
    if moving_targets.is_empty() {
        return Err(RegistrationError::InsufficientPoints {
            required: 1,
            actual: 0,
        });
    }

    let sum_sq = moving_targets
        .iter()
        .zip(fixed_targets.iter())
        .map(|(x, y)| {
            (Vector3::from(transform.transform_point(x)) - Vector3::from(*y)).norm_squared()
        })
        .sum::<f64>();

    Ok((sum_sq / moving_targets.len() as f64).sqrt())
}
