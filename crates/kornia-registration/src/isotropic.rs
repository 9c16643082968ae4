use nalgebra::{Matrix3, Vector3};

use crate::error::{check_same_len, RegistrationError};
use crate::transform::RigidTransform;

/// Minimum number of corresponded points needed to fix a rigid transform.
pub const MIN_POINTS: usize = 3;

/// Compute the centroids of two sets of points.
///
/// # Arguments
///
/// * `points1` - A set of points.
/// * `points2` - Another set of points.
///
/// # Returns
///
/// The centroids of the two sets of points.
pub fn compute_centroids(points1: &[[f64; 3]], points2: &[[f64; 3]]) -> ([f64; 3], [f64; 3]) {
    let c1 = centroid(points1);
    let c2 = centroid(points2);
    ([c1.x, c1.y, c1.z], [c2.x, c2.y, c2.z])
}

pub(crate) fn centroid(points: &[[f64; 3]]) -> Vector3<f64> {
    if points.is_empty() {
        return Vector3::zeros();
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + Vector3::from(*p));
    sum / points.len() as f64
}

/// Closed-form unweighted rigid fit between two corresponded point sets.
///
/// Covariances are ignored. The rotation maximizes the alignment of the centered point
/// sets (Kabsch / Arun et al.):
///
/// 1. Compute the centroids of both sets.
/// 2. Compute the cross-covariance `H = Σ (y_i - ȳ) (x_i - x̄)^T`.
/// 3. Compute the SVD `H = U Σ V^T` and set `R = U V^T`. When the result is a reflection,
///    the column of `U` with the smallest singular value is negated.
/// 4. Set `t = ȳ - R x̄`.
///
/// # Arguments
///
/// * `moving` - Points to be aligned (X).
/// * `fixed` - Reference points (Y), index-aligned with `moving`.
///
/// # Returns
///
/// The transform mapping `moving` onto `fixed`.
pub fn fit_isotropic(
    moving: &[[f64; 3]],
    fixed: &[[f64; 3]],
) -> Result<RigidTransform, RegistrationError> {
    check_same_len("moving points", moving.len(), "fixed points", fixed.len())?;
    if moving.len() < MIN_POINTS {
        return Err(RegistrationError::InsufficientPoints {
            required: MIN_POINTS,
            actual: moving.len(),
        });
    }

    // identity transformation is a special case
    if moving == fixed {
        return Ok(RigidTransform::identity());
    }

    let (mu_x, mu_y) = compute_centroids(moving, fixed);
    let (mu_x, mu_y) = (Vector3::from(mu_x), Vector3::from(mu_y));

    let mut h = Matrix3::<f64>::zeros();
    for (x, y) in moving.iter().zip(fixed.iter()) {
        let xc = Vector3::from(*x) - mu_x;
        let yc = Vector3::from(*y) - mu_y;
        h += yc * xc.transpose();
    }

    let svd = h.svd(true, true);
    let Some(mut u) = svd.u else {
        return Err(RegistrationError::SvdFailed("left singular vectors"));
    };
    let Some(v_t) = svd.v_t else {
        return Err(RegistrationError::SvdFailed("right singular vectors"));
    };

    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        // flip the direction of least variance
        let weakest = svd.singular_values.imin();
        u.column_mut(weakest).scale_mut(-1.0);
        r = u * v_t;
    }

    let t = mu_y - r * mu_x;

    Ok(RigidTransform::from_nalgebra(&r, &t))
}
