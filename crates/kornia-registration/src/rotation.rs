use nalgebra::Matrix3;

use crate::error::RegistrationError;

/// First-order rotation `I + [ω]×` for a small rotation vector `ω`.
pub fn first_order_rotation(omega: &[f64; 3]) -> Matrix3<f64> {
    let [w0, w1, w2] = *omega;
    Matrix3::new(
        1.0, -w2, w1, //
        w2, 1.0, -w0, //
        -w1, w0, 1.0,
    )
}

/// Project a small rotation vector onto the nearest proper rotation.
///
/// The first-order candidate `M = I + [ω]×` is not orthogonal. With the SVD `M = U Σ V^T`
/// the rotation `U V^T` is the closest orthogonal matrix to `M` in Frobenius norm.
///
/// # Arguments
///
/// * `omega` - Incremental rotation vector `(ω_x, ω_y, ω_z)`.
/// * `eps` - Threshold on `|det(M)|` below which `M` is considered singular.
///
/// # Returns
///
/// An orthogonal matrix with determinant +1.
pub fn orthogonal_increment(
    omega: &[f64; 3],
    eps: f64,
) -> Result<Matrix3<f64>, RegistrationError> {
    if omega.iter().any(|v| !v.is_finite()) {
        return Err(RegistrationError::DegenerateRotation(
            "non-finite rotation increment".to_string(),
        ));
    }

    let m = first_order_rotation(omega);
    let det = m.determinant();
    if !(det.abs() > eps) {
        return Err(RegistrationError::DegenerateRotation(format!(
            "singular first-order rotation, det = {det}"
        )));
    }

    let svd = m.svd(true, true);
    let Some(mut u) = svd.u else {
        return Err(RegistrationError::SvdFailed("left singular vectors"));
    };
    let Some(v_t) = svd.v_t else {
        return Err(RegistrationError::SvdFailed("right singular vectors"));
    };

    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let weakest = svd.singular_values.imin();
        u.column_mut(weakest).scale_mut(-1.0);
        r = u * v_t;
    }
    Ok(r)
}
