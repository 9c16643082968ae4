use nalgebra::{Matrix3, Vector3};

use crate::error::{check_same_len, RegistrationError};

/// A rigid transformation `p' = R * p + t`.
///
/// The rotation is stored row-major and maps coordinates from the moving frame to the
/// fixed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RigidTransform {
    /// Rotation matrix.
    pub rotation: [[f64; 3]; 3],
    /// Translation vector.
    pub translation: [f64; 3],
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// Create a transform from a rotation matrix and a translation vector.
    pub fn new(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0; 3],
        }
    }

    /// Create a transform from an axis, an angle in radians and a translation.
    ///
    /// The axis does not need to be normalized but must not be zero.
    ///
    /// Example:
    ///
    /// ```
    /// use kornia_registration::RigidTransform;
    ///
    /// let angle = std::f64::consts::FRAC_PI_2;
    /// let t = RigidTransform::from_axis_angle(&[0.0, 0.0, 1.0], angle, [1.0, 0.0, 0.0])?;
    /// let p = t.transform_point(&[1.0, 0.0, 0.0]);
    /// assert!((p[0] - 1.0).abs() < 1e-12 && (p[1] - 1.0).abs() < 1e-12);
    /// # Ok::<(), kornia_registration::RegistrationError>(())
    /// ```
    pub fn from_axis_angle(
        axis: &[f64; 3],
        angle: f64,
        translation: [f64; 3],
    ) -> Result<Self, RegistrationError> {
        let magnitude = (axis[0].powi(2) + axis[1].powi(2) + axis[2].powi(2)).sqrt();
        if !magnitude.is_finite() || magnitude < 1e-10 {
            return Err(RegistrationError::InvalidParameter {
                name: "axis",
                reason: "cannot compute rotation matrix from a zero vector".to_string(),
            });
        }
        let (x, y, z) = (
            axis[0] / magnitude,
            axis[1] / magnitude,
            axis[2] / magnitude,
        );

        let c = angle.cos();
        let s = angle.sin();
        let t = 1.0 - c;

        let rotation = [
            [c + x * x * t, x * y * t - z * s, x * z * t + y * s],
            [x * y * t + z * s, c + y * y * t, y * z * t - x * s],
            [x * z * t - y * s, y * z * t + x * s, c + z * z * t],
        ];

        Ok(Self {
            rotation,
            translation,
        })
    }

    /// Apply the transform to a single point.
    pub fn transform_point(&self, p: &[f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }

    /// Transform a set of points into a pre-allocated destination.
    ///
    /// # Arguments
    ///
    /// * `src_points` - The points to transform.
    /// * `dst_points` - Destination buffer with the same length as `src_points`.
    pub fn transform_points(
        &self,
        src_points: &[[f64; 3]],
        dst_points: &mut [[f64; 3]],
    ) -> Result<(), RegistrationError> {
        check_same_len("src_points", src_points.len(), "dst_points", dst_points.len())?;
        for (dst, src) in dst_points.iter_mut().zip(src_points.iter()) {
            *dst = self.transform_point(src);
        }
        Ok(())
    }

    /// Compose two transforms; the result applies `other` first and then `self`.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        let r = self.rotation_matrix() * other.rotation_matrix();
        let t = self.rotation_matrix() * other.translation_vector() + self.translation_vector();
        RigidTransform::from_nalgebra(&r, &t)
    }

    /// The inverse transform `p = R^T * (p' - t)`.
    pub fn inverse(&self) -> RigidTransform {
        let r_inv = self.rotation_matrix().transpose();
        let t_inv = -(r_inv * self.translation_vector());
        RigidTransform::from_nalgebra(&r_inv, &t_inv)
    }

    /// Geodesic angle in radians between the rotation of `self` and the rotation of `other`.
    pub fn rotation_angle_to(&self, other: &RigidTransform) -> f64 {
        let rel = self.rotation_matrix().transpose() * other.rotation_matrix();
        // |axis| = 2 sin(theta), trace - 1 = 2 cos(theta)
        let axis = Vector3::new(
            rel[(2, 1)] - rel[(1, 2)],
            rel[(0, 2)] - rel[(2, 0)],
            rel[(1, 0)] - rel[(0, 1)],
        );
        axis.norm().atan2(rel.trace() - 1.0)
    }

    /// Whether the rotation is orthogonal with determinant +1 up to `tol`.
    pub fn is_proper_rotation(&self, tol: f64) -> bool {
        let r = self.rotation_matrix();
        let orthogonality = (r * r.transpose() - Matrix3::identity()).amax();
        orthogonality <= tol && (r.determinant() - 1.0).abs() <= tol
    }

    /// Premultiply by an incremental motion: `R <- R_delta * R`, `t <- R_delta * t + t_delta`.
    pub(crate) fn premultiply(&self, r_delta: &Matrix3<f64>, t_delta: &Vector3<f64>) -> Self {
        let r = r_delta * self.rotation_matrix();
        let t = r_delta * self.translation_vector() + t_delta;
        RigidTransform::from_nalgebra(&r, &t)
    }

    pub(crate) fn rotation_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|i, j| self.rotation[i][j])
    }

    pub(crate) fn translation_vector(&self) -> Vector3<f64> {
        Vector3::from(self.translation)
    }

    pub(crate) fn from_nalgebra(r: &Matrix3<f64>, t: &Vector3<f64>) -> Self {
        let mut rotation = [[0.0; 3]; 3];
        for (i, row) in rotation.iter_mut().enumerate() {
            for (j, val) in row.iter_mut().enumerate() {
                *val = r[(i, j)];
            }
        }
        Self {
            rotation,
            translation: [t.x, t.y, t.z],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_axis_angle_z90() -> Result<(), RegistrationError> {
        let t = RigidTransform::from_axis_angle(
            &[0.0, 0.0, 2.0],
            std::f64::consts::FRAC_PI_2,
            [0.0; 3],
        )?;
        let expected = [[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        for (row, exp) in t.rotation.iter().zip(expected.iter()) {
            for (r, e) in row.iter().zip(exp.iter()) {
                assert_relative_eq!(r, e, epsilon = 1e-12);
            }
        }
        assert!(t.is_proper_rotation(1e-12));
        Ok(())
    }

    #[test]
    fn test_from_axis_angle_zero_axis() {
        let res = RigidTransform::from_axis_angle(&[0.0; 3], 0.3, [0.0; 3]);
        assert!(matches!(
            res,
            Err(RegistrationError::InvalidParameter { name: "axis", .. })
        ));
    }

    #[test]
    fn test_transform_points_roundtrip() -> Result<(), RegistrationError> {
        let src_points = vec![[2.0, 2.0, 2.0], [3.0, 4.0, 5.0]];
        let t = RigidTransform::from_axis_angle(&[1.0, 0.0, 0.0], 0.7, [1.0, 2.0, 3.0])?;

        let mut dst_points = vec![[0.0; 3]; src_points.len()];
        t.transform_points(&src_points, &mut dst_points)?;

        let mut back = vec![[0.0; 3]; src_points.len()];
        t.inverse().transform_points(&dst_points, &mut back)?;

        for (b, s) in back.iter().zip(src_points.iter()) {
            for k in 0..3 {
                assert_relative_eq!(b[k], s[k], epsilon = 1e-12);
            }
        }
        Ok(())
    }

    #[test]
    fn test_transform_points_mismatched() {
        let t = RigidTransform::identity();
        let mut dst = vec![[0.0; 3]; 1];
        let res = t.transform_points(&[[0.0; 3], [1.0; 3]], &mut dst);
        assert!(matches!(
            res,
            Err(RegistrationError::MismatchedLengths { .. })
        ));
    }

    #[test]
    fn test_compose_with_inverse_is_identity() -> Result<(), RegistrationError> {
        let t = RigidTransform::from_axis_angle(&[0.3, -0.2, 0.9], 1.1, [0.5, -1.0, 2.0])?;
        let id = t.compose(&t.inverse());
        let angle = id.rotation_angle_to(&RigidTransform::identity());
        assert_relative_eq!(angle, 0.0, epsilon = 1e-12);
        for k in 0..3 {
            assert_relative_eq!(id.translation[k], 0.0, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_compose_order() -> Result<(), RegistrationError> {
        let a = RigidTransform::from_axis_angle(&[0.0, 0.0, 1.0], 0.4, [1.0, 0.0, 0.0])?;
        let b = RigidTransform::from_axis_angle(&[0.0, 1.0, 0.0], -0.2, [0.0, 2.0, 0.0])?;
        let p = [0.3, -0.7, 1.5];
        let expected = a.transform_point(&b.transform_point(&p));
        let actual = a.compose(&b).transform_point(&p);
        for k in 0..3 {
            assert_relative_eq!(actual[k], expected[k], epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_rotation_angle_to() -> Result<(), RegistrationError> {
        let a = RigidTransform::from_axis_angle(&[1.0, 1.0, 0.0], 0.25, [0.0; 3])?;
        let b = RigidTransform::from_axis_angle(&[1.0, 1.0, 0.0], 0.75, [0.0; 3])?;
        assert_relative_eq!(a.rotation_angle_to(&b), 0.5, epsilon = 1e-12);
        assert_relative_eq!(b.rotation_angle_to(&a), 0.5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_premultiply() -> Result<(), RegistrationError> {
        let base = RigidTransform::from_axis_angle(&[0.0, 0.0, 1.0], 0.3, [1.0, 2.0, 3.0])?;
        let delta = RigidTransform::from_axis_angle(&[1.0, 0.0, 0.0], 0.1, [0.1, 0.0, -0.1])?;
        let updated = base.premultiply(&delta.rotation_matrix(), &delta.translation_vector());
        let expected = delta.compose(&base);
        for i in 0..3 {
            assert_relative_eq!(updated.translation[i], expected.translation[i], epsilon = 1e-12);
            for j in 0..3 {
                assert_relative_eq!(
                    updated.rotation[i][j],
                    expected.rotation[i][j],
                    epsilon = 1e-12
                );
            }
        }
        Ok(())
    }
}
