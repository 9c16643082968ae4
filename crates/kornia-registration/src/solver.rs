use crate::convergence::{config_change, PointBuffers};
use crate::error::{check_same_len, RegistrationError};
use crate::fre::compute_weighted_fre;
use crate::isotropic::{fit_isotropic, MIN_POINTS};
use crate::linearize::{build_linear_system, solve_increment, NUM_PARAMS};
use crate::rotation::orthogonal_increment;
use crate::transform::RigidTransform;
use crate::weights::{check_positive_semidefinite, compute_weight_matrices, Covariance};
use nalgebra::Vector3;

/// Parameters of the anisotropic weighted registration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightedRegistrationParams {
    /// Stop once the configuration change between two iterations is at or below this value.
    pub threshold: f64,
    /// Maximum number of iterations to perform.
    pub max_iterations: usize,
    /// Average each increment with the previous one to suppress oscillation.
    pub damping: bool,
    /// Factor applied to the weighted FRE.
    pub fre_normalization: f64,
    /// Relative singular value threshold used by every decomposition.
    pub eps: f64,
}

impl Default for WeightedRegistrationParams {
    fn default() -> Self {
        Self {
            threshold: 1e-4,
            max_iterations: 1000,
            damping: true,
            fre_normalization: 1.0,
            eps: 1e-12,
        }
    }
}

/// How the iterative refinement terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegistrationOutcome {
    /// The configuration change dropped to the threshold.
    Converged,
    /// The iteration cap was reached first; the last estimate is returned.
    MaxIterations,
    /// The refinement ended with a larger FRE than its seed; the seed is returned.
    DivergedFallback,
}

/// Result of the anisotropic weighted registration.
///
/// The transformation maps the moving points onto the fixed points.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightedRegistrationResult {
    /// Estimated rotation matrix.
    pub rotation: [[f64; 3]; 3],
    /// Estimated translation vector.
    pub translation: [f64; 3],
    /// Weighted fiducial registration error of the returned transform.
    pub fre: f64,
    /// Number of iterations performed.
    pub num_iterations: usize,
    /// Configuration change of the last iteration.
    pub config_change: f64,
    /// How the refinement terminated.
    pub outcome: RegistrationOutcome,
}

impl WeightedRegistrationResult {
    /// The estimated transform.
    pub fn transform(&self) -> RigidTransform {
        RigidTransform::new(self.rotation, self.translation)
    }
}

/// Mutable state of the refinement loop.
struct IterationState {
    transform: RigidTransform,
    prev_increment: Option<[f64; NUM_PARAMS]>,
    iteration: usize,
    config_change: f64,
}

/// Rigid registration of two corresponded point sets with anisotropic localization errors.
///
/// Every point of both sets carries a 3x3 covariance. The solver minimizes the weighted
/// fiducial registration error with `W_i = (R Σx_i R^T + Σy_i)^(-1/2)`:
///
/// 1. Fit an unweighted rigid transform in closed form and seed the iteration with it or
///    with the identity, whichever has the lower weighted FRE.
/// 2. Iterate: recompute the weights at the current rotation, solve the linearized
///    weighted least squares problem for a small rigid motion, project its rotation onto
///    a proper rotation and apply it. Stop when the configuration change is at or below
///    `params.threshold` or after `params.max_iterations` iterations.
/// 3. Return the seed instead of the refined transform if the latter has a larger FRE.
///
/// # Arguments
///
/// * `moving` - Points to be aligned (X).
/// * `fixed` - Reference points (Y), index-aligned with `moving`.
/// * `cov_moving` - Covariance of every moving point.
/// * `cov_fixed` - Covariance of every fixed point.
/// * `params` - Convergence and numerical parameters.
///
/// # Returns
///
/// * `result` - Rotation, translation, FRE, number of iterations and termination outcome.
///
/// Example:
///
/// ```
/// use kornia_registration::{
///     isotropic_covariance, register_anisotropic, RigidTransform, WeightedRegistrationParams,
/// };
///
/// let moving = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
/// let truth = RigidTransform::from_axis_angle(&[0.0, 0.0, 1.0], 0.5, [1.0, 0.0, 0.0])?;
/// let fixed = moving.iter().map(|p| truth.transform_point(p)).collect::<Vec<_>>();
/// let cov = vec![isotropic_covariance(1.0); moving.len()];
///
/// let params = WeightedRegistrationParams::default();
/// let result = register_anisotropic(&moving, &fixed, &cov, &cov, &params)?;
/// assert!(result.transform().rotation_angle_to(&truth) < 1e-6);
/// # Ok::<(), kornia_registration::RegistrationError>(())
/// ```
pub fn register_anisotropic(
    moving: &[[f64; 3]],
    fixed: &[[f64; 3]],
    cov_moving: &[Covariance],
    cov_fixed: &[Covariance],
    params: &WeightedRegistrationParams,
) -> Result<WeightedRegistrationResult, RegistrationError> {
    validate_inputs(moving, fixed, cov_moving, cov_fixed, params)?;

    let weighted_fre = |transform: &RigidTransform| {
        compute_weighted_fre(
            moving,
            fixed,
            cov_moving,
            cov_fixed,
            transform,
            params.fre_normalization,
            params.eps,
        )
    };

    // choose the seed between the identity and the isotropic fit
    let identity = RigidTransform::identity();
    let isotropic = fit_isotropic(moving, fixed)?;
    let fre_identity = weighted_fre(&identity)?.fre;
    let fre_isotropic = weighted_fre(&isotropic)?.fre;

    let (seed, fre_seed) = if fre_identity > fre_isotropic {
        (isotropic, fre_isotropic)
    } else {
        (identity, fre_identity)
    };
    log::debug!(
        "FRE identity: {}, FRE isotropic: {}, seeding with {}",
        fre_identity,
        fre_isotropic,
        if fre_identity > fre_isotropic {
            "isotropic fit"
        } else {
            "identity"
        }
    );

    let mut state = IterationState {
        transform: seed,
        prev_increment: None,
        iteration: 0,
        config_change: f64::INFINITY,
    };

    let mut buffers = PointBuffers::new(moving.len());
    state
        .transform
        .transform_points(moving, buffers.current_mut())?;

    let mut converged = false;
    while state.iteration < params.max_iterations {
        let now = std::time::Instant::now();
        state.iteration += 1;

        let weights = compute_weight_matrices(
            cov_moving,
            cov_fixed,
            &state.transform.rotation_matrix(),
            params.eps,
        )?;
        let system = build_linear_system(buffers.current(), fixed, &weights)?;
        let mut q = solve_increment(&system, params.eps)?;

        if params.damping {
            if let Some(prev) = state.prev_increment {
                for (qi, pi) in q.iter_mut().zip(prev.iter()) {
                    *qi = 0.5 * (*qi + pi);
                }
            }
        }
        state.prev_increment = Some(q);

        let r_delta = orthogonal_increment(&[q[0], q[1], q[2]], params.eps)?;
        let t_delta = Vector3::new(q[3], q[4], q[5]);
        state.transform = state.transform.premultiply(&r_delta, &t_delta);

        let (previous, current) = buffers.split();
        state.transform.transform_points(moving, current)?;
        state.config_change = config_change(previous, current)?;
        buffers.swap();

        log::debug!(
            "Iteration: {}, config change: {:e}, elapsed: {:?}",
            state.iteration,
            state.config_change,
            now.elapsed()
        );

        if state.config_change <= params.threshold {
            converged = true;
            break;
        }
    }

    let fre = weighted_fre(&state.transform)?.fre;

    Ok(finalize(seed, fre_seed, &state, fre, converged))
}

/// Build the result from the last iterate, or from the seed when the iterate has a larger
/// FRE than the seed.
fn finalize(
    seed: RigidTransform,
    fre_seed: f64,
    state: &IterationState,
    fre: f64,
    converged: bool,
) -> WeightedRegistrationResult {
    if fre > fre_seed {
        log::warn!(
            "Weighted registration ended with FRE {} above its seed FRE {}, returning the seed",
            fre,
            fre_seed
        );
        return WeightedRegistrationResult {
            rotation: seed.rotation,
            translation: seed.translation,
            fre: fre_seed,
            num_iterations: state.iteration,
            config_change: state.config_change,
            outcome: RegistrationOutcome::DivergedFallback,
        };
    }

    let outcome = if converged {
        log::debug!(
            "Weighted registration converged in {} iterations with FRE {}",
            state.iteration,
            fre
        );
        RegistrationOutcome::Converged
    } else {
        log::warn!(
            "Weighted registration reached {} iterations without converging (config change {:e})",
            state.iteration,
            state.config_change
        );
        RegistrationOutcome::MaxIterations
    };

    WeightedRegistrationResult {
        rotation: state.transform.rotation,
        translation: state.transform.translation,
        fre,
        num_iterations: state.iteration,
        config_change: state.config_change,
        outcome,
    }
}

fn validate_inputs(
    moving: &[[f64; 3]],
    fixed: &[[f64; 3]],
    cov_moving: &[Covariance],
    cov_fixed: &[Covariance],
    params: &WeightedRegistrationParams,
) -> Result<(), RegistrationError> {
    check_same_len("moving points", moving.len(), "fixed points", fixed.len())?;
    check_same_len(
        "moving points",
        moving.len(),
        "moving covariances",
        cov_moving.len(),
    )?;
    check_same_len(
        "fixed points",
        fixed.len(),
        "fixed covariances",
        cov_fixed.len(),
    )?;

    if moving.len() < MIN_POINTS {
        return Err(RegistrationError::InsufficientPoints {
            required: MIN_POINTS,
            actual: moving.len(),
        });
    }

    if !(params.threshold > 0.0 && params.threshold.is_finite()) {
        return Err(RegistrationError::InvalidParameter {
            name: "threshold",
            reason: format!("must be positive and finite, got {}", params.threshold),
        });
    }
    if params.max_iterations == 0 {
        return Err(RegistrationError::InvalidParameter {
            name: "max_iterations",
            reason: "must be at least 1".to_string(),
        });
    }
    if !(params.fre_normalization > 0.0 && params.fre_normalization.is_finite()) {
        return Err(RegistrationError::InvalidParameter {
            name: "fre_normalization",
            reason: format!(
                "must be positive and finite, got {}",
                params.fre_normalization
            ),
        });
    }
    if !(params.eps >= 0.0 && params.eps.is_finite()) {
        return Err(RegistrationError::InvalidParameter {
            name: "eps",
            reason: format!("must be non-negative and finite, got {}", params.eps),
        });
    }

    for (name, points) in [("moving points", moving), ("fixed points", fixed)] {
        if let Some(index) = points
            .iter()
            .position(|p| p.iter().any(|v| !v.is_finite()))
        {
            return Err(RegistrationError::NonFiniteInput { name, index });
        }
    }

    for (name, covs) in [
        ("moving covariances", cov_moving),
        ("fixed covariances", cov_fixed),
    ] {
        for (index, cov) in covs.iter().enumerate() {
            if cov.iter().flatten().any(|v| !v.is_finite()) {
                return Err(RegistrationError::NonFiniteInput { name, index });
            }
            if !is_symmetric(cov) {
                return Err(RegistrationError::AsymmetricCovariance { name, index });
            }
            check_positive_semidefinite(cov, 1e-9).map_err(|min_eigenvalue| {
                RegistrationError::IndefiniteCovariance {
                    name,
                    index,
                    min_eigenvalue,
                }
            })?;
        }
    }

    Ok(())
}

fn is_symmetric(cov: &Covariance) -> bool {
    let scale = cov.iter().flatten().fold(0.0f64, |acc, v| acc.max(v.abs()));
    let tol = 1e-9 * scale;
    (cov[0][1] - cov[1][0]).abs() <= tol
        && (cov[0][2] - cov[2][0]).abs() <= tol
        && (cov[1][2] - cov[2][1]).abs() <= tol
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::weights::isotropic_covariance;
    use approx::assert_relative_eq;

    fn tetrahedron() -> Vec<[f64; 3]> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]
    }

    #[test]
    fn test_identity_registration() -> Result<(), RegistrationError> {
        let points = tetrahedron();
        let cov = vec![isotropic_covariance(1.0); points.len()];

        let result = register_anisotropic(
            &points,
            &points,
            &cov,
            &cov,
            &WeightedRegistrationParams::default(),
        )?;

        assert!(result.num_iterations <= 2);
        assert_relative_eq!(result.fre, 0.0, epsilon = 1e-12);
        let identity = RigidTransform::identity();
        for i in 0..3 {
            assert_relative_eq!(result.translation[i], 0.0, epsilon = 1e-12);
            for j in 0..3 {
                assert_relative_eq!(
                    result.rotation[i][j],
                    identity.rotation[i][j],
                    epsilon = 1e-12
                );
            }
        }
        Ok(())
    }

    #[test]
    fn test_damping_toggle_reaches_same_solution() -> Result<(), RegistrationError> {
        let moving = tetrahedron();
        let truth = RigidTransform::from_axis_angle(&[1.0, 2.0, 0.5], 0.4, [0.3, -0.2, 0.1])?;
        let fixed = moving
            .iter()
            .map(|p| truth.transform_point(p))
            .collect::<Vec<_>>();
        let cov_x = vec![[[2.0, 0.5, 0.0], [0.5, 1.0, 0.0], [0.0, 0.0, 0.5]]; moving.len()];
        let cov_y = vec![isotropic_covariance(0.5); moving.len()];

        for damping in [true, false] {
            let params = WeightedRegistrationParams {
                damping,
                ..Default::default()
            };
            let result = register_anisotropic(&moving, &fixed, &cov_x, &cov_y, &params)?;
            assert!(result.transform().rotation_angle_to(&truth) < 1e-6);
            assert!(result.transform().is_proper_rotation(1e-9));
        }
        Ok(())
    }

    #[test]
    fn test_insufficient_points() {
        let points = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let cov = vec![isotropic_covariance(1.0); 2];
        let res = register_anisotropic(
            &points,
            &points,
            &cov,
            &cov,
            &WeightedRegistrationParams::default(),
        );
        let err = res.expect_err("two points cannot be registered");
        assert_eq!(err.kind(), ErrorKind::InputContractViolation);
        assert!(matches!(
            err,
            RegistrationError::InsufficientPoints {
                required: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_mismatched_covariances() {
        let points = tetrahedron();
        let cov = vec![isotropic_covariance(1.0); points.len() - 1];
        let res = register_anisotropic(
            &points,
            &points,
            &cov,
            &cov,
            &WeightedRegistrationParams::default(),
        );
        assert!(matches!(
            res,
            Err(RegistrationError::MismatchedLengths {
                right_name: "moving covariances",
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_parameters() {
        let points = tetrahedron();
        let cov = vec![isotropic_covariance(1.0); points.len()];

        let params = WeightedRegistrationParams {
            threshold: 0.0,
            ..Default::default()
        };
        let res = register_anisotropic(&points, &points, &cov, &cov, &params);
        assert!(matches!(
            res,
            Err(RegistrationError::InvalidParameter {
                name: "threshold",
                ..
            })
        ));

        let params = WeightedRegistrationParams {
            max_iterations: 0,
            ..Default::default()
        };
        let res = register_anisotropic(&points, &points, &cov, &cov, &params);
        assert!(matches!(
            res,
            Err(RegistrationError::InvalidParameter {
                name: "max_iterations",
                ..
            })
        ));
    }

    #[test]
    fn test_non_finite_and_asymmetric_inputs() {
        let mut points = tetrahedron();
        let cov = vec![isotropic_covariance(1.0); points.len()];
        let fixed = points.clone();
        points[2][1] = f64::NAN;
        let res = register_anisotropic(
            &points,
            &fixed,
            &cov,
            &cov,
            &WeightedRegistrationParams::default(),
        );
        assert!(matches!(
            res,
            Err(RegistrationError::NonFiniteInput {
                name: "moving points",
                index: 2
            })
        ));

        let points = tetrahedron();
        let mut skewed = cov.clone();
        skewed[3][0][1] = 0.5;
        let res = register_anisotropic(
            &points,
            &points,
            &cov,
            &skewed,
            &WeightedRegistrationParams::default(),
        );
        assert!(matches!(
            res,
            Err(RegistrationError::AsymmetricCovariance {
                name: "fixed covariances",
                index: 3
            })
        ));
    }

    #[test]
    fn test_singular_covariances_are_degenerate() {
        let points = tetrahedron();
        let cov = vec![isotropic_covariance(0.0); points.len()];
        let res = register_anisotropic(
            &points,
            &points,
            &cov,
            &cov,
            &WeightedRegistrationParams::default(),
        );
        let err = res.expect_err("zero covariances cannot be inverted");
        assert_eq!(err.kind(), ErrorKind::NumericalDegeneracy);
    }

    #[test]
    fn test_max_iterations_reported() -> Result<(), RegistrationError> {
        let moving = tetrahedron();
        let mut fixed = moving
            .iter()
            .map(|p| [p[0] + 0.5, p[1], p[2]])
            .collect::<Vec<_>>();
        fixed[1][2] += 0.2;
        let mut cov_x = vec![isotropic_covariance(1.0); moving.len()];
        cov_x[1] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 50.0]];
        let cov_y = vec![isotropic_covariance(1.0); moving.len()];

        let params = WeightedRegistrationParams {
            threshold: 1e-300,
            max_iterations: 3,
            ..Default::default()
        };
        let result = register_anisotropic(&moving, &fixed, &cov_x, &cov_y, &params)?;
        assert_eq!(result.num_iterations, 3);
        assert!(matches!(
            result.outcome,
            RegistrationOutcome::MaxIterations | RegistrationOutcome::DivergedFallback
        ));
        Ok(())
    }

    #[test]
    fn test_finalize_falls_back_to_seed() -> Result<(), RegistrationError> {
        let seed = RigidTransform::from_axis_angle(&[0.0, 1.0, 0.0], 0.2, [1.0, 0.0, 0.0])?;
        let state = IterationState {
            transform: RigidTransform::from_axis_angle(&[1.0, 0.0, 0.0], 0.7, [0.0, 3.0, 0.0])?,
            prev_increment: None,
            iteration: 12,
            config_change: 1e-5,
        };

        let result = finalize(seed, 0.25, &state, 0.75, true);
        assert_eq!(result.outcome, RegistrationOutcome::DivergedFallback);
        assert_eq!(result.transform(), seed);
        assert_eq!(result.fre, 0.25);
        assert!(result.fre < 0.75);
        assert_eq!(result.num_iterations, 12);
        assert_eq!(result.config_change, 1e-5);
        Ok(())
    }

    #[test]
    fn test_finalize_keeps_refined_transform() -> Result<(), RegistrationError> {
        let seed = RigidTransform::identity();
        let state = IterationState {
            transform: RigidTransform::from_axis_angle(&[0.0, 0.0, 1.0], 0.3, [0.5, 0.0, 0.0])?,
            prev_increment: None,
            iteration: 4,
            config_change: 1e-6,
        };

        // equal FRE keeps the refined transform
        let result = finalize(seed, 0.5, &state, 0.5, true);
        assert_eq!(result.outcome, RegistrationOutcome::Converged);
        assert_eq!(result.transform(), state.transform);
        assert_eq!(result.fre, 0.5);

        let result = finalize(seed, 0.5, &state, 0.1, false);
        assert_eq!(result.outcome, RegistrationOutcome::MaxIterations);
        assert_eq!(result.transform(), state.transform);
        assert_eq!(result.fre, 0.1);
        Ok(())
    }

    #[test]
    fn test_indefinite_covariance_rejected() {
        let moving = tetrahedron();
        let fixed = moving
            .iter()
            .map(|p| [p[0] + 0.1, p[1], p[2]])
            .collect::<Vec<_>>();
        let mut cov = vec![isotropic_covariance(1.0); moving.len()];
        cov[1] = [[-5.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

        let err = register_anisotropic(
            &moving,
            &fixed,
            &cov,
            &cov,
            &WeightedRegistrationParams::default(),
        )
        .expect_err("indefinite covariance");
        assert_eq!(err.kind(), ErrorKind::InputContractViolation);
        assert!(matches!(
            err,
            RegistrationError::IndefiniteCovariance {
                name: "moving covariances",
                index: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_is_symmetric() {
        assert!(is_symmetric(&isotropic_covariance(2.0)));
        assert!(!is_symmetric(&[
            [1.0, 0.1, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0]
        ]));
    }
}
