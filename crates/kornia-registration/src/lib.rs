#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia Registration
//!
//! Rigid registration of two index-aligned point sets whose points carry anisotropic
//! localization errors, one 3x3 covariance per point.
//!
//! ## Key Features
//!
//! - **Anisotropic weighting**: residuals are whitened with the combined covariance of
//!   every point pair, expressed in the current rotation frame
//! - **Isotropic seeding**: closed-form SVD fit used as the starting point and fallback
//! - **Robustness guard**: the refined transform is never worse than its seed
//! - **Data parallel**: weights, linear system rows and residuals are computed with rayon
//!
//! ## Example
//!
//! ```rust
//! use kornia_registration::{register_anisotropic, Covariance, WeightedRegistrationParams};
//!
//! let moving = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
//! let fixed = vec![[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 0.0, 0.0], [1.0, 0.0, 1.0]];
//!
//! // the first point is poorly localized along z
//! let unit: Covariance = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
//! let mut cov_moving = vec![unit; 4];
//! cov_moving[0][2][2] = 25.0;
//! let cov_fixed = cov_moving.clone();
//!
//! let result = register_anisotropic(
//!     &moving,
//!     &fixed,
//!     &cov_moving,
//!     &cov_fixed,
//!     &WeightedRegistrationParams::default(),
//! )?;
//!
//! println!("Rotation: {:?}", result.rotation);
//! println!("Translation: {:?}", result.translation);
//! println!("FRE: {} after {} iterations", result.fre, result.num_iterations);
//! # Ok::<(), kornia_registration::RegistrationError>(())
//! ```

/// Scale-invariant convergence metric and the iteration point buffers.
pub mod convergence;

/// Error types of the registration algorithms.
pub mod error;

/// Weighted fiducial and target registration errors.
pub mod fre;

/// Closed-form unweighted rigid fit.
pub mod isotropic;

/// Linearized weighted least squares system for an incremental rigid motion.
pub mod linearize;

/// Projection of small rotation increments onto proper rotations.
pub mod rotation;

/// Anisotropic weighted registration solver.
pub mod solver;

/// Rigid transform type.
pub mod transform;

/// Per point-pair weight matrices from anisotropic covariances.
pub mod weights;

pub use error::{ErrorKind, RegistrationError};
pub use fre::{compute_tre, compute_weighted_fre, FreResult};
pub use isotropic::{compute_centroids, fit_isotropic};
pub use solver::{
    register_anisotropic, RegistrationOutcome, WeightedRegistrationParams,
    WeightedRegistrationResult,
};
pub use transform::RigidTransform;
pub use weights::{isotropic_covariance, Covariance, WeightMatrix};
