use thiserror::Error;

/// Broad category of a [`RegistrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller violated an input precondition (lengths, point count, parameters, values).
    InputContractViolation,
    /// A matrix that must be invertible or decomposable was singular or not finite.
    NumericalDegeneracy,
}

/// Error types for the registration algorithms.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Two sequences that must be index-aligned have different lengths.
    #[error("Mismatched lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedLengths {
        /// Name of the first sequence.
        left_name: &'static str,
        /// Length of the first sequence.
        left_len: usize,
        /// Name of the second sequence.
        right_name: &'static str,
        /// Length of the second sequence.
        right_len: usize,
    },

    /// Not enough corresponded points to determine a rigid transform.
    #[error("Registration requires at least {required} corresponded points, got {actual}")]
    InsufficientPoints {
        /// Minimum number of points required.
        required: usize,
        /// Number of points provided.
        actual: usize,
    },

    /// A solver parameter is out of its valid range.
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Name of the parameter.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A coordinate or covariance entry is NaN or infinite.
    #[error("Non-finite value in {name} at index {index}")]
    NonFiniteInput {
        /// Name of the offending sequence.
        name: &'static str,
        /// Index of the offending element.
        index: usize,
    },

    /// A covariance matrix is not symmetric.
    #[error("Covariance {name}[{index}] is not symmetric")]
    AsymmetricCovariance {
        /// Name of the covariance sequence.
        name: &'static str,
        /// Index of the offending covariance.
        index: usize,
    },

    /// A covariance matrix has a negative eigenvalue.
    #[error("Covariance {name}[{index}] is indefinite, min eigenvalue {min_eigenvalue}")]
    IndefiniteCovariance {
        /// Name of the covariance sequence.
        name: &'static str,
        /// Index of the offending covariance.
        index: usize,
        /// Smallest eigenvalue of the covariance.
        min_eigenvalue: f64,
    },

    /// The combined covariance of a point pair cannot be inverted.
    #[error("Combined covariance of point pair {index} is singular")]
    SingularCovariance {
        /// Index of the point pair.
        index: usize,
    },

    /// The linearized least squares system has no usable solution.
    #[error("Degenerate linearized system: {0}")]
    DegenerateSystem(String),

    /// The rotation increment cannot be projected onto a proper rotation.
    #[error("Degenerate rotation increment: {0}")]
    DegenerateRotation(String),

    /// Singular value decomposition did not produce the requested factors.
    #[error("SVD computation failed: {0}")]
    SvdFailed(&'static str),
}

impl RegistrationError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistrationError::MismatchedLengths { .. }
            | RegistrationError::InsufficientPoints { .. }
            | RegistrationError::InvalidParameter { .. }
            | RegistrationError::NonFiniteInput { .. }
            | RegistrationError::AsymmetricCovariance { .. }
            | RegistrationError::IndefiniteCovariance { .. } => ErrorKind::InputContractViolation,
            RegistrationError::SingularCovariance { .. }
            | RegistrationError::DegenerateSystem(_)
            | RegistrationError::DegenerateRotation(_)
            | RegistrationError::SvdFailed(_) => ErrorKind::NumericalDegeneracy,
        }
    }
}

pub(crate) fn check_same_len(
    left_name: &'static str,
    left_len: usize,
    right_name: &'static str,
    right_len: usize,
) -> Result<(), RegistrationError> {
    if left_len != right_len {
        return Err(RegistrationError::MismatchedLengths {
            left_name,
            left_len,
            right_name,
            right_len,
        });
    }
    Ok(())
}
