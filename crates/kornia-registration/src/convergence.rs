use crate::error::{check_same_len, RegistrationError};
use crate::isotropic::centroid;
use nalgebra::Vector3;

/// Scale-invariant change between two consecutive configurations of the moving points.
///
/// The metric is the RMS displacement between `previous` and `current` divided by the RMS
/// distance of `previous` to its centroid. When `previous` has no spread the RMS
/// displacement itself is returned.
pub fn config_change(
    previous: &[[f64; 3]],
    current: &[[f64; 3]],
) -> Result<f64, RegistrationError> {
    check_same_len("previous points", previous.len(), "current points", current.len())?;
    if previous.is_empty() {
        return Ok(0.0);
    }

    let mean = centroid(previous);

    let (displacement_sq, spread_sq) = previous.iter().zip(current.iter()).fold(
        (0.0, 0.0),
        |(displacement, spread), (p, c)| {
            let p = Vector3::from(*p);
            let c = Vector3::from(*c);
            (
                displacement + (c - p).norm_squared(),
                spread + (p - mean).norm_squared(),
            )
        },
    );

    let n = previous.len() as f64;
    if spread_sq <= f64::MIN_POSITIVE {
        return Ok((displacement_sq / n).sqrt());
    }
    Ok((displacement_sq / spread_sq).sqrt())
}

/// Two pre-allocated point buffers whose roles alternate between iterations.
///
/// One buffer holds the configuration of the previous iteration, the other receives the
/// configuration of the current one. [`PointBuffers::swap`] exchanges the roles without
/// moving any data.
#[derive(Debug, Clone)]
pub struct PointBuffers {
    buffers: [Vec<[f64; 3]>; 2],
    current: usize,
}

impl PointBuffers {
    /// Allocate both buffers for `len` points.
    pub fn new(len: usize) -> Self {
        Self {
            buffers: [vec![[0.0; 3]; len], vec![[0.0; 3]; len]],
            current: 0,
        }
    }

    /// The configuration of the last completed iteration.
    pub fn current(&self) -> &[[f64; 3]] {
        &self.buffers[self.current]
    }

    /// Mutable access to the current configuration.
    pub fn current_mut(&mut self) -> &mut [[f64; 3]] {
        &mut self.buffers[self.current]
    }

    /// Borrow the current configuration and the spare buffer at the same time.
    pub fn split(&mut self) -> (&[[f64; 3]], &mut [[f64; 3]]) {
        let (first, second) = self.buffers.split_at_mut(1);
        if self.current == 0 {
            (first[0].as_slice(), second[0].as_mut_slice())
        } else {
            (second[0].as_slice(), first[0].as_mut_slice())
        }
    }

    /// Promote the spare buffer to current.
    pub fn swap(&mut self) {
        self.current ^= 1;
    }
}
