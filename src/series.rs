//! Input data for training and inference.

use candle_core::{Device, Tensor};

use crate::error::{MemcastError, MemcastResult};

/// An aligned pair of feature and target sequences.
///
/// Features have shape `(n, input_dim)`, targets have shape `(n,)`.
/// Immutable for the duration of a training run. Target values are kept
/// both as a tensor (for the sequence loss) and as plain floats (for
/// threshold labeling and event counting).
#[derive(Debug, Clone)]
pub struct Series {
    features: Tensor,
    targets: Tensor,
    target_values: Vec<f32>,
}

impl Series {
    /// Create a series from a feature tensor of shape `(n, input_dim)`
    /// and `n` scalar targets.
    pub fn new(features: Tensor, targets: Vec<f32>) -> MemcastResult<Self> {
        let (n, _input_dim) = features.dims2()?;
        if n != targets.len() {
            return Err(MemcastError::SeriesMismatch {
                features: n,
                targets: targets.len(),
            });
        }
        let targets_tensor = Tensor::from_slice(&targets, targets.len(), features.device())?;
        Ok(Self {
            features,
            targets: targets_tensor,
            target_values: targets,
        })
    }

    /// Create a series from flat slices. `features` must hold
    /// `targets.len() * input_dim` values in row-major order.
    pub fn from_slices(
        features: &[f32],
        targets: &[f32],
        input_dim: usize,
        device: &Device,
    ) -> MemcastResult<Self> {
        if input_dim == 0 || features.len() != targets.len() * input_dim {
            return Err(MemcastError::SeriesMismatch {
                features: if input_dim == 0 {
                    features.len()
                } else {
                    features.len() / input_dim
                },
                targets: targets.len(),
            });
        }
        let features = Tensor::from_slice(features, (targets.len(), input_dim), device)?;
        Self::new(features, targets.to_vec())
    }

    /// Number of timesteps.
    pub fn len(&self) -> usize {
        self.target_values.len()
    }

    /// Whether the series has no timesteps.
    pub fn is_empty(&self) -> bool {
        self.target_values.is_empty()
    }

    /// Feature vector dimension.
    pub fn input_dim(&self) -> usize {
        self.features.dims()[1]
    }

    /// The full feature tensor, shape `(n, input_dim)`.
    pub fn features(&self) -> &Tensor {
        &self.features
    }

    /// The full target tensor, shape `(n,)`.
    pub fn targets(&self) -> &Tensor {
        &self.targets
    }

    /// Target value at timestep `t`.
    pub fn target(&self, t: usize) -> f32 {
        self.target_values[t]
    }

    /// Feature row at timestep `t` as a `(1, input_dim)` tensor.
    pub fn feature_row(&self, t: usize) -> MemcastResult<Tensor> {
        Ok(self.features.narrow(0, t, 1)?)
    }

    /// Targets for `[start, start + len)` as a `(len,)` tensor.
    pub fn target_window(&self, start: usize, len: usize) -> MemcastResult<Tensor> {
        Ok(self.targets.narrow(0, start, len)?)
    }
}
