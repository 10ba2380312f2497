//! Scaled dot-product attention over memory slots.

use candle_core::{Result, Tensor, D};
use candle_nn::ops::softmax;

/// Attention weights of a query state over the memory keys.
///
/// `query` has shape `(1, hidden)`, `keys` has shape `(memory_size,
/// hidden)`. Returns softmax-normalized weights of shape `(1,
/// memory_size)`: non-negative, summing to 1 across slots.
pub fn attention_weights(query: &Tensor, keys: &Tensor) -> Result<Tensor> {
    let hidden = keys.dim(D::Minus1)? as f64;
    let scores = query.matmul(&keys.t()?)?.affine(1.0 / hidden.sqrt(), 0.0)?;
    softmax(&scores, D::Minus1)
}
