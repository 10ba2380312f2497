//! Loss functions for the Memcast forecaster.
//!
//! Two objectives drive training:
//! - [`forecast_loss`] - the sequence-level objective: square error on the
//!   blended forecast plus a weighted extreme value term.
//! - [`memory_loss`] - the memory-shaping objective used by the inner
//!   update; an alias for [`extreme_value_loss`].
//!
//! All functions are pure: they take tensors, return a scalar tensor, and
//! have no side effects.

use candle_core::{Result, Tensor};

/// Square loss between prediction and target.
///
/// Computes `sum((pred - target)^2)` over all elements. Both tensors must
/// have the same shape.
pub fn square_loss(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    (pred - target)?.sqr()?.sum_all()
}

/// Extreme value loss.
///
/// A focal-style objective balancing rare extreme positives against common
/// negatives. For each element,
///
/// ```text
/// extreme term: -fN * (1 - pred/gamma)^gamma * target * ln(pred)
/// normal term:  -fE * (1 - (1-pred)/gamma)^gamma * (1-target) * ln(1-pred)
/// ```
///
/// where `fN = num_normal / (num_normal + num_extreme)` and `fE` is its
/// complement, and `gamma` is the extreme value index. Returns the sum of
/// both terms over all elements.
///
/// # Contract
///
/// `pred` must lie strictly inside (0, 1) elementwise (a sigmoid or clamp
/// upstream), otherwise the logs produce infinities. `num_normal +
/// num_extreme` must be positive.
pub fn extreme_value_loss(
    pred: &Tensor,
    target: &Tensor,
    num_normal: f32,
    num_extreme: f32,
    extreme_value_index: f32,
) -> Result<Tensor> {
    let total_events = num_normal + num_extreme;
    debug_assert!(total_events > 0.0, "no events counted");

    let fraction_normal = (num_normal / total_events) as f64;
    let fraction_extreme = (num_extreme / total_events) as f64;
    let gamma = extreme_value_index as f64;

    let one_minus_pred = pred.affine(-1.0, 1.0)?;
    let one_minus_target = target.affine(-1.0, 1.0)?;

    // -fN * (1 - pred/gamma)^gamma * target * ln(pred)
    let extreme_part = pred.affine(-1.0 / gamma, 1.0)?.powf(gamma)?;
    let extreme_part = (&extreme_part * target)?;
    let extreme_part = (&extreme_part * &pred.log()?)?.affine(-fraction_normal, 0.0)?;

    // -fE * (1 - (1-pred)/gamma)^gamma * (1-target) * ln(1-pred)
    let normal_part = one_minus_pred.affine(-1.0 / gamma, 1.0)?.powf(gamma)?;
    let normal_part = (&normal_part * &one_minus_target)?;
    let normal_part = (&normal_part * &one_minus_pred.log()?)?.affine(-fraction_extreme, 0.0)?;

    (extreme_part + normal_part)?.sum_all()
}

/// Sequence-level training objective.
///
/// `square_loss(y_pred, y_true) + extreme_weight * extreme_value_loss(...)`
/// where the extreme value term scores the per-timestep extreme event
/// predictions against their binary targets.
#[allow(clippy::too_many_arguments)]
pub fn forecast_loss(
    y_pred: &Tensor,
    y_true: &Tensor,
    extreme_pred: &Tensor,
    extreme_target: &Tensor,
    extreme_weight: f32,
    num_normal: f32,
    num_extreme: f32,
    extreme_value_index: f32,
) -> Result<Tensor> {
    let square = square_loss(y_pred, y_true)?;
    let extreme = extreme_value_loss(
        extreme_pred,
        extreme_target,
        num_normal,
        num_extreme,
        extreme_value_index,
    )?;
    square + extreme.affine(extreme_weight as f64, 0.0)?
}

/// Memory-shaping objective, used by the inner update to keep the window
/// encoder and memory read-out informative. Alias for
/// [`extreme_value_loss`].
pub use self::extreme_value_loss as memory_loss;

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn tensor(values: &[f32]) -> Tensor {
        Tensor::from_slice(values, values.len(), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_square_loss_non_negative() {
        let pred = tensor(&[0.1, 2.0, 3.5]);
        let target = tensor(&[0.4, 1.0, 5.0]);

        let loss = square_loss(&pred, &target)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(loss >= 0.0);

        let expected = 0.3f32 * 0.3 + 1.0 + 1.5 * 1.5;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_square_loss_zero_iff_equal() {
        let pred = tensor(&[0.5, 1.5, 2.5]);
        let loss = square_loss(&pred, &pred)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(loss, 0.0);

        let other = tensor(&[0.5, 1.5, 2.6]);
        let loss = square_loss(&pred, &other)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(loss > 0.0);
    }

    #[test]
    fn test_extreme_value_loss_finite_inside_unit_interval() {
        let pred = tensor(&[0.2, 0.5, 0.9]);
        let target = tensor(&[0.0, 1.0, 1.0]);

        let loss = extreme_value_loss(&pred, &target, 5.0, 2.0, 2.0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(loss.is_finite());
        assert!(loss > 0.0);
    }

    #[test]
    fn test_extreme_value_loss_class_swap_symmetry() {
        // Swapping normal/extreme counts together with target <-> 1-target
        // and pred <-> 1-pred must leave the value unchanged.
        let pred = tensor(&[0.3, 0.7, 0.55]);
        let target = tensor(&[1.0, 0.0, 1.0]);
        let swapped_pred = tensor(&[0.7, 0.3, 0.45]);
        let swapped_target = tensor(&[0.0, 1.0, 0.0]);

        let forward = extreme_value_loss(&pred, &target, 6.0, 3.0, 2.0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let swapped = extreme_value_loss(&swapped_pred, &swapped_target, 3.0, 6.0, 2.0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        assert!((forward - swapped).abs() < 1e-5);
    }

    #[test]
    fn test_forecast_loss_composition() {
        let y_pred = tensor(&[1.0, 2.0]);
        let y_true = tensor(&[1.5, 1.0]);
        let extreme_pred = tensor(&[0.4, 0.6]);
        let extreme_target = tensor(&[0.0, 1.0]);

        let square = square_loss(&y_pred, &y_true)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let extreme = extreme_value_loss(&extreme_pred, &extreme_target, 1.0, 1.0, 2.0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        let combined = forecast_loss(
            &y_pred,
            &y_true,
            &extreme_pred,
            &extreme_target,
            0.5,
            1.0,
            1.0,
            2.0,
        )
        .unwrap()
        .to_scalar::<f32>()
        .unwrap();

        assert!((combined - (square + 0.5 * extreme)).abs() < 1e-5);
    }

    #[test]
    fn test_memory_loss_is_extreme_value_loss() {
        let pred = tensor(&[0.25, 0.75]);
        let target = tensor(&[0.0, 1.0]);

        let a = extreme_value_loss(&pred, &target, 2.0, 1.0, 2.0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let b = memory_loss(&pred, &target, 2.0, 1.0, 2.0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(a, b);
    }
}
