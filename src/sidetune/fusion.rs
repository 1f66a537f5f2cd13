use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};
use crate::math::tensor::Tensor;

/// Blend coefficient between base and side features, always in `[0, 1]`.
///
/// Fixed at model construction. A learnable alpha would become a `Param`
/// owned by the classifier with gradient `sum(grad * (base - side))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Alpha(f64);

impl Alpha {
    pub const HALF: Alpha = Alpha(0.5);

    pub fn new(value: f64) -> Result<Alpha> {
        if !(0.0..=1.0).contains(&value) {
            return Err(SideTuneError::InvalidConfig(format!("alpha {} not in [0, 1]", value)));
        }
        Ok(Alpha(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for Alpha {
    fn default() -> Self {
        Alpha::HALF
    }
}

impl TryFrom<f64> for Alpha {
    type Error = SideTuneError;

    fn try_from(value: f64) -> Result<Alpha> {
        Alpha::new(value)
    }
}

impl From<Alpha> for f64 {
    fn from(alpha: Alpha) -> f64 {
        alpha.0
    }
}

/// `alpha * base + (1 - alpha) * side`, element-wise.
///
/// Both operands must have exactly the same shape; anything else is a fatal
/// pairing error between the two branches.
pub fn merge(alpha: Alpha, base: &Tensor, side: &Tensor) -> Result<Tensor> {
    base.check_same_shape(side, "fusion")?;
    let a = alpha.value();
    base.zip_with(side, |b, s| a * b + (1.0 - a) * s)
}

/// Gradient of the fused output with respect to the side operand.
///
/// The base operand is frozen, so no gradient is produced for it.
pub fn merge_side_grad(alpha: Alpha, grad_fused: &Tensor) -> Tensor {
    grad_fused.scale(1.0 - alpha.value())
}
