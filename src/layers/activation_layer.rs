use serde::{Deserialize, Serialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Result, SideTuneError};
use crate::layers::module::Module;
use crate::math::tensor::Tensor;

/// Applies an `ActivationFunction` element-wise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationLayer {
    pub function: ActivationFunction,
    /// Pre-activation values, needed for the derivative.
    #[serde(skip)]
    input: Option<Tensor>,
}

impl ActivationLayer {
    pub fn new(function: ActivationFunction) -> ActivationLayer {
        ActivationLayer { function, input: None }
    }

    pub fn relu() -> ActivationLayer {
        ActivationLayer::new(ActivationFunction::ReLU)
    }

    pub fn relu6() -> ActivationLayer {
        ActivationLayer::new(ActivationFunction::ReLU6)
    }
}

impl Module for ActivationLayer {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        let f = self.function;
        Ok(input.map(|x| f.function(x)))
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let out = self.infer(input)?;
        self.input = Some(input.clone());
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input.take().ok_or(SideTuneError::MissingForward("activation"))?;
        let f = self.function;
        grad_output.zip_with(&input, |g, z| g * f.derivative(z))
    }
}
