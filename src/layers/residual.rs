use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::activation_layer::ActivationLayer;
use crate::layers::module::{Module, Param};
use crate::layers::sequential::Sequential;
use crate::math::tensor::Tensor;

/// What gets added back onto the main path's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Shortcut {
    /// Plain feed-forward block, nothing is added.
    None,
    Identity,
    /// Strided 1x1 conv + norm used when the main path changes shape.
    Projection(Sequential),
}

/// `post(main(x) + shortcut(x))`.
///
/// ResNet blocks use a projection or identity shortcut with a ReLU after the
/// sum; MobileNet-v2 inverted residuals use an identity shortcut only when
/// the stride is 1 and the width is unchanged, and no post activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidualBlock {
    pub main: Sequential,
    pub shortcut: Shortcut,
    pub post: Option<ActivationLayer>,
}

impl ResidualBlock {
    pub fn new(main: Sequential, shortcut: Shortcut, post: Option<ActivationLayer>) -> ResidualBlock {
        ResidualBlock { main, shortcut, post }
    }
}

impl Module for ResidualBlock {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        let main = self.main.infer(input)?;
        let summed = match &self.shortcut {
            Shortcut::None => main,
            Shortcut::Identity => main.zip_with(input, |a, b| a + b)?,
            Shortcut::Projection(proj) => main.zip_with(&proj.infer(input)?, |a, b| a + b)?,
        };
        match &self.post {
            Some(act) => act.infer(&summed),
            None => Ok(summed),
        }
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let main = self.main.forward(input)?;
        let summed = match &mut self.shortcut {
            Shortcut::None => main,
            Shortcut::Identity => main.zip_with(input, |a, b| a + b)?,
            Shortcut::Projection(proj) => main.zip_with(&proj.forward(input)?, |a, b| a + b)?,
        };
        match &mut self.post {
            Some(act) => act.forward(&summed),
            None => Ok(summed),
        }
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let grad = match &mut self.post {
            Some(act) => act.backward(grad_output)?,
            None => grad_output.clone(),
        };
        let grad_main = self.main.backward(&grad)?;
        match &mut self.shortcut {
            Shortcut::None => Ok(grad_main),
            Shortcut::Identity => grad_main.zip_with(&grad, |a, b| a + b),
            Shortcut::Projection(proj) => grad_main.zip_with(&proj.backward(&grad)?, |a, b| a + b),
        }
    }

    fn params(&self) -> Vec<&Param> {
        let mut params = self.main.params();
        if let Shortcut::Projection(proj) = &self.shortcut {
            params.extend(proj.params());
        }
        params
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.main.params_mut();
        if let Shortcut::Projection(proj) = &mut self.shortcut {
            params.extend(proj.params_mut());
        }
        params
    }
}
