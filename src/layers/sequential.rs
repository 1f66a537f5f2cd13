use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::activation_layer::ActivationLayer;
use crate::layers::batch_norm::BatchNorm2d;
use crate::layers::conv::Conv2d;
use crate::layers::dense::Linear;
use crate::layers::dropout::Dropout;
use crate::layers::module::{Module, Param};
use crate::layers::pool::{GlobalAvgPool, GlobalMaxPool, MaxPool2d};
use crate::layers::residual::ResidualBlock;
use crate::math::tensor::Tensor;

/// Every layer kind a network can be assembled from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Layer {
    Linear(Linear),
    Conv2d(Conv2d),
    BatchNorm2d(BatchNorm2d),
    Activation(ActivationLayer),
    MaxPool2d(MaxPool2d),
    GlobalAvgPool(GlobalAvgPool),
    GlobalMaxPool(GlobalMaxPool),
    Dropout(Dropout),
    Residual(Box<ResidualBlock>),
}

macro_rules! dispatch {
    ($self:expr, $layer:ident => $body:expr) => {
        match $self {
            Layer::Linear($layer) => $body,
            Layer::Conv2d($layer) => $body,
            Layer::BatchNorm2d($layer) => $body,
            Layer::Activation($layer) => $body,
            Layer::MaxPool2d($layer) => $body,
            Layer::GlobalAvgPool($layer) => $body,
            Layer::GlobalMaxPool($layer) => $body,
            Layer::Dropout($layer) => $body,
            Layer::Residual($layer) => $body,
        }
    };
}

impl Module for Layer {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        dispatch!(self, l => l.infer(input))
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        dispatch!(self, l => l.forward(input))
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        dispatch!(self, l => l.backward(grad_output))
    }

    fn params(&self) -> Vec<&Param> {
        dispatch!(self, l => l.params())
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        dispatch!(self, l => l.params_mut())
    }
}

macro_rules! impl_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(impl From<$ty> for Layer {
            fn from(layer: $ty) -> Layer {
                Layer::$variant(layer)
            }
        })*
    };
}

impl_from!(
    Linear => Linear,
    Conv2d => Conv2d,
    BatchNorm2d => BatchNorm2d,
    Activation => ActivationLayer,
    MaxPool2d => MaxPool2d,
    GlobalAvgPool => GlobalAvgPool,
    GlobalMaxPool => GlobalMaxPool,
    Dropout => Dropout,
);

impl From<ResidualBlock> for Layer {
    fn from(block: ResidualBlock) -> Layer {
        Layer::Residual(Box::new(block))
    }
}

/// Layers applied in order; backward runs them in reverse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sequential {
    pub layers: Vec<Layer>,
}

impl Sequential {
    pub fn new() -> Sequential {
        Sequential::default()
    }

    pub fn with(mut self, layer: impl Into<Layer>) -> Sequential {
        self.layers.push(layer.into());
        self
    }

    pub fn push(&mut self, layer: impl Into<Layer>) {
        self.layers.push(layer.into());
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The last fully connected layer, if any.
    pub fn last_linear_mut(&mut self) -> Option<&mut Linear> {
        self.layers.iter_mut().rev().find_map(|layer| match layer {
            Layer::Linear(linear) => Some(linear),
            _ => None,
        })
    }
}

impl Module for Sequential {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        let mut current = input.clone();
        for layer in &self.layers {
            current = layer.infer(&current)?;
        }
        Ok(current)
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut current = input.clone();
        for layer in &mut self.layers {
            current = layer.forward(&current)?;
        }
        Ok(current)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let mut grad = grad_output.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad)?;
        }
        Ok(grad)
    }

    fn params(&self) -> Vec<&Param> {
        self.layers.iter().flat_map(|l| l.params()).collect()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        self.layers.iter_mut().flat_map(|l| l.params_mut()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::conv::ConvConfig;
    use crate::layers::gradcheck::check_module;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn conv_bn_stack(rng: &mut StdRng) -> Sequential {
        Sequential::new()
            .with(Conv2d::new(ConvConfig::new(2, 3, 3).padding(1), rng).unwrap())
            .with(BatchNorm2d::new(3))
            .with(GlobalAvgPool::new())
            .with(Linear::new(3, 2, rng))
    }

    #[test]
    fn collects_params_in_order() {
        let mut rng = StdRng::seed_from_u64(0);
        let seq = conv_bn_stack(&mut rng);
        // conv weight + bias, bn gamma + beta, linear weight + bias
        assert_eq!(seq.params().len(), 6);
        assert_eq!(seq.param_count(), 2 * 3 * 9 + 3 + 3 + 3 + 6 + 2);
    }

    #[test]
    fn stack_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut seq = conv_bn_stack(&mut rng);
        let input = Tensor::uniform(&[2, 4, 4], 1.0, &mut rng);
        check_module(&mut seq, &input);
    }

    #[test]
    fn serde_round_trip_preserves_outputs() {
        let mut rng = StdRng::seed_from_u64(9);
        let seq = conv_bn_stack(&mut rng);
        let json = serde_json::to_string(&seq).unwrap();
        let restored: Sequential = serde_json::from_str(&json).unwrap();
        let input = Tensor::uniform(&[2, 4, 4], 1.0, &mut rng);
        let (a, b) = (seq.infer(&input).unwrap(), restored.infer(&input).unwrap());
        for (x, y) in a.data().iter().zip(b.data()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }
}
