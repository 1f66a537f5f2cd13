use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};
use crate::layers::module::{Module, Param};
use crate::math::tensor::Tensor;

/// Fully connected layer `y = W x + b`.
///
/// Any input whose element count equals `in_features` is accepted and read
/// flattened, so pooled `(C, 1, 1)` feature maps feed straight in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    pub in_features: usize,
    pub out_features: usize,
    /// Shape `(out_features, in_features)`.
    pub weight: Param,
    pub bias: Param,
    #[serde(skip)]
    input: Option<Tensor>,
}

impl Linear {
    /// Uniform init in `[-1/sqrt(fan_in), 1/sqrt(fan_in)]` for weights and biases.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Linear {
        let bound = 1.0 / (in_features.max(1) as f64).sqrt();
        Linear {
            in_features,
            out_features,
            weight: Param::new(Tensor::uniform(&[out_features, in_features], bound, rng)),
            bias: Param::new(Tensor::uniform(&[out_features], bound, rng)),
            input: None,
        }
    }

    fn apply(&self, input: &Tensor) -> Result<Tensor> {
        if input.len() != self.in_features {
            return Err(SideTuneError::shape("linear input", &[self.in_features], input.shape()));
        }
        let x = input.data();
        let w = self.weight.value.data();
        let b = self.bias.value.data();
        let n = self.in_features;
        let out: Vec<f64> = (0..self.out_features)
            .map(|o| b[o] + w[o * n..(o + 1) * n].iter().zip(x).map(|(a, v)| a * v).sum::<f64>())
            .collect();
        Ok(Tensor::vector(&out))
    }
}

impl Module for Linear {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        self.apply(input)
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let out = self.apply(input)?;
        self.input = Some(input.clone());
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input.take().ok_or(SideTuneError::MissingForward("linear"))?;
        if grad_output.len() != self.out_features {
            return Err(SideTuneError::shape("linear gradient", &[self.out_features], grad_output.shape()));
        }
        let n = self.in_features;
        let g = grad_output.data();
        let x = input.data();

        let wg = self.weight.grad_mut();
        for (o, &go) in g.iter().enumerate() {
            for (i, &xi) in x.iter().enumerate() {
                wg[o * n + i] += go * xi;
            }
        }
        let bg = self.bias.grad_mut();
        for (o, &go) in g.iter().enumerate() {
            bg[o] += go;
        }

        let w = self.weight.value.data();
        let mut grad_input = vec![0.0; n];
        for (o, &go) in g.iter().enumerate() {
            for (i, gi) in grad_input.iter_mut().enumerate() {
                *gi += w[o * n + i] * go;
            }
        }
        Tensor::from_vec(input.shape(), grad_input)
    }

    fn params(&self) -> Vec<&Param> {
        vec![&self.weight, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weight, &mut self.bias]
    }
}
