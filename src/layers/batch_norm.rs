use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};
use crate::layers::module::{Module, Param};
use crate::math::tensor::Tensor;

/// Per-channel batch normalization using the stored running statistics.
///
/// Samples flow through the network one at a time, so normalization always
/// uses `running_mean` / `running_var`; only the affine `gamma` and `beta`
/// are learnable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm2d {
    pub channels: usize,
    pub gamma: Param,
    pub beta: Param,
    pub running_mean: Vec<f64>,
    pub running_var: Vec<f64>,
    pub eps: f64,
    #[serde(skip)]
    normalized: Option<Tensor>,
}

impl BatchNorm2d {
    pub fn new(channels: usize) -> BatchNorm2d {
        BatchNorm2d {
            channels,
            gamma: Param::new(Tensor::full(&[channels], 1.0)),
            beta: Param::new(Tensor::zeros(&[channels])),
            running_mean: vec![0.0; channels],
            running_var: vec![1.0; channels],
            eps: 1e-5,
            normalized: None,
        }
    }

    fn inv_std(&self, c: usize) -> f64 {
        1.0 / (self.running_var[c] + self.eps).sqrt()
    }

    /// Returns `(output, x_hat)`.
    fn apply(&self, input: &Tensor) -> Result<(Tensor, Tensor)> {
        let (c, h, w) = input.dims3()?;
        if c != self.channels {
            return Err(SideTuneError::shape("batch norm input", &[self.channels, h, w], input.shape()));
        }
        let plane = h * w;
        let gamma = self.gamma.value.data();
        let beta = self.beta.value.data();
        let mut x_hat = input.clone();
        let mut out = input.clone();
        for ch in 0..c {
            let inv = self.inv_std(ch);
            let range = ch * plane..(ch + 1) * plane;
            for (xh, y) in x_hat.data_mut()[range.clone()].iter_mut().zip(out.data_mut()[range].iter_mut()) {
                *xh = (*xh - self.running_mean[ch]) * inv;
                *y = gamma[ch] * *xh + beta[ch];
            }
        }
        Ok((out, x_hat))
    }
}

impl Module for BatchNorm2d {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        Ok(self.apply(input)?.0)
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let (out, x_hat) = self.apply(input)?;
        self.normalized = Some(x_hat);
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let x_hat = self.normalized.take().ok_or(SideTuneError::MissingForward("batch_norm"))?;
        x_hat.check_same_shape(grad_output, "batch norm gradient")?;
        let plane = x_hat.len() / self.channels.max(1);
        let go = grad_output.data();
        let xh = x_hat.data();

        let mut gamma_grad = vec![0.0; self.channels];
        let mut beta_grad = vec![0.0; self.channels];
        let mut grad_input = vec![0.0; go.len()];
        for ch in 0..self.channels {
            let scale = self.gamma.value.data()[ch] * self.inv_std(ch);
            for i in ch * plane..(ch + 1) * plane {
                gamma_grad[ch] += go[i] * xh[i];
                beta_grad[ch] += go[i];
                grad_input[i] = go[i] * scale;
            }
        }
        for (acc, d) in self.gamma.grad_mut().iter_mut().zip(gamma_grad) {
            *acc += d;
        }
        for (acc, d) in self.beta.grad_mut().iter_mut().zip(beta_grad) {
            *acc += d;
        }
        Tensor::from_vec(grad_output.shape(), grad_input)
    }

    fn params(&self) -> Vec<&Param> {
        vec![&self.gamma, &self.beta]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.gamma, &mut self.beta]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::gradcheck::check_module;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn normalizes_with_running_stats() {
        let mut bn = BatchNorm2d::new(2);
        bn.running_mean = vec![1.0, -1.0];
        bn.running_var = vec![4.0, 1.0];
        bn.eps = 0.0;
        bn.beta.value = Tensor::vector(&[0.5, 0.0]);
        let x = Tensor::from_vec(&[2, 1, 1], vec![3.0, 1.0]).unwrap();
        let y = bn.infer(&x).unwrap();
        assert_abs_diff_eq!(y.data()[0], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(y.data()[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut bn = BatchNorm2d::new(3);
        bn.running_mean = vec![0.2, -0.1, 0.4];
        bn.running_var = vec![0.5, 2.0, 1.5];
        bn.gamma.value = Tensor::vector(&[1.5, -0.5, 0.8]);
        let input = Tensor::uniform(&[3, 2, 2], 1.0, &mut rng);
        check_module(&mut bn, &input);
    }
}
