use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::math::tensor::Tensor;

/// A learnable tensor together with its accumulated gradient.
///
/// The gradient is never serialised; a freshly loaded parameter starts with
/// an empty gradient that is resized on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub value: Tensor,
    #[serde(skip)]
    pub grad: Tensor,
}

impl Param {
    pub fn new(value: Tensor) -> Param {
        let grad = Tensor::zeros(value.shape());
        Param { value, grad }
    }

    /// Mutable gradient storage, sized to match `value`.
    pub fn grad_mut(&mut self) -> &mut [f64] {
        if self.grad.shape() != self.value.shape() {
            self.grad = Tensor::zeros(self.value.shape());
        }
        self.grad.data_mut()
    }

    pub fn zero_grad(&mut self) {
        if self.grad.shape() != self.value.shape() {
            self.grad = Tensor::zeros(self.value.shape());
        } else {
            self.grad.fill(0.0);
        }
    }

    pub fn numel(&self) -> usize {
        self.value.len()
    }
}

/// A differentiable building block operating on one sample at a time.
///
/// `infer` is the evaluation path: it takes `&self`, caches nothing and can
/// never contribute gradients. `forward` is the training path and stores
/// whatever `backward` needs; `backward` consumes that cache, accumulates
/// parameter gradients and returns the gradient with respect to the input.
pub trait Module {
    fn infer(&self, input: &Tensor) -> Result<Tensor>;

    fn forward(&mut self, input: &Tensor) -> Result<Tensor>;

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor>;

    fn params(&self) -> Vec<&Param> {
        Vec::new()
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        Vec::new()
    }

    fn param_count(&self) -> usize {
        self.params().iter().map(|p| p.numel()).sum()
    }
}
