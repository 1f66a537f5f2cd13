use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};
use crate::layers::Param;
use crate::math::tensor::Tensor;
use crate::optim::optimizer::Optimizer;

/// Stochastic gradient descent with heavy-ball momentum and L2 weight decay.
///
/// Per parameter: `g = grad + weight_decay * p`, `v = momentum * v + g`
/// (with `v = g` on the first step), `p -= lr * v`.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    velocities: Vec<Option<Tensor>>,
}

/// Serializable hyper-parameters of [`Sgd`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SgdConfig {
    pub learning_rate: f64,
    #[serde(default)]
    pub momentum: f64,
    #[serde(default)]
    pub weight_decay: f64,
}

impl Default for SgdConfig {
    fn default() -> Self {
        SgdConfig { learning_rate: 0.1, momentum: 0.9, weight_decay: 0.0 }
    }
}

impl SgdConfig {
    pub fn build(&self) -> Result<Sgd> {
        Sgd::with_momentum(self.learning_rate, self.momentum, self.weight_decay)
    }
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate, momentum: 0.0, weight_decay: 0.0, velocities: Vec::new() }
    }

    pub fn with_momentum(learning_rate: f64, momentum: f64, weight_decay: f64) -> Result<Sgd> {
        if !(learning_rate >= 0.0) || !(0.0..1.0).contains(&momentum) || !(weight_decay >= 0.0) {
            return Err(SideTuneError::InvalidConfig(format!(
                "sgd needs lr >= 0, momentum in [0, 1), weight_decay >= 0 (got {}, {}, {})",
                learning_rate, momentum, weight_decay
            )));
        }
        Ok(Sgd { learning_rate, momentum, weight_decay, velocities: Vec::new() })
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut Param]) {
        if self.velocities.len() < params.len() {
            self.velocities.resize(params.len(), None);
        }
        for (param, slot) in params.iter_mut().zip(self.velocities.iter_mut()) {
            // A parameter that took no part in the last backward has no gradient yet.
            if param.grad.shape() != param.value.shape() {
                continue;
            }
            let wd = self.weight_decay;
            let mut update: Vec<f64> =
                param.grad.data().iter().zip(param.value.data()).map(|(g, p)| g + wd * p).collect();
            if self.momentum > 0.0 {
                match slot {
                    Some(v) if v.shape() == param.value.shape() => {
                        for (vi, u) in v.data_mut().iter_mut().zip(update.iter_mut()) {
                            *vi = self.momentum * *vi + *u;
                            *u = *vi;
                        }
                    }
                    _ => {
                        let mut v = Tensor::zeros(param.value.shape());
                        v.data_mut().copy_from_slice(&update);
                        *slot = Some(v);
                    }
                }
            }
            let lr = self.learning_rate;
            for (p, u) in param.value.data_mut().iter_mut().zip(update) {
                *p -= lr * u;
            }
        }
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn name(&self) -> &str {
        "sgd"
    }
}
