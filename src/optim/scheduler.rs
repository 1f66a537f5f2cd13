use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};

/// Learning-rate schedule advanced once per epoch.
pub trait LrScheduler {
    /// Learning rate for the current epoch.
    fn get_lr(&self) -> f64;

    fn step(&mut self);
}

/// `lr = base_lr * (1 - epoch / num_epochs)^power`, clamped at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyDecayLr {
    pub base_lr: f64,
    pub num_epochs: usize,
    pub power: f64,
    epoch: usize,
}

impl PolyDecayLr {
    /// Square-root decay (`power = 0.5`).
    pub fn new(base_lr: f64, num_epochs: usize) -> Result<PolyDecayLr> {
        PolyDecayLr::with_power(base_lr, num_epochs, 0.5)
    }

    pub fn with_power(base_lr: f64, num_epochs: usize, power: f64) -> Result<PolyDecayLr> {
        if num_epochs == 0 || !(power > 0.0) || !(base_lr >= 0.0) {
            return Err(SideTuneError::InvalidConfig(format!(
                "poly decay needs num_epochs > 0, power > 0, base_lr >= 0 (got {}, {}, {})",
                num_epochs, power, base_lr
            )));
        }
        Ok(PolyDecayLr { base_lr, num_epochs, power, epoch: 0 })
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn factor(&self, epoch: usize) -> f64 {
        let remaining = 1.0 - epoch as f64 / self.num_epochs as f64;
        remaining.max(0.0).powf(self.power)
    }
}

impl LrScheduler for PolyDecayLr {
    fn get_lr(&self) -> f64 {
        self.base_lr * self.factor(self.epoch)
    }

    fn step(&mut self) {
        self.epoch += 1;
    }
}
