use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};
use crate::layers::module::Module;
use crate::math::tensor::Tensor;

/// Inverted dropout: active in `forward`, identity in `infer`.
///
/// Each layer owns a generator seeded from the model's construction RNG, so a
/// run is reproducible from its single seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dropout {
    pub p: f64,
    seed: u64,
    #[serde(skip)]
    rng: Option<StdRng>,
    #[serde(skip)]
    mask: Option<Tensor>,
}

impl Dropout {
    pub fn new<R: Rng + ?Sized>(p: f64, rng: &mut R) -> Result<Dropout> {
        if !(0.0..1.0).contains(&p) {
            return Err(SideTuneError::InvalidConfig(format!("dropout probability {} not in [0, 1)", p)));
        }
        Ok(Dropout { p, seed: rng.gen(), rng: None, mask: None })
    }
}

impl Module for Dropout {
    fn infer(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.clone())
    }

    fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let keep = 1.0 - self.p;
        let seed = self.seed;
        let rng = self.rng.get_or_insert_with(|| StdRng::seed_from_u64(seed));
        let mut mask = Tensor::zeros(input.shape());
        for m in mask.data_mut() {
            *m = if rng.gen::<f64>() < keep { 1.0 / keep } else { 0.0 };
        }
        let out = input.zip_with(&mask, |x, m| x * m)?;
        self.mask = Some(mask);
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let mask = self.mask.take().ok_or(SideTuneError::MissingForward("dropout"))?;
        grad_output.zip_with(&mask, |g, m| g * m)
    }
}
