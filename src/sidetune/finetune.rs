use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backbone::Backbone;
use crate::data::Input;
use crate::error::Result;
use crate::layers::{GlobalAvgPool, Module, Param};
use crate::math::tensor::Tensor;
use crate::sidetune::classifier::Classifier;
use crate::sidetune::side::{SideNetwork, TunePolicy};

/// Plain fine-tuning baseline: one backbone, retargeted head, no frozen branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FineTune {
    name: String,
    network: SideNetwork,
    #[serde(skip)]
    pool: GlobalAvgPool,
}

impl FineTune {
    pub fn new<R: Rng + ?Sized>(backbone: Backbone, num_classes: usize, policy: TunePolicy, rng: &mut R) -> Result<FineTune> {
        let name = format!("{}_finetune", backbone.name);
        Ok(FineTune { name, network: SideNetwork::new(backbone, num_classes, policy, rng)?, pool: GlobalAvgPool::new() })
    }
}

impl Classifier for FineTune {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_classes(&self) -> usize {
        self.network.num_classes()
    }

    fn predict(&self, input: &Input) -> Result<Tensor> {
        let features = self.network.features(input.expect_image()?)?;
        self.network.classify(&self.pool.infer(&features)?)
    }

    fn forward(&mut self, input: &Input) -> Result<Tensor> {
        let features = self.network.features_train(input.expect_image()?)?;
        let pooled = self.pool.forward(&features)?;
        self.network.classify_train(&pooled)
    }

    fn backward(&mut self, grad_logits: &Tensor) -> Result<()> {
        let grad = self.network.backward_head(grad_logits)?;
        let grad = self.pool.backward(&grad)?;
        self.network.backward_features(&grad)
    }

    fn trainable_params(&self) -> Vec<&Param> {
        self.network.trainable_params()
    }

    fn trainable_params_mut(&mut self) -> Vec<&mut Param> {
        self.network.trainable_params_mut()
    }

    fn frozen_params(&self) -> Vec<&Param> {
        self.network.frozen_params()
    }
}
