use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backbone::{Backbone, BackboneFamily};
use crate::error::Result;
use crate::layers::{Module, Param};
use crate::math::tensor::Tensor;

/// Which part of the side copy receives gradient updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunePolicy {
    /// Every feature stage plus the new head.
    #[default]
    Full,
    /// Only the new head; the side's feature stages stay at their initial values.
    HeadOnly,
}

/// Trainable copy of a backbone whose head has been retargeted to the task's
/// class count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideNetwork {
    backbone: Backbone,
    policy: TunePolicy,
    num_classes: usize,
}

impl SideNetwork {
    pub fn new<R: Rng + ?Sized>(
        mut backbone: Backbone,
        num_classes: usize,
        policy: TunePolicy,
        rng: &mut R,
    ) -> Result<SideNetwork> {
        backbone.replace_head(num_classes, rng)?;
        Ok(SideNetwork { backbone, policy, num_classes })
    }

    pub fn policy(&self) -> TunePolicy {
        self.policy
    }

    pub fn family(&self) -> BackboneFamily {
        self.backbone.family
    }

    pub fn feature_channels(&self) -> usize {
        self.backbone.feature_channels
    }

    pub fn name(&self) -> &str {
        &self.backbone.name
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn features(&self, input: &Tensor) -> Result<Tensor> {
        self.backbone.features(input)
    }

    /// Training-mode feature pass. Under `HeadOnly` the stages run without
    /// caching since no gradient will flow back into them.
    pub fn features_train(&mut self, input: &Tensor) -> Result<Tensor> {
        match self.policy {
            TunePolicy::Full => self.backbone.features_train(input),
            TunePolicy::HeadOnly => self.backbone.features(input),
        }
    }

    pub fn backward_features(&mut self, grad: &Tensor) -> Result<()> {
        match self.policy {
            TunePolicy::Full => self.backbone.backward_features(grad).map(|_| ()),
            TunePolicy::HeadOnly => Ok(()),
        }
    }

    pub fn classify(&self, pooled: &Tensor) -> Result<Tensor> {
        self.backbone.classify(pooled)
    }

    pub fn classify_train(&mut self, pooled: &Tensor) -> Result<Tensor> {
        self.backbone.classify_train(pooled)
    }

    /// Returns the gradient with respect to the pooled features.
    pub fn backward_head(&mut self, grad_logits: &Tensor) -> Result<Tensor> {
        self.backbone.backward_head(grad_logits)
    }

    pub fn trainable_params(&self) -> Vec<&Param> {
        match self.policy {
            TunePolicy::Full => self.backbone.feature_params().into_iter().chain(self.backbone.head_params()).collect(),
            TunePolicy::HeadOnly => self.backbone.head_params(),
        }
    }

    pub fn trainable_params_mut(&mut self) -> Vec<&mut Param> {
        match self.policy {
            TunePolicy::Full => {
                let Backbone { stages, head, .. } = &mut self.backbone;
                let mut params: Vec<&mut Param> = stages.iter_mut().flat_map(|s| s.layers.params_mut()).collect();
                params.extend(head.params_mut());
                params
            }
            TunePolicy::HeadOnly => self.backbone.head_params_mut(),
        }
    }

    pub fn frozen_params(&self) -> Vec<&Param> {
        match self.policy {
            TunePolicy::Full => Vec::new(),
            TunePolicy::HeadOnly => self.backbone.feature_params(),
        }
    }
}
