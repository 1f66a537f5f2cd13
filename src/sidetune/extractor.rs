use serde::{Deserialize, Serialize};

use crate::backbone::{Backbone, BackboneFamily};
use crate::error::Result;
use crate::layers::Param;
use crate::math::tensor::Tensor;

/// Read-only view of a pretrained backbone.
///
/// Only `&self` access to the wrapped network is ever handed out, so nothing
/// downstream can run a training forward pass through it or touch its
/// weights. Its parameters are never offered to an optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureExtractor {
    backbone: Backbone,
}

impl FeatureExtractor {
    pub fn new(backbone: Backbone) -> FeatureExtractor {
        FeatureExtractor { backbone }
    }

    /// Final feature map for one input, always in evaluation mode.
    pub fn features(&self, input: &Tensor) -> Result<Tensor> {
        self.backbone.features(input)
    }

    pub fn backbone(&self) -> &Backbone {
        &self.backbone
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

    pub fn params(&self) -> Vec<&Param> {
        self.backbone.feature_params().into_iter().chain(self.backbone.head_params()).collect()
    }

    pub fn param_count(&self) -> usize {
        self.params().iter().map(|p| p.numel()).sum()
    }
}
