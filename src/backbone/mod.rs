//! Pretrained feature extractors.
//!
//! A [`Backbone`] is a list of named stages (stem first) that together
//! produce the final feature map, followed by the original classification
//! head. Global pooling sits between the two and belongs to whoever consumes
//! the features, so side-tuned models can fuse before or after it.

pub mod mobilenet;
pub mod resnet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};
use crate::layers::{Linear, Module, Param, Sequential};
use crate::math::tensor::Tensor;

pub use mobilenet::{InvertedResidualSetting, MobileNetV2Config};
pub use resnet::{BlockKind, ResNetConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackboneFamily {
    #[serde(rename = "resnet")]
    ResNet,
    #[serde(rename = "mobilenet_v2")]
    MobileNetV2,
}

/// One named piece of the feature pipeline, e.g. `stem` or `layer3`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub layers: Sequential,
}

impl Stage {
    pub fn new(name: impl Into<String>, layers: Sequential) -> Stage {
        Stage { name: name.into(), layers }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backbone {
    pub name: String,
    pub family: BackboneFamily,
    pub stages: Vec<Stage>,
    /// The original classifier; its last `Linear` is what gets retargeted.
    pub head: Sequential,
    /// Channels of the final feature map.
    pub feature_channels: usize,
}

impl Backbone {
    /// Runs stem and stages without tracking gradients.
    pub fn features(&self, input: &Tensor) -> Result<Tensor> {
        let mut current = input.clone();
        for stage in &self.stages {
            current = stage.layers.infer(&current)?;
        }
        Ok(current)
    }

    pub fn features_train(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut current = input.clone();
        for stage in &mut self.stages {
            current = stage.layers.forward(&current)?;
        }
        Ok(current)
    }

    pub fn backward_features(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let mut grad = grad_output.clone();
        for stage in self.stages.iter_mut().rev() {
            grad = stage.layers.backward(&grad)?;
        }
        Ok(grad)
    }

    /// Applies the head to an already pooled feature vector.
    pub fn classify(&self, pooled: &Tensor) -> Result<Tensor> {
        self.head.infer(pooled)
    }

    pub fn classify_train(&mut self, pooled: &Tensor) -> Result<Tensor> {
        self.head.forward(pooled)
    }

    pub fn backward_head(&mut self, grad_logits: &Tensor) -> Result<Tensor> {
        self.head.backward(grad_logits)
    }

    /// Swaps the head's final linear layer for a freshly initialised one
    /// with `num_classes` outputs.
    pub fn replace_head<R: Rng + ?Sized>(&mut self, num_classes: usize, rng: &mut R) -> Result<()> {
        if num_classes == 0 {
            return Err(SideTuneError::InvalidConfig("num_classes must be at least 1".into()));
        }
        let last = self.head.last_linear_mut().ok_or_else(|| {
            SideTuneError::InvalidConfig(format!("{} head has no linear layer to replace", self.name))
        })?;
        *last = Linear::new(last.in_features, num_classes, rng);
        Ok(())
    }

    pub fn num_outputs(&self) -> Option<usize> {
        self.head.layers.iter().rev().find_map(|layer| match layer {
            crate::layers::Layer::Linear(linear) => Some(linear.out_features),
            _ => None,
        })
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn feature_params(&self) -> Vec<&Param> {
        self.stages.iter().flat_map(|s| s.layers.params()).collect()
    }

    pub fn feature_params_mut(&mut self) -> Vec<&mut Param> {
        self.stages.iter_mut().flat_map(|s| s.layers.params_mut()).collect()
    }

    pub fn head_params(&self) -> Vec<&Param> {
        self.head.params()
    }

    pub fn head_params_mut(&mut self) -> Vec<&mut Param> {
        self.head.params_mut()
    }

    pub fn param_count(&self) -> usize {
        self.feature_params().iter().chain(self.head_params().iter()).map(|p| p.numel()).sum()
    }

    /// Serializes the backbone weights to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Loads backbone weights previously written by `save_json`; this is
    /// how pretrained weights enter the system.
    pub fn load_json(path: &str) -> Result<Backbone> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
