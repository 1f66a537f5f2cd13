use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backbone::{Backbone, BackboneFamily, Stage};
use crate::error::{Result, SideTuneError};
use crate::layers::{
    ActivationLayer, BatchNorm2d, Conv2d, ConvConfig, Linear, MaxPool2d, ResidualBlock, Sequential, Shortcut,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Two 3x3 convolutions (ResNet-18/34).
    Basic,
    /// 1x1 reduce, 3x3, 1x1 expand by 4 (ResNet-50 and deeper).
    Bottleneck,
}

impl BlockKind {
    pub fn expansion(&self) -> usize {
        match self {
            BlockKind::Basic => 1,
            BlockKind::Bottleneck => 4,
        }
    }
}

/// Residual network topology.
///
/// Stage `i` has `base_width * 2^i` planes and, except for the first, starts
/// with a stride-2 block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResNetConfig {
    pub name: String,
    pub block: BlockKind,
    pub layers: Vec<usize>,
    pub base_width: usize,
    pub in_channels: usize,
    pub num_classes: usize,
}

impl ResNetConfig {
    pub fn resnet18() -> ResNetConfig {
        ResNetConfig {
            name: "resnet18".into(),
            block: BlockKind::Basic,
            layers: vec![2, 2, 2, 2],
            base_width: 64,
            in_channels: 3,
            num_classes: 1000,
        }
    }

    pub fn resnet50() -> ResNetConfig {
        ResNetConfig {
            name: "resnet50".into(),
            block: BlockKind::Bottleneck,
            layers: vec![3, 4, 6, 3],
            base_width: 64,
            in_channels: 3,
            num_classes: 1000,
        }
    }

    /// Two-stage basic-block network small enough for unit tests.
    pub fn tiny() -> ResNetConfig {
        ResNetConfig {
            name: "resnet_tiny".into(),
            block: BlockKind::Basic,
            layers: vec![1, 1],
            base_width: 4,
            in_channels: 3,
            num_classes: 10,
        }
    }

    pub fn feature_channels(&self) -> usize {
        let last_stage = self.layers.len().saturating_sub(1) as u32;
        self.base_width * 2usize.pow(last_stage) * self.block.expansion()
    }

    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Backbone> {
        if self.layers.is_empty() || self.layers.contains(&0) || self.base_width == 0 {
            return Err(SideTuneError::InvalidConfig(format!(
                "{}: every stage needs at least one block and a positive width",
                self.name
            )));
        }

        let stem = Sequential::new()
            .with(Conv2d::new(
                ConvConfig::new(self.in_channels, self.base_width, 7).stride(2).padding(3).no_bias(),
                rng,
            )?)
            .with(BatchNorm2d::new(self.base_width))
            .with(ActivationLayer::relu())
            .with(MaxPool2d::new(3, 2, 1));
        let mut stages = vec![Stage::new("stem", stem)];

        let expansion = self.block.expansion();
        let mut in_planes = self.base_width;
        for (i, &blocks) in self.layers.iter().enumerate() {
            let planes = self.base_width << i;
            let mut stage = Sequential::new();
            for b in 0..blocks {
                let stride = if i > 0 && b == 0 { 2 } else { 1 };
                stage.push(self.residual_block(in_planes, planes, stride, rng)?);
                in_planes = planes * expansion;
            }
            stages.push(Stage::new(format!("layer{}", i + 1), stage));
        }

        let head = Sequential::new().with(Linear::new(in_planes, self.num_classes, rng));
        Ok(Backbone {
            name: self.name.clone(),
            family: BackboneFamily::ResNet,
            stages,
            head,
            feature_channels: in_planes,
        })
    }

    fn residual_block<R: Rng + ?Sized>(&self, in_planes: usize, planes: usize, stride: usize, rng: &mut R) -> Result<ResidualBlock> {
        let out_planes = planes * self.block.expansion();
        let main = match self.block {
            BlockKind::Basic => Sequential::new()
                .with(Conv2d::new(ConvConfig::new(in_planes, planes, 3).stride(stride).padding(1).no_bias(), rng)?)
                .with(BatchNorm2d::new(planes))
                .with(ActivationLayer::relu())
                .with(Conv2d::new(ConvConfig::new(planes, planes, 3).padding(1).no_bias(), rng)?)
                .with(BatchNorm2d::new(planes)),
            BlockKind::Bottleneck => Sequential::new()
                .with(Conv2d::new(ConvConfig::new(in_planes, planes, 1).no_bias(), rng)?)
                .with(BatchNorm2d::new(planes))
                .with(ActivationLayer::relu())
                .with(Conv2d::new(ConvConfig::new(planes, planes, 3).stride(stride).padding(1).no_bias(), rng)?)
                .with(BatchNorm2d::new(planes))
                .with(ActivationLayer::relu())
                .with(Conv2d::new(ConvConfig::new(planes, out_planes, 1).no_bias(), rng)?)
                .with(BatchNorm2d::new(out_planes)),
        };
        let shortcut = if stride != 1 || in_planes != out_planes {
            Shortcut::Projection(
                Sequential::new()
                    .with(Conv2d::new(ConvConfig::new(in_planes, out_planes, 1).stride(stride).no_bias(), rng)?)
                    .with(BatchNorm2d::new(out_planes)),
            )
        } else {
            Shortcut::Identity
        };
        Ok(ResidualBlock::new(main, shortcut, Some(ActivationLayer::relu())))
    }
}
