use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backbone::{Backbone, BackboneFamily, Stage};
use crate::error::{Result, SideTuneError};
use crate::layers::{ActivationLayer, BatchNorm2d, Conv2d, ConvConfig, Dropout, Linear, ResidualBlock, Sequential, Shortcut};

/// One row of the MobileNet-v2 table: `repeats` inverted residual blocks
/// with expansion `t`, `channels` outputs, the first one strided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvertedResidualSetting {
    pub expand_ratio: usize,
    pub channels: usize,
    pub repeats: usize,
    pub stride: usize,
}

impl InvertedResidualSetting {
    pub const fn new(expand_ratio: usize, channels: usize, repeats: usize, stride: usize) -> Self {
        InvertedResidualSetting { expand_ratio, channels, repeats, stride }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileNetV2Config {
    pub name: String,
    pub in_channels: usize,
    pub stem_channels: usize,
    pub settings: Vec<InvertedResidualSetting>,
    pub last_channel: usize,
    pub dropout: f64,
    pub num_classes: usize,
}

impl MobileNetV2Config {
    /// The torchvision `mobilenet_v2` layout (width multiplier 1.0).
    pub fn standard() -> MobileNetV2Config {
        MobileNetV2Config {
            name: "mobilenet_v2".into(),
            in_channels: 3,
            stem_channels: 32,
            settings: vec![
                InvertedResidualSetting::new(1, 16, 1, 1),
                InvertedResidualSetting::new(6, 24, 2, 2),
                InvertedResidualSetting::new(6, 32, 3, 2),
                InvertedResidualSetting::new(6, 64, 4, 2),
                InvertedResidualSetting::new(6, 96, 3, 1),
                InvertedResidualSetting::new(6, 160, 3, 2),
                InvertedResidualSetting::new(6, 320, 1, 1),
            ],
            last_channel: 1280,
            dropout: 0.2,
            num_classes: 1000,
        }
    }

    pub fn tiny() -> MobileNetV2Config {
        MobileNetV2Config {
            name: "mobilenet_v2_tiny".into(),
            in_channels: 3,
            stem_channels: 4,
            settings: vec![
                InvertedResidualSetting::new(1, 4, 1, 1),
                InvertedResidualSetting::new(2, 6, 2, 2),
            ],
            last_channel: 8,
            dropout: 0.2,
            num_classes: 10,
        }
    }

    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Backbone> {
        if self.settings.iter().any(|s| s.expand_ratio == 0 || s.repeats == 0 || s.stride == 0) {
            return Err(SideTuneError::InvalidConfig(format!(
                "{}: inverted residual settings must be positive",
                self.name
            )));
        }

        let stem = conv_bn_act(self.in_channels, self.stem_channels, 3, 2, 1, rng)?;
        let mut stages = vec![Stage::new("stem", stem)];

        let mut in_channels = self.stem_channels;
        for (i, setting) in self.settings.iter().enumerate() {
            let mut stage = Sequential::new();
            for r in 0..setting.repeats {
                let stride = if r == 0 { setting.stride } else { 1 };
                stage.push(inverted_residual(in_channels, setting.channels, stride, setting.expand_ratio, rng)?);
                in_channels = setting.channels;
            }
            stages.push(Stage::new(format!("block{}", i + 1), stage));
        }
        stages.push(Stage::new("last", conv_bn_act(in_channels, self.last_channel, 1, 1, 1, rng)?));

        let head = Sequential::new()
            .with(Dropout::new(self.dropout, rng)?)
            .with(Linear::new(self.last_channel, self.num_classes, rng));

        Ok(Backbone {
            name: self.name.clone(),
            family: BackboneFamily::MobileNetV2,
            stages,
            head,
            feature_channels: self.last_channel,
        })
    }
}

/// Conv -> BN -> ReLU6 with "same" padding; `groups > 1` makes it depthwise.
fn conv_bn_act<R: Rng + ?Sized>(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    groups: usize,
    rng: &mut R,
) -> Result<Sequential> {
    let cfg = ConvConfig::new(in_channels, out_channels, kernel)
        .stride(stride)
        .padding((kernel - 1) / 2)
        .groups(groups)
        .no_bias();
    Ok(Sequential::new()
        .with(Conv2d::new(cfg, rng)?)
        .with(BatchNorm2d::new(out_channels))
        .with(ActivationLayer::relu6()))
}

fn inverted_residual<R: Rng + ?Sized>(
    in_channels: usize,
    out_channels: usize,
    stride: usize,
    expand_ratio: usize,
    rng: &mut R,
) -> Result<ResidualBlock> {
    let hidden = in_channels * expand_ratio;
    let mut main = Sequential::new();
    if expand_ratio != 1 {
        main.layers.extend(conv_bn_act(in_channels, hidden, 1, 1, 1, rng)?.layers);
    }
    main.layers.extend(conv_bn_act(hidden, hidden, 3, stride, hidden, rng)?.layers);
    main.push(Conv2d::new(ConvConfig::new(hidden, out_channels, 1).no_bias(), rng)?);
    main.push(BatchNorm2d::new(out_channels));

    let shortcut = if stride == 1 && in_channels == out_channels {
        Shortcut::Identity
    } else {
        Shortcut::None
    };
    Ok(ResidualBlock::new(main, shortcut, None))
}
