use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backbone::{Backbone, BackboneFamily};
use crate::data::Input;
use crate::error::{Result, SideTuneError};
use crate::layers::{GlobalAvgPool, Module, Param};
use crate::math::tensor::Tensor;
use crate::sidetune::classifier::Classifier;
use crate::sidetune::extractor::FeatureExtractor;
use crate::sidetune::fusion::{merge, merge_side_grad, Alpha};
use crate::sidetune::side::{SideNetwork, TunePolicy};

/// Where base and side representations are blended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusePoint {
    /// Blend the `(C, H, W)` feature maps, then pool once.
    FeatureMap,
    /// Pool each branch, then blend the `(C)` vectors.
    Pooled,
}

impl FusePoint {
    pub fn for_family(family: BackboneFamily) -> FusePoint {
        match family {
            BackboneFamily::MobileNetV2 => FusePoint::FeatureMap,
            BackboneFamily::ResNet => FusePoint::Pooled,
        }
    }
}

/// Frozen backbone plus a trainable copy of it, blended before the copy's
/// retargeted head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSideTune {
    name: String,
    alpha: Alpha,
    fuse_point: FusePoint,
    base: FeatureExtractor,
    side: SideNetwork,
    #[serde(skip)]
    pool: GlobalAvgPool,
}

impl ImageSideTune {
    /// Uses `backbone` both as the frozen base and as the side's starting point.
    pub fn new<R: Rng + ?Sized>(
        backbone: Backbone,
        num_classes: usize,
        alpha: Alpha,
        policy: TunePolicy,
        rng: &mut R,
    ) -> Result<ImageSideTune> {
        let side = SideNetwork::new(backbone.clone(), num_classes, policy, rng)?;
        ImageSideTune::from_parts(FeatureExtractor::new(backbone), side, alpha)
    }

    /// Pairs an existing base with an independently built side network.
    pub fn from_parts(base: FeatureExtractor, side: SideNetwork, alpha: Alpha) -> Result<ImageSideTune> {
        if base.family() != side.family() {
            return Err(SideTuneError::InvalidConfig(format!(
                "base {} and side {} belong to different backbone families",
                base.name(),
                side.name()
            )));
        }
        if base.feature_channels() != side.feature_channels() {
            return Err(SideTuneError::shape(
                "side-tune branch channels",
                &[base.feature_channels()],
                &[side.feature_channels()],
            ));
        }
        Ok(ImageSideTune {
            name: format!("{}_side_tune", base.name()),
            alpha,
            fuse_point: FusePoint::for_family(base.family()),
            base,
            side,
            pool: GlobalAvgPool::new(),
        })
    }

    pub fn alpha(&self) -> Alpha {
        self.alpha
    }

    pub fn fuse_point(&self) -> FusePoint {
        self.fuse_point
    }

    pub fn base(&self) -> &FeatureExtractor {
        &self.base
    }

    pub fn side(&self) -> &SideNetwork {
        &self.side
    }
}

impl Classifier for ImageSideTune {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_classes(&self) -> usize {
        self.side.num_classes()
    }

    fn predict(&self, input: &Input) -> Result<Tensor> {
        let image = input.expect_image()?;
        let base = self.base.features(image)?;
        let side = self.side.features(image)?;
        let pooled = match self.fuse_point {
            FusePoint::FeatureMap => self.pool.infer(&merge(self.alpha, &base, &side)?)?,
            FusePoint::Pooled => merge(self.alpha, &self.pool.infer(&base)?, &self.pool.infer(&side)?)?,
        };
        self.side.classify(&pooled)
    }

    fn forward(&mut self, input: &Input) -> Result<Tensor> {
        let image = input.expect_image()?;
        let base = self.base.features(image)?;
        let side = self.side.features_train(image)?;
        let pooled = match self.fuse_point {
            FusePoint::FeatureMap => self.pool.forward(&merge(self.alpha, &base, &side)?)?,
            FusePoint::Pooled => merge(self.alpha, &self.pool.infer(&base)?, &self.pool.forward(&side)?)?,
        };
        self.side.classify_train(&pooled)
    }

    fn backward(&mut self, grad_logits: &Tensor) -> Result<()> {
        let grad_pooled = self.side.backward_head(grad_logits)?;
        let grad_side = match self.fuse_point {
            FusePoint::FeatureMap => merge_side_grad(self.alpha, &self.pool.backward(&grad_pooled)?),
            FusePoint::Pooled => self.pool.backward(&merge_side_grad(self.alpha, &grad_pooled))?,
        };
        self.side.backward_features(&grad_side)
    }

    fn trainable_params(&self) -> Vec<&Param> {
        self.side.trainable_params()
    }

    fn trainable_params_mut(&mut self) -> Vec<&mut Param> {
        self.side.trainable_params_mut()
    }

    fn frozen_params(&self) -> Vec<&Param> {
        let mut frozen = self.base.params();
        frozen.extend(self.side.frozen_params());
        frozen
    }
}
