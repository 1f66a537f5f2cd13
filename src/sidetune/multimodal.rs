use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backbone::Backbone;
use crate::data::Input;
use crate::error::{Result, SideTuneError};
use crate::layers::{Dropout, GlobalAvgPool, Linear, Module, Param};
use crate::math::tensor::Tensor;
use crate::sidetune::classifier::Classifier;
use crate::sidetune::extractor::FeatureExtractor;
use crate::sidetune::fusion::{merge, merge_side_grad, Alpha};
use crate::sidetune::text::{TextBranchConfig, TextConvBranch};

/// Frozen image backbone blended with a trainable text encoder.
///
/// The pooled image features and the text branch output must have the same
/// width, so `backbone.feature_channels` has to equal
/// `channels * windows.len()` of the text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultimodalSideTune {
    name: String,
    alpha: Alpha,
    base: FeatureExtractor,
    text: TextConvBranch,
    dropout: Dropout,
    fc: Linear,
    #[serde(skip)]
    pool: GlobalAvgPool,
}

impl MultimodalSideTune {
    pub fn new<R: Rng + ?Sized>(
        backbone: Backbone,
        text: &TextBranchConfig,
        num_classes: usize,
        alpha: Alpha,
        dropout: f64,
        rng: &mut R,
    ) -> Result<MultimodalSideTune> {
        if num_classes == 0 {
            return Err(SideTuneError::InvalidConfig("num_classes must be at least 1".into()));
        }
        if backbone.feature_channels != text.output_dim() {
            return Err(SideTuneError::shape(
                "image/text fusion width",
                &[backbone.feature_channels],
                &[text.output_dim()],
            ));
        }
        let name = format!("{}_text_side_tune", backbone.name);
        Ok(MultimodalSideTune {
            name,
            alpha,
            text: text.build(rng)?,
            dropout: Dropout::new(dropout, rng)?,
            fc: Linear::new(text.output_dim(), num_classes, rng),
            base: FeatureExtractor::new(backbone),
            pool: GlobalAvgPool::new(),
        })
    }

    pub fn alpha(&self) -> Alpha {
        self.alpha
    }

    fn base_vector(&self, image: &Tensor) -> Result<Tensor> {
        self.pool.infer(&self.base.features(image)?)
    }
}

impl Classifier for MultimodalSideTune {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_classes(&self) -> usize {
        self.fc.out_features
    }

    fn predict(&self, input: &Input) -> Result<Tensor> {
        let (image, text) = input.expect_image_text()?;
        let fused = merge(self.alpha, &self.base_vector(image)?, &self.text.infer(text)?)?;
        self.fc.infer(&self.dropout.infer(&fused)?)
    }

    fn forward(&mut self, input: &Input) -> Result<Tensor> {
        let (image, text) = input.expect_image_text()?;
        let base = self.base_vector(image)?;
        let fused = merge(self.alpha, &base, &self.text.forward(text)?)?;
        let dropped = self.dropout.forward(&fused)?;
        self.fc.forward(&dropped)
    }

    fn backward(&mut self, grad_logits: &Tensor) -> Result<()> {
        let grad = self.fc.backward(grad_logits)?;
        let grad = self.dropout.backward(&grad)?;
        self.text.backward(&merge_side_grad(self.alpha, &grad))?;
        Ok(())
    }

    fn trainable_params(&self) -> Vec<&Param> {
        let mut params = self.text.params();
        params.extend(self.fc.params());
        params
    }

    fn trainable_params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.text.params_mut();
        params.extend(self.fc.params_mut());
        params
    }

    fn frozen_params(&self) -> Vec<&Param> {
        self.base.params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backbone::MobileNetV2Config;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn text_config() -> TextBranchConfig {
        TextBranchConfig { sequence_length: 10, embedding_dim: 3, channels: 4, windows: vec![4, 2], stride: 2 }
    }

    fn sample(rng: &mut StdRng) -> Input {
        Input::ImageText {
            image: Tensor::uniform(&[3, 16, 16], 1.0, rng),
            text: Tensor::uniform(&[10, 3], 1.0, rng),
        }
    }

    #[test]
    fn fuses_pooled_image_with_text_features() {
        let mut rng = StdRng::seed_from_u64(0);
        let backbone = MobileNetV2Config::tiny().build(&mut rng).unwrap();
        let mut model = MultimodalSideTune::new(backbone, &text_config(), 3, Alpha::HALF, 0.5, &mut rng).unwrap();
        let x = sample(&mut rng);
        assert_eq!(model.predict(&x).unwrap().shape(), &[3]);
        model.zero_grad();
        model.forward(&x).unwrap();
        model.backward(&Tensor::vector(&[0.3, -0.1, -0.2])).unwrap();
        assert_eq!(model.trainable_param_count(), (4 * 4 * 3 + 4) + (4 * 2 * 3 + 4) + (8 * 3 + 3));
    }

    #[test]
    fn width_mismatch_is_a_construction_error() {
        let mut rng = StdRng::seed_from_u64(0);
        let backbone = MobileNetV2Config::tiny().build(&mut rng).unwrap();
        let text = TextBranchConfig { channels: 3, ..text_config() };
        assert!(matches!(
            MultimodalSideTune::new(backbone, &text, 3, Alpha::HALF, 0.5, &mut rng),
            Err(SideTuneError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn image_only_input_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let backbone = MobileNetV2Config::tiny().build(&mut rng).unwrap();
        let model = MultimodalSideTune::new(backbone, &text_config(), 3, Alpha::HALF, 0.5, &mut rng).unwrap();
        assert!(model.predict(&Input::Image(Tensor::zeros(&[3, 16, 16]))).is_err());
    }
}
