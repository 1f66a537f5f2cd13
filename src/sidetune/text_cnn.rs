use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::Input;
use crate::error::{Result, SideTuneError};
use crate::layers::{Dropout, Linear, Module, Param};
use crate::math::tensor::Tensor;
use crate::sidetune::classifier::Classifier;
use crate::sidetune::text::{TextBranchConfig, TextConvBranch};

/// Text-only baseline: the text encoder alone, then dropout and a linear head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCnn {
    name: String,
    encoder: TextConvBranch,
    dropout: Dropout,
    fc: Linear,
}

impl TextCnn {
    pub fn new<R: Rng + ?Sized>(config: &TextBranchConfig, num_classes: usize, dropout: f64, rng: &mut R) -> Result<TextCnn> {
        if num_classes == 0 {
            return Err(SideTuneError::InvalidConfig("num_classes must be at least 1".into()));
        }
        Ok(TextCnn {
            name: "text_cnn".into(),
            encoder: config.build(rng)?,
            dropout: Dropout::new(dropout, rng)?,
            fc: Linear::new(config.output_dim(), num_classes, rng),
        })
    }
}

impl Classifier for TextCnn {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_classes(&self) -> usize {
        self.fc.out_features
    }

    fn predict(&self, input: &Input) -> Result<Tensor> {
        let encoded = self.encoder.infer(input.expect_text()?)?;
        self.fc.infer(&self.dropout.infer(&encoded)?)
    }

    fn forward(&mut self, input: &Input) -> Result<Tensor> {
        let encoded = self.encoder.forward(input.expect_text()?)?;
        let dropped = self.dropout.forward(&encoded)?;
        self.fc.forward(&dropped)
    }

    fn backward(&mut self, grad_logits: &Tensor) -> Result<()> {
        let grad = self.fc.backward(grad_logits)?;
        let grad = self.dropout.backward(&grad)?;
        self.encoder.backward(&grad)?;
        Ok(())
    }

    fn trainable_params(&self) -> Vec<&Param> {
        let mut params = self.encoder.params();
        params.extend(self.fc.params());
        params
    }

    fn trainable_params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.encoder.params_mut();
        params.extend(self.fc.params_mut());
        params
    }

    fn frozen_params(&self) -> Vec<&Param> {
        Vec::new()
    }
}
