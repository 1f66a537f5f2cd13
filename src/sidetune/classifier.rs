use serde::{Deserialize, Serialize};

use crate::data::Input;
use crate::error::{Result, SideTuneError};
use crate::layers::Param;
use crate::math::tensor::Tensor;
use crate::sidetune::{FineTune, ImageSideTune, MultimodalSideTune, TextCnn};

/// A model the training pipeline can drive.
///
/// `predict` is the evaluation path and takes `&self`. `forward` caches one
/// sample's activations and must be followed by `backward` on that sample's
/// logit gradient before the next `forward`.
pub trait Classifier {
    fn name(&self) -> &str;

    fn num_classes(&self) -> usize;

    /// Unnormalized class scores.
    fn predict(&self, input: &Input) -> Result<Tensor>;

    fn forward(&mut self, input: &Input) -> Result<Tensor>;

    /// Accumulates gradients into the trainable parameters.
    fn backward(&mut self, grad_logits: &Tensor) -> Result<()>;

    fn trainable_params(&self) -> Vec<&Param>;

    fn trainable_params_mut(&mut self) -> Vec<&mut Param>;

    /// Parameters that take part in inference but never change.
    fn frozen_params(&self) -> Vec<&Param>;

    fn trainable_param_count(&self) -> usize {
        self.trainable_params().iter().map(|p| p.numel()).sum()
    }

    fn zero_grad(&mut self) {
        for p in self.trainable_params_mut() {
            p.zero_grad();
        }
    }

    /// Copies every trainable value, in `trainable_params` order.
    fn snapshot(&self) -> Vec<Tensor> {
        self.trainable_params().iter().map(|p| p.value.clone()).collect()
    }

    fn restore(&mut self, snapshot: &[Tensor]) -> Result<()> {
        let mut params = self.trainable_params_mut();
        if params.len() != snapshot.len() {
            return Err(SideTuneError::shape("snapshot restore", &[params.len()], &[snapshot.len()]));
        }
        for (param, saved) in params.iter_mut().zip(snapshot) {
            param.value.check_same_shape(saved, "snapshot restore")?;
            param.value = saved.clone();
        }
        Ok(())
    }
}

/// Every classifier variant behind one serializable type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum SideTuneClassifier {
    Image(ImageSideTune),
    Multimodal(MultimodalSideTune),
    TextCnn(TextCnn),
    FineTune(FineTune),
}

macro_rules! dispatch {
    ($self:expr, $model:ident => $body:expr) => {
        match $self {
            SideTuneClassifier::Image($model) => $body,
            SideTuneClassifier::Multimodal($model) => $body,
            SideTuneClassifier::TextCnn($model) => $body,
            SideTuneClassifier::FineTune($model) => $body,
        }
    };
}

impl Classifier for SideTuneClassifier {
    fn name(&self) -> &str {
        dispatch!(self, m => m.name())
    }

    fn num_classes(&self) -> usize {
        dispatch!(self, m => m.num_classes())
    }

    fn predict(&self, input: &Input) -> Result<Tensor> {
        dispatch!(self, m => m.predict(input))
    }

    fn forward(&mut self, input: &Input) -> Result<Tensor> {
        dispatch!(self, m => m.forward(input))
    }

    fn backward(&mut self, grad_logits: &Tensor) -> Result<()> {
        dispatch!(self, m => m.backward(grad_logits))
    }

    fn trainable_params(&self) -> Vec<&Param> {
        dispatch!(self, m => m.trainable_params())
    }

    fn trainable_params_mut(&mut self) -> Vec<&mut Param> {
        dispatch!(self, m => m.trainable_params_mut())
    }

    fn frozen_params(&self) -> Vec<&Param> {
        dispatch!(self, m => m.frozen_params())
    }
}

impl From<ImageSideTune> for SideTuneClassifier {
    fn from(model: ImageSideTune) -> Self {
        SideTuneClassifier::Image(model)
    }
}

impl From<MultimodalSideTune> for SideTuneClassifier {
    fn from(model: MultimodalSideTune) -> Self {
        SideTuneClassifier::Multimodal(model)
    }
}

impl From<TextCnn> for SideTuneClassifier {
    fn from(model: TextCnn) -> Self {
        SideTuneClassifier::TextCnn(model)
    }
}

impl From<FineTune> for SideTuneClassifier {
    fn from(model: FineTune) -> Self {
        SideTuneClassifier::FineTune(model)
    }
}

impl SideTuneClassifier {
    /// Serializes the whole model, frozen base included, to pretty JSON.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: &str) -> Result<SideTuneClassifier> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
