use rand::Rng;

use crate::data::{InMemoryDataset, Input, Sample};
use crate::error::Result;
use crate::experiment::spec::{ExperimentSpec, ModelSpec};
use crate::math::tensor::Tensor;
use crate::sidetune::TextBranchConfig;

/// Noise amplitude around each class's signal.
const NOISE: f64 = 0.1;

/// `per_class` samples of every class in an easily separable toy task.
///
/// Images of class `c` are shifted by a class-specific brightness; text
/// matrices carry a class-specific column. Inputs match what `spec.model`
/// consumes.
pub fn synthetic_dataset<R: Rng + ?Sized>(spec: &ExperimentSpec, per_class: usize, rng: &mut R) -> Result<InMemoryDataset> {
    let k = spec.num_classes;
    let classes = spec
        .class_names
        .clone()
        .unwrap_or_else(|| (0..k).map(|c| format!("class{}", c)).collect());

    let mut samples = Vec::with_capacity(k * per_class);
    for _ in 0..per_class {
        for label in 0..k {
            let input = match &spec.model {
                ModelSpec::ImageSideTune { .. } | ModelSpec::FineTune { .. } => {
                    Input::Image(image(spec.image_size, label, k, rng))
                }
                ModelSpec::TextCnn { text, .. } => Input::Text(text_matrix(text, label, rng)),
                ModelSpec::Multimodal { text, .. } => Input::ImageText {
                    image: image(spec.image_size, label, k, rng),
                    text: text_matrix(text, label, rng),
                },
            };
            samples.push(Sample::new(input, label));
        }
    }
    InMemoryDataset::new(classes, samples)
}

fn image<R: Rng + ?Sized>(size: usize, label: usize, num_classes: usize, rng: &mut R) -> Tensor {
    let level = if num_classes > 1 { -1.0 + 2.0 * label as f64 / (num_classes - 1) as f64 } else { 0.0 };
    let mut t = Tensor::uniform(&[3, size, size], NOISE, rng);
    t.data_mut().iter_mut().for_each(|v| *v += level);
    t
}

fn text_matrix<R: Rng + ?Sized>(cfg: &TextBranchConfig, label: usize, rng: &mut R) -> Tensor {
    let mut t = Tensor::uniform(&[cfg.sequence_length, cfg.embedding_dim], NOISE, rng);
    let column = label % cfg.embedding_dim.max(1);
    for row in t.data_mut().chunks_mut(cfg.embedding_dim.max(1)) {
        row[column] += 1.0;
    }
    t
}
