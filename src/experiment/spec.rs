use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backbone::{Backbone, MobileNetV2Config, ResNetConfig};
use crate::data::{DataLoader, Dataset};
use crate::error::{Result, SideTuneError};
use crate::loss::{class_weights, WeightedCrossEntropy};
use crate::metrics::RunReport;
use crate::optim::{Optimizer, PolyDecayLr, SgdConfig};
use crate::sidetune::{
    Alpha, Classifier, FineTune, ImageSideTune, MultimodalSideTune, SideTuneClassifier, TextBranchConfig, TextCnn,
    TunePolicy,
};
use crate::train::{TrainConfig, TrainingPipeline};

/// Where backbone weights come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum BackboneSpec {
    /// Freshly initialised ResNet.
    #[serde(rename = "resnet")]
    ResNet(ResNetConfig),
    /// Freshly initialised MobileNet-v2.
    #[serde(rename = "mobilenet_v2")]
    MobileNetV2(MobileNetV2Config),
    /// A backbone JSON written by `Backbone::save_json`.
    Pretrained { path: String },
}

impl BackboneSpec {
    pub fn build<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Backbone> {
        match self {
            BackboneSpec::ResNet(cfg) => cfg.build(rng),
            BackboneSpec::MobileNetV2(cfg) => cfg.build(rng),
            BackboneSpec::Pretrained { path } => Backbone::load_json(path),
        }
    }
}

fn default_dropout() -> f64 {
    0.5
}

/// Which classifier to build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    ImageSideTune {
        backbone: BackboneSpec,
        #[serde(default)]
        alpha: Alpha,
        #[serde(default)]
        policy: TunePolicy,
    },
    Multimodal {
        backbone: BackboneSpec,
        #[serde(default)]
        text: TextBranchConfig,
        #[serde(default)]
        alpha: Alpha,
        #[serde(default = "default_dropout")]
        dropout: f64,
    },
    TextCnn {
        #[serde(default)]
        text: TextBranchConfig,
        #[serde(default = "default_dropout")]
        dropout: f64,
    },
    FineTune {
        backbone: BackboneSpec,
        #[serde(default)]
        policy: TunePolicy,
    },
}

impl ModelSpec {
    pub fn build<R: Rng + ?Sized>(&self, num_classes: usize, rng: &mut R) -> Result<SideTuneClassifier> {
        Ok(match self {
            ModelSpec::ImageSideTune { backbone, alpha, policy } => {
                ImageSideTune::new(backbone.build(rng)?, num_classes, *alpha, *policy, rng)?.into()
            }
            ModelSpec::Multimodal { backbone, text, alpha, dropout } => {
                MultimodalSideTune::new(backbone.build(rng)?, text, num_classes, *alpha, *dropout, rng)?.into()
            }
            ModelSpec::TextCnn { text, dropout } => TextCnn::new(text, num_classes, *dropout, rng)?.into(),
            ModelSpec::FineTune { backbone, policy } => {
                FineTune::new(backbone.build(rng)?, num_classes, *policy, rng)?.into()
            }
        })
    }
}

fn default_power() -> f64 {
    0.5
}

fn default_image_size() -> usize {
    224
}

/// A fully serializable description of one training run.
///
/// Like a network spec, it can be saved to / loaded from JSON before any
/// weights exist; `seed` makes the whole run reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Human-readable run name.
    pub name: String,
    pub num_classes: usize,
    pub model: ModelSpec,
    #[serde(default)]
    pub optimizer: SgdConfig,
    /// Exponent of the per-epoch polynomial learning-rate decay.
    #[serde(default = "default_power")]
    pub lr_power: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
    /// Side length of square input images.
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub class_names: Option<Vec<String>>,
}

impl ExperimentSpec {
    /// A small MobileNet side-tuning run that finishes in seconds.
    pub fn toy() -> ExperimentSpec {
        ExperimentSpec {
            name: "toy_side_tune".into(),
            num_classes: 2,
            model: ModelSpec::ImageSideTune {
                backbone: BackboneSpec::MobileNetV2(MobileNetV2Config::tiny()),
                alpha: Alpha::HALF,
                policy: TunePolicy::Full,
            },
            optimizer: SgdConfig { learning_rate: 0.05, momentum: 0.9, weight_decay: 0.0 },
            lr_power: 0.5,
            epochs: 4,
            batch_size: 4,
            seed: 42,
            image_size: 16,
            description: Some("synthetic two-class image task".into()),
            class_names: Some(vec!["dark".into(), "bright".into()]),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_classes == 0 || self.epochs == 0 || self.batch_size == 0 || self.image_size == 0 {
            return Err(SideTuneError::InvalidConfig(format!(
                "{}: num_classes, epochs, batch_size and image_size must be positive",
                self.name
            )));
        }
        if let Some(names) = &self.class_names {
            if names.len() != self.num_classes {
                return Err(SideTuneError::InvalidConfig(format!(
                    "{}: {} class names for {} classes",
                    self.name,
                    names.len(),
                    self.num_classes
                )));
            }
        }
        Ok(())
    }

    /// Builds the model from a generator seeded with `seed`.
    pub fn build_model(&self) -> Result<SideTuneClassifier> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.model.build(self.num_classes, &mut rng)
    }

    /// Builds the model, trains it on `train` with class weights taken from
    /// `train`'s targets, and reports the test result.
    pub fn run<D: Dataset + ?Sized>(&self, train: &D, val: &D, test: &D) -> Result<(SideTuneClassifier, RunReport)> {
        let mut model = self.build_model()?;
        let weights = class_weights(&train.targets(), self.num_classes)?;
        info!(run = %self.name, weights = ?weights, "class weights");

        let loss = WeightedCrossEntropy::new(weights)?;
        let optimizer = self.optimizer.build()?;
        let scheduler = PolyDecayLr::with_power(self.optimizer.learning_rate, self.epochs, self.lr_power)?;
        let optimizer_name = optimizer.name().to_string();

        // Loader seeds are derived from the run seed, distinct from model init.
        let mut train_loader = DataLoader::shuffled(train, self.batch_size, self.seed.wrapping_add(1))?;
        let mut val_loader = DataLoader::new(val, self.batch_size)?;
        let mut test_loader = DataLoader::new(test, self.batch_size)?;

        let config = TrainConfig::new(self.epochs, self.num_classes);
        let result = TrainingPipeline::new(&mut model, loss, optimizer, scheduler, config)?
            .run(&mut train_loader, &mut val_loader, &mut test_loader)?;

        let report = RunReport::new(model.name(), model.trainable_param_count(), &optimizer_name, &result);
        Ok((model, report))
    }

    /// Serializes the experiment to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes an `ExperimentSpec` from a JSON file.
    pub fn load_json(path: &str) -> Result<ExperimentSpec> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let spec: ExperimentSpec = serde_json::from_reader(reader)?;
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toy_spec_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toy.json");
        let path = path.to_str().unwrap();
        let spec = ExperimentSpec::toy();
        spec.save_json(path).unwrap();
        assert_eq!(ExperimentSpec::load_json(path).unwrap(), spec);
    }

    #[test]
    fn minimal_json_fills_defaults() {
        let json = r#"{
            "name": "text",
            "num_classes": 3,
            "model": { "kind": "text_cnn" },
            "epochs": 2,
            "batch_size": 8,
            "seed": 7
        }"#;
        let spec: ExperimentSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.optimizer, SgdConfig::default());
        assert_eq!(spec.lr_power, 0.5);
        assert_eq!(spec.image_size, 224);
        match spec.model {
            ModelSpec::TextCnn { text, dropout } => {
                assert_eq!(text, TextBranchConfig::default());
                assert_eq!(dropout, 0.5);
            }
            other => panic!("unexpected model {:?}", other),
        }
    }

    #[test]
    fn backbone_source_is_tagged() {
        let json = r#"{ "kind": "fine_tune", "backbone": { "source": "pretrained", "path": "weights.json" } }"#;
        let model: ModelSpec = serde_json::from_str(json).unwrap();
        assert_eq!(
            model,
            ModelSpec::FineTune {
                backbone: BackboneSpec::Pretrained { path: "weights.json".into() },
                policy: TunePolicy::Full
            }
        );
    }

    #[test]
    fn same_seed_builds_identical_models() {
        let spec = ExperimentSpec::toy();
        let a = spec.build_model().unwrap();
        let b = spec.build_model().unwrap();
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn mismatched_class_names_are_invalid() {
        let spec = ExperimentSpec { class_names: Some(vec!["one".into()]), ..ExperimentSpec::toy() };
        assert!(spec.validate().is_err());
    }
}
