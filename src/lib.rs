pub mod error;
pub mod math;
pub mod activation;
pub mod layers;
pub mod backbone;
pub mod sidetune;
pub mod data;
pub mod loss;
pub mod optim;
pub mod metrics;
pub mod train;
pub mod experiment;

// Convenience re-exports
pub use error::{Result, SideTuneError};
pub use math::tensor::Tensor;
pub use backbone::{Backbone, MobileNetV2Config, ResNetConfig};
pub use sidetune::{Alpha, Classifier, FeatureExtractor, SideNetwork, SideTuneClassifier, TunePolicy};
pub use data::{DataLoader, Dataset, InMemoryDataset, Input, Sample};
pub use loss::WeightedCrossEntropy;
pub use optim::{PolyDecayLr, Sgd};
pub use metrics::{ConfusionMatrix, PipelineResult, RunReport};
pub use train::{TrainConfig, TrainingPipeline};
pub use experiment::ExperimentSpec;
