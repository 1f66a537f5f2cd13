pub mod pipeline;
pub mod train_config;

pub use pipeline::{evaluate, TrainingPipeline};
pub use train_config::TrainConfig;
