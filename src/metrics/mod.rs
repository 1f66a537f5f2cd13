pub mod confusion;
pub mod epoch_stats;
pub mod report;

pub use confusion::ConfusionMatrix;
pub use epoch_stats::EpochStats;
pub use report::{PipelineResult, RunReport};
