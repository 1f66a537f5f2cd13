use std::sync::mpsc;

use crate::error::{Result, SideTuneError};
use crate::metrics::epoch_stats::EpochStats;

/// Configuration for a `TrainingPipeline` run.
///
/// # Fields
/// - `num_epochs`: full passes over the training loader
/// - `num_classes`: label space shared by the model, the loss and the data
/// - `progress_tx`: optional channel sender; one `EpochStats` is sent per
///   completed epoch. A dropped receiver is ignored and the run continues
///   to completion.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub num_epochs: usize,
    pub num_classes: usize,
    pub progress_tx: Option<mpsc::Sender<EpochStats>>,
}

impl TrainConfig {
    /// Creates a `TrainConfig` with no progress channel.
    pub fn new(num_epochs: usize, num_classes: usize) -> Self {
        TrainConfig { num_epochs, num_classes, progress_tx: None }
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<EpochStats>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_epochs == 0 {
            return Err(SideTuneError::InvalidConfig("num_epochs must be at least 1".into()));
        }
        if self.num_classes == 0 {
            return Err(SideTuneError::InvalidConfig("num_classes must be at least 1".into()));
        }
        Ok(())
    }
}
