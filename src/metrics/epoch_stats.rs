use serde::{Deserialize, Serialize};

/// Per-epoch statistics emitted by the training pipeline.
///
/// When a `progress_tx` channel is configured in `TrainConfig`, the pipeline
/// sends one `EpochStats` value at the end of every completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    pub total_epochs: usize,
    /// Mean weighted training loss over the epoch's batches.
    pub train_loss: f64,
    pub val_accuracy: f64,
    /// Learning rate used during this epoch.
    pub learning_rate: f64,
    /// Whether this epoch produced a new best validation accuracy.
    pub is_best: bool,
    /// Wall-clock duration of the epoch in milliseconds.
    pub elapsed_ms: u64,
}
