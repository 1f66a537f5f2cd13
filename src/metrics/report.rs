use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::confusion::ConfusionMatrix;
use crate::metrics::epoch_stats::EpochStats;

/// What one training run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub best_val_accuracy: f64,
    /// 1-based epoch of the restored snapshot.
    pub best_epoch: usize,
    pub test_accuracy: f64,
    pub confusion: ConfusionMatrix,
    /// Test predictions per class.
    pub distribution: Vec<usize>,
    pub history: Vec<EpochStats>,
}

/// One CSV line summarising a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub name: String,
    pub trainable_params: usize,
    pub optimizer: String,
    pub best_val_accuracy: f64,
    pub test_accuracy: f64,
    /// Per-class recall on the test split.
    pub class_recall: Vec<f64>,
}

impl RunReport {
    pub fn new(name: &str, trainable_params: usize, optimizer: &str, result: &PipelineResult) -> RunReport {
        RunReport {
            name: name.to_string(),
            trainable_params,
            optimizer: optimizer.to_string(),
            best_val_accuracy: result.best_val_accuracy,
            test_accuracy: result.test_accuracy,
            class_recall: result.confusion.normalized_diagonal(),
        }
    }

    /// `name,trainable_params,optimizer,best_val,test,recall_0,...,recall_k`
    pub fn csv_row(&self) -> String {
        let mut fields = vec![
            self.name.clone(),
            self.trainable_params.to_string(),
            self.optimizer.clone(),
            format!("{:.4}", self.best_val_accuracy),
            format!("{:.4}", self.test_accuracy),
        ];
        fields.extend(self.class_recall.iter().map(|r| format!("{:.4}", r)));
        fields.join(",")
    }

    /// Appends `csv_row` as a new line, creating the file if needed.
    pub fn append_csv(&self, path: &str) -> Result<()> {
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", self.csv_row())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> PipelineResult {
        let confusion = ConfusionMatrix::from_predictions(&[0, 0, 1, 1], &[0, 1, 1, 1], 2).unwrap();
        PipelineResult {
            best_val_accuracy: 0.8,
            best_epoch: 2,
            test_accuracy: confusion.accuracy(),
            distribution: confusion.predicted_distribution(),
            confusion,
            history: Vec::new(),
        }
    }

    #[test]
    fn csv_row_lists_recall_per_class() {
        let report = RunReport::new("mobilenet_v2_side_tune", 1234, "sgd", &result());
        assert_eq!(report.csv_row(), "mobilenet_v2_side_tune,1234,sgd,0.8000,0.7500,0.5000,1.0000");
    }

    #[test]
    fn append_adds_one_line_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.csv");
        let path = path.to_str().unwrap();
        let report = RunReport::new("a", 1, "sgd", &result());
        report.append_csv(path).unwrap();
        report.append_csv(path).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
