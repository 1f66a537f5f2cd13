use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SideTuneError};

/// Counts of `matrix[true_label][predicted_label]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> ConfusionMatrix {
        ConfusionMatrix { matrix: vec![vec![0; num_classes]; num_classes] }
    }

    pub fn from_predictions(y_true: &[usize], y_pred: &[usize], num_classes: usize) -> Result<ConfusionMatrix> {
        if y_true.len() != y_pred.len() {
            return Err(SideTuneError::shape("confusion matrix inputs", &[y_true.len()], &[y_pred.len()]));
        }
        let mut cm = ConfusionMatrix::new(num_classes);
        for (&t, &p) in y_true.iter().zip(y_pred) {
            cm.record(t, p)?;
        }
        Ok(cm)
    }

    pub fn record(&mut self, true_label: usize, predicted: usize) -> Result<()> {
        let num_classes = self.num_classes();
        for label in [true_label, predicted] {
            if label >= num_classes {
                return Err(SideTuneError::LabelOutOfRange { label, num_classes });
            }
        }
        self.matrix[true_label][predicted] += 1;
        Ok(())
    }

    pub fn num_classes(&self) -> usize {
        self.matrix.len()
    }

    pub fn matrix(&self) -> &[Vec<usize>] {
        &self.matrix
    }

    pub fn get(&self, true_label: usize, predicted: usize) -> usize {
        self.matrix[true_label][predicted]
    }

    /// Samples whose true label is `class`.
    pub fn support(&self, class: usize) -> usize {
        self.matrix[class].iter().sum()
    }

    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes()).map(|c| self.support(c)).collect()
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes()).map(|i| self.matrix[i][i]).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.correct() as f64 / total as f64
    }

    /// How often each class was predicted (column sums).
    pub fn predicted_distribution(&self) -> Vec<usize> {
        (0..self.num_classes()).map(|j| self.matrix.iter().map(|row| row[j]).sum()).collect()
    }

    /// Each row divided by its support; rows with no samples stay zero.
    pub fn normalized(&self) -> Vec<Vec<f64>> {
        self.matrix
            .iter()
            .map(|row| {
                let support: usize = row.iter().sum();
                row.iter()
                    .map(|&n| if support == 0 { 0.0 } else { n as f64 / support as f64 })
                    .collect()
            })
            .collect()
    }

    /// Per-class recall, the diagonal of [`normalized`](Self::normalized).
    pub fn normalized_diagonal(&self) -> Vec<f64> {
        self.normalized().iter().enumerate().map(|(i, row)| row[i]).collect()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for j in 0..self.num_classes() {
            write!(f, "{:>7}", format!("P{}", j))?;
        }
        writeln!(f)?;
        for (i, row) in self.matrix.iter().enumerate() {
            write!(f, "{:>8}", format!("T{}", i))?;
            for n in row {
                write!(f, "{:>7}", n)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accuracy_and_distribution() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 1, 2], &[0, 1, 1, 1, 0], 3).unwrap();
        assert_eq!(cm.correct(), 3);
        assert_eq!(cm.accuracy(), 0.6);
        assert_eq!(cm.predicted_distribution(), vec![2, 3, 0]);
        assert_eq!(cm.normalized_diagonal(), vec![0.5, 1.0, 0.0]);
        assert_eq!(cm.normalized()[2], vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn out_of_range_labels_are_rejected() {
        let mut cm = ConfusionMatrix::new(2);
        assert!(cm.record(2, 0).is_err());
        assert!(cm.record(0, 5).is_err());
        assert_eq!(cm.total(), 0);
        assert_eq!(cm.accuracy(), 0.0);
    }

    #[test]
    fn display_lists_every_row() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1], &[0, 1], 2).unwrap();
        let text = cm.to_string();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("T1"));
    }

    proptest! {
        #[test]
        fn row_sums_equal_class_counts(pairs in prop::collection::vec((0usize..4, 0usize..4), 0..64)) {
            let (truth, pred): (Vec<usize>, Vec<usize>) = pairs.into_iter().unzip();
            let cm = ConfusionMatrix::from_predictions(&truth, &pred, 4).unwrap();
            for c in 0..4 {
                prop_assert_eq!(cm.support(c), truth.iter().filter(|&&t| t == c).count());
            }
            prop_assert_eq!(cm.predicted_distribution().iter().sum::<usize>(), truth.len());
        }
    }
}
