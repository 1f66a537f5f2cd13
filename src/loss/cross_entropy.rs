use crate::error::{Result, SideTuneError};
use crate::math::tensor::Tensor;

/// Softmax cross-entropy computed directly on logits.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// Numerically stable softmax (shifted by the max logit).
    pub fn softmax(logits: &[f64]) -> Vec<f64> {
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }

    /// `-log softmax(logits)[target]` via log-sum-exp.
    pub fn loss(logits: &[f64], target: usize) -> f64 {
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let lse = max + logits.iter().map(|z| (z - max).exp()).sum::<f64>().ln();
        lse - logits[target]
    }

    /// Gradient with respect to the logits: `softmax(logits) - onehot(target)`.
    pub fn derivative(logits: &[f64], target: usize) -> Vec<f64> {
        let mut grad = Self::softmax(logits);
        grad[target] -= 1.0;
        grad
    }
}

/// Class-weighted cross-entropy.
///
/// Over a batch the loss is `sum_i w[y_i] * CE_i / sum_i w[y_i]`, so a batch
/// made of a single class reduces to plain mean cross-entropy.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedCrossEntropy {
    weights: Vec<f64>,
}

impl WeightedCrossEntropy {
    pub fn new(weights: Vec<f64>) -> Result<WeightedCrossEntropy> {
        if weights.is_empty() {
            return Err(SideTuneError::InvalidConfig("class weights must not be empty".into()));
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w <= 0.0) {
            return Err(SideTuneError::InvalidConfig(format!("class weight {} must be positive", w)));
        }
        Ok(WeightedCrossEntropy { weights })
    }

    pub fn uniform(num_classes: usize) -> Result<WeightedCrossEntropy> {
        WeightedCrossEntropy::new(vec![1.0; num_classes])
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn num_classes(&self) -> usize {
        self.weights.len()
    }

    pub fn weight(&self, label: usize) -> Result<f64> {
        self.weights.get(label).copied().ok_or(SideTuneError::LabelOutOfRange {
            label,
            num_classes: self.weights.len(),
        })
    }

    /// Normaliser of a batch: the sum of its samples' class weights.
    pub fn batch_weight(&self, labels: &[usize]) -> Result<f64> {
        labels.iter().map(|&l| self.weight(l)).sum()
    }

    fn check_logits(&self, logits: &Tensor) -> Result<()> {
        if logits.len() != self.weights.len() {
            return Err(SideTuneError::shape("logits", &[self.weights.len()], logits.shape()));
        }
        Ok(())
    }

    /// This sample's contribution to a batch loss normalised by `batch_weight`.
    pub fn sample_loss(&self, logits: &Tensor, label: usize, batch_weight: f64) -> Result<f64> {
        self.check_logits(logits)?;
        let w = self.weight(label)?;
        Ok(w * CrossEntropyLoss::loss(logits.data(), label) / batch_weight)
    }

    /// Gradient of `sample_loss` with respect to the logits.
    pub fn sample_gradient(&self, logits: &Tensor, label: usize, batch_weight: f64) -> Result<Tensor> {
        self.check_logits(logits)?;
        let scale = self.weight(label)? / batch_weight;
        let grad = CrossEntropyLoss::derivative(logits.data(), label);
        Ok(Tensor::vector(&grad).scale(scale))
    }

    /// Full weighted batch loss.
    pub fn batch_loss(&self, logits: &[Tensor], labels: &[usize]) -> Result<f64> {
        if logits.len() != labels.len() {
            return Err(SideTuneError::shape("loss batch", &[labels.len()], &[logits.len()]));
        }
        let total = self.batch_weight(labels)?;
        logits.iter().zip(labels).map(|(z, &y)| self.sample_loss(z, y, total)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn uniform_logits_give_log_num_classes() {
        assert_abs_diff_eq!(CrossEntropyLoss::loss(&[0.0, 0.0, 0.0, 0.0], 2), 4f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn large_logits_do_not_overflow() {
        let loss = CrossEntropyLoss::loss(&[1000.0, 0.0], 0);
        assert!(loss.is_finite());
        assert_abs_diff_eq!(loss, 0.0, epsilon = 1e-12);
        let probs = CrossEntropyLoss::softmax(&[1000.0, 999.0]);
        assert_abs_diff_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn weighted_loss_normalises_by_batch_weight() {
        let ce = WeightedCrossEntropy::new(vec![1.0, 3.0]).unwrap();
        let logits = vec![Tensor::vector(&[0.0, 0.0]), Tensor::vector(&[2.0, 0.0])];
        let labels = [0, 1];
        let expected = (1.0 * 2f64.ln() + 3.0 * CrossEntropyLoss::loss(&[2.0, 0.0], 1)) / 4.0;
        assert_abs_diff_eq!(ce.batch_loss(&logits, &labels).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let ce = WeightedCrossEntropy::new(vec![0.5, 1.0, 2.0]).unwrap();
        let logits = Tensor::vector(&[0.3, -1.2, 0.8]);
        let grad = ce.sample_gradient(&logits, 2, 2.5).unwrap();
        let eps = 1e-6;
        for i in 0..3 {
            let mut plus = logits.clone();
            plus.data_mut()[i] += eps;
            let mut minus = logits.clone();
            minus.data_mut()[i] -= eps;
            let numeric = (ce.sample_loss(&plus, 2, 2.5).unwrap() - ce.sample_loss(&minus, 2, 2.5).unwrap()) / (2.0 * eps);
            assert_abs_diff_eq!(grad.data()[i], numeric, epsilon = 1e-7);
        }
    }

    #[test]
    fn rejects_bad_labels_and_weights() {
        let ce = WeightedCrossEntropy::uniform(2).unwrap();
        assert!(matches!(
            ce.sample_loss(&Tensor::vector(&[0.0, 0.0]), 2, 1.0),
            Err(SideTuneError::LabelOutOfRange { label: 2, num_classes: 2 })
        ));
        assert!(ce.sample_loss(&Tensor::vector(&[0.0, 0.0, 0.0]), 0, 1.0).is_err());
        assert!(WeightedCrossEntropy::new(vec![1.0, 0.0]).is_err());
        assert!(WeightedCrossEntropy::new(Vec::new()).is_err());
    }
}
