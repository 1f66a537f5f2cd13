use crate::error::{Result, SideTuneError};

/// Per-class sample counts of `targets`.
pub fn class_counts(targets: &[usize], num_classes: usize) -> Result<Vec<usize>> {
    let mut counts = vec![0usize; num_classes];
    for &label in targets {
        let slot = counts.get_mut(label).ok_or(SideTuneError::LabelOutOfRange { label, num_classes })?;
        *slot += 1;
    }
    Ok(counts)
}

/// Inverse-frequency weights `min_count / count[c]`.
///
/// The rarest class gets weight 1 and every other class proportionally less.
/// A class with no samples at all is an error rather than an infinite weight.
pub fn class_weights(targets: &[usize], num_classes: usize) -> Result<Vec<f64>> {
    if targets.is_empty() {
        return Err(SideTuneError::EmptyDataset("cannot weight classes of an empty target list".into()));
    }
    let counts = class_counts(targets, num_classes)?;
    if let Some(missing) = counts.iter().position(|&c| c == 0) {
        return Err(SideTuneError::MissingClass(missing));
    }
    let min = counts.iter().copied().min().unwrap_or(1) as f64;
    Ok(counts.into_iter().map(|c| min / c as f64).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rarest_class_gets_unit_weight() {
        let targets = [0, 0, 0, 0, 1, 1, 2];
        let weights = class_weights(&targets, 3).unwrap();
        assert_eq!(weights, vec![0.25, 0.5, 1.0]);
    }

    #[test]
    fn balanced_targets_are_uniform() {
        assert_eq!(class_weights(&[1, 0, 1, 0], 2).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn absent_class_is_reported() {
        assert!(matches!(class_weights(&[0, 0, 2], 3), Err(SideTuneError::MissingClass(1))));
        assert!(matches!(
            class_weights(&[0, 5], 3),
            Err(SideTuneError::LabelOutOfRange { label: 5, num_classes: 3 })
        ));
        assert!(class_weights(&[], 3).is_err());
    }
}
