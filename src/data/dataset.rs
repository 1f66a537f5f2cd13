use crate::data::sample::Sample;
use crate::error::{Result, SideTuneError};

/// A finite, indexable collection of labelled samples.
pub trait Dataset {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Sample>;

    /// Class names, indexed by label.
    fn classes(&self) -> &[String];

    /// Label of every sample, in index order.
    fn targets(&self) -> Vec<usize>;

    fn num_classes(&self) -> usize {
        self.classes().len()
    }
}

/// Samples already held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    classes: Vec<String>,
    samples: Vec<Sample>,
}

impl InMemoryDataset {
    pub fn new(classes: Vec<String>, samples: Vec<Sample>) -> Result<InMemoryDataset> {
        if let Some(bad) = samples.iter().find(|s| s.label >= classes.len()) {
            return Err(SideTuneError::LabelOutOfRange { label: bad.label, num_classes: classes.len() });
        }
        Ok(InMemoryDataset { classes, samples })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        self.samples
            .get(index)
            .cloned()
            .ok_or(SideTuneError::IndexOutOfRange { index, len: self.samples.len() })
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn targets(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::Input;
    use crate::math::tensor::Tensor;

    #[test]
    fn targets_follow_sample_order() {
        let samples = vec![
            Sample::new(Input::Text(Tensor::zeros(&[2, 2])), 1),
            Sample::new(Input::Text(Tensor::zeros(&[2, 2])), 0),
        ];
        let ds = InMemoryDataset::new(vec!["a".into(), "b".into()], samples).unwrap();
        assert_eq!(ds.targets(), vec![1, 0]);
        assert_eq!(ds.num_classes(), 2);
        assert!(matches!(ds.get(2), Err(SideTuneError::IndexOutOfRange { index: 2, len: 2 })));
    }

    #[test]
    fn labels_must_name_a_class() {
        let samples = vec![Sample::new(Input::Text(Tensor::zeros(&[1, 1])), 3)];
        assert!(InMemoryDataset::new(vec!["only".into()], samples).is_err());
    }
}
