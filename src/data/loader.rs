use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data::dataset::Dataset;
use crate::data::sample::Sample;
use crate::error::{Result, SideTuneError};

/// Splits a dataset into mini-batches, once per call to [`DataLoader::batches`].
///
/// Each call starts a fresh pass, so a loader can be iterated once per epoch.
/// With a seed the order is reshuffled on every pass from one generator, so
/// the whole sequence of epochs is reproducible.
pub struct DataLoader<'a, D: Dataset + ?Sized> {
    dataset: &'a D,
    batch_size: usize,
    shuffle: Option<StdRng>,
}

impl<'a, D: Dataset + ?Sized> DataLoader<'a, D> {
    /// Sequential, unshuffled batches.
    pub fn new(dataset: &'a D, batch_size: usize) -> Result<DataLoader<'a, D>> {
        if batch_size == 0 {
            return Err(SideTuneError::InvalidConfig("batch_size must be at least 1".into()));
        }
        Ok(DataLoader { dataset, batch_size, shuffle: None })
    }

    pub fn shuffled(dataset: &'a D, batch_size: usize, seed: u64) -> Result<DataLoader<'a, D>> {
        let mut loader = DataLoader::new(dataset, batch_size)?;
        loader.shuffle = Some(StdRng::seed_from_u64(seed));
        Ok(loader)
    }

    pub fn dataset(&self) -> &'a D {
        self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle.is_some()
    }

    pub fn num_batches(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }

    pub fn batches(&mut self) -> Batches<'a, D> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(rng) = self.shuffle.as_mut() {
            order.shuffle(rng);
        }
        Batches { dataset: self.dataset, order, batch_size: self.batch_size, cursor: 0 }
    }
}

/// One pass over a dataset.
pub struct Batches<'a, D: Dataset + ?Sized> {
    dataset: &'a D,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<'a, D: Dataset + ?Sized> Iterator for Batches<'a, D> {
    type Item = Result<Vec<Sample>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end].iter().map(|&i| self.dataset.get(i)).collect();
        self.cursor = end;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::InMemoryDataset;
    use crate::data::sample::Input;
    use crate::math::tensor::Tensor;

    fn numbered(n: usize) -> InMemoryDataset {
        let samples = (0..n)
            .map(|i| Sample::new(Input::Text(Tensor::full(&[1, 1], i as f64)), i % 2))
            .collect();
        InMemoryDataset::new(vec!["even".into(), "odd".into()], samples).unwrap()
    }

    fn ids(batch: &[Sample]) -> Vec<usize> {
        batch
            .iter()
            .map(|s| s.input.expect_text().map(|t| t.data()[0] as usize).unwrap())
            .collect()
    }

    #[test]
    fn sequential_batches_cover_everything_in_order() {
        let ds = numbered(5);
        let mut loader = DataLoader::new(&ds, 2).unwrap();
        assert_eq!(loader.num_batches(), 3);
        let batches: Vec<Vec<usize>> = loader.batches().map(|b| ids(&b.unwrap())).collect();
        assert_eq!(batches, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn shuffled_loader_is_a_permutation_and_restartable() {
        let ds = numbered(10);
        let mut loader = DataLoader::shuffled(&ds, 3, 42).unwrap();
        let first: Vec<usize> = loader.batches().flat_map(|b| ids(&b.unwrap())).collect();
        let second: Vec<usize> = loader.batches().flat_map(|b| ids(&b.unwrap())).collect();
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
        assert_eq!(second.len(), 10);

        let mut again = DataLoader::shuffled(&ds, 3, 42).unwrap();
        let replay: Vec<usize> = again.batches().flat_map(|b| ids(&b.unwrap())).collect();
        assert_eq!(first, replay);
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let ds = numbered(1);
        assert!(DataLoader::new(&ds, 0).is_err());
    }
}
