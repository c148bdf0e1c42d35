// src/dataset/loader.rs
// Mini-batch iteration over a Dataset.

use crate::backend::{Float, Tensor};
use crate::config::{BrainAgeConfig, Split};
use crate::dataset::{BrainAgeImageDataset, Dataset};
use crate::error::{BrainAgeError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::cell::Cell;
use std::marker::PhantomData;
use tracing::info;

/// Batches samples of a dataset into `(inputs [B, ...], targets [B, ...])`.
///
/// Every pass draws a fresh order when shuffling is on. With a seed the
/// sequence of orders is reproducible. The last batch may be smaller.
pub struct DataLoader<T, D>
where
    T: Float,
    D: Dataset<T>,
{
    dataset: D,
    batch_size: usize,
    shuffle: bool,
    seed: Option<u64>,
    pool: Option<rayon::ThreadPool>,
    epoch: Cell<u64>,
    _marker: PhantomData<T>,
}

impl<T, D> DataLoader<T, D>
where
    T: Float,
    D: Dataset<T> + Sync,
{
    pub fn new(dataset: D, batch_size: usize, shuffle: bool) -> Result<Self> {
        if batch_size == 0 {
            return Err(BrainAgeError::Config(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            dataset,
            batch_size,
            shuffle,
            seed: None,
            pool: None,
            epoch: Cell::new(0),
            _marker: PhantomData,
        })
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Loads the samples of each batch on `num_workers` threads. Zero keeps
    /// loading on the calling thread.
    pub fn with_num_workers(mut self, num_workers: usize) -> Result<Self> {
        self.pool = if num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .build()
                .map_err(|e| {
                    BrainAgeError::Config(format!("failed to build worker pool: {}", e))
                })?;
            Some(pool)
        } else {
            None
        };
        Ok(self)
    }

    pub fn dataset(&self) -> &D {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Sample indices of every batch for the next pass.
    pub fn batch_indices(&self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            let epoch = self.epoch.get();
            self.epoch.set(epoch + 1);
            match self.seed {
                Some(seed) => order.shuffle(&mut StdRng::seed_from_u64(seed.wrapping_add(epoch))),
                None => order.shuffle(&mut rand::rng()),
            }
        }
        order
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Loads and stacks the given samples.
    pub fn load_batch(&self, indices: &[usize]) -> Result<(Tensor<T>, Tensor<T>)> {
        let dataset = &self.dataset;
        let samples = match &self.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| dataset.get_item(i))
                    .collect::<Result<Vec<_>>>()
            })?,
            None => indices
                .iter()
                .map(|&i| dataset.get_item(i))
                .collect::<Result<Vec<_>>>()?,
        };

        let (inputs, targets): (Vec<_>, Vec<_>) = samples.into_iter().unzip();
        Ok((Tensor::stack(&inputs)?, Tensor::stack(&targets)?))
    }

    /// Lazily loads one pass over the dataset.
    pub fn iter(&self) -> Batches<'_, T, D> {
        Batches {
            loader: self,
            plan: self.batch_indices().into_iter(),
        }
    }

    /// Loads one full pass eagerly.
    pub fn epoch_batches(&self) -> Result<Vec<(Tensor<T>, Tensor<T>)>> {
        self.iter().collect()
    }
}

pub struct Batches<'a, T, D>
where
    T: Float,
    D: Dataset<T>,
{
    loader: &'a DataLoader<T, D>,
    plan: std::vec::IntoIter<Vec<usize>>,
}

impl<T, D> Iterator for Batches<'_, T, D>
where
    T: Float,
    D: Dataset<T> + Sync,
{
    type Item = Result<(Tensor<T>, Tensor<T>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.plan.next()?;
        Some(self.loader.load_batch(&indices))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.plan.size_hint()
    }
}

/// Train (shuffled), validation and test loaders.
pub struct DataLoaders<T>
where
    T: Float,
{
    pub train: DataLoader<T, BrainAgeImageDataset>,
    pub val: DataLoader<T, BrainAgeImageDataset>,
    pub test: DataLoader<T, BrainAgeImageDataset>,
}

impl<T> DataLoaders<T>
where
    T: Float,
{
    pub fn get(&self, split: Split) -> &DataLoader<T, BrainAgeImageDataset> {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }
}

/// Builds one loader for `split`; only the training split is shuffled.
pub fn split_loader<T: Float>(
    config: &BrainAgeConfig,
    split: Split,
) -> Result<DataLoader<T, BrainAgeImageDataset>> {
    let dataset = BrainAgeImageDataset::new(split, config)?;
    DataLoader::new(dataset, config.batch_size, split == Split::Train)?
        .with_seed(config.shuffle_seed)
        .with_num_workers(config.num_workers)
}

pub fn get_image_dataloaders<T: Float>(config: &BrainAgeConfig) -> Result<DataLoaders<T>> {
    info!("Loading data. This might take a while...");
    Ok(DataLoaders {
        train: split_loader(config, Split::Train)?,
        val: split_loader(config, Split::Val)?,
        test: split_loader(config, Split::Test)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TensorDataset;

    fn dataset(n: usize) -> TensorDataset<f32> {
        let inputs = Tensor::from_vec((0..n * 2).map(|v| v as f32).collect(), &[n, 1, 2]).unwrap();
        let targets = Tensor::from_vec((0..n).map(|v| v as f32).collect(), &[n, 1]).unwrap();
        TensorDataset::new(inputs, targets).unwrap()
    }

    #[test]
    fn test_batches_keep_partial_tail() {
        let loader = DataLoader::new(dataset(5), 2, false).unwrap();
        assert_eq!(loader.num_batches(), 3);

        let batches = loader.epoch_batches().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].0.shape(), &[2, 1, 2]);
        assert_eq!(batches[0].1.shape(), &[2, 1]);
        assert_eq!(batches[2].0.shape(), &[1, 1, 2]);
        assert_eq!(batches[2].1.to_vec(), vec![4.0]);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible_and_varies_per_pass() {
        let a = DataLoader::new(dataset(16), 4, true).unwrap().with_seed(Some(7));
        let b = DataLoader::new(dataset(16), 4, true).unwrap().with_seed(Some(7));

        let first_a = a.batch_indices();
        let second_a = a.batch_indices();
        assert_eq!(first_a, b.batch_indices());
        assert_eq!(second_a, b.batch_indices());
        assert_ne!(first_a, second_a);

        let mut seen: Vec<usize> = first_a.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_workers_produce_same_batches() {
        let serial = DataLoader::new(dataset(6), 4, false).unwrap();
        let parallel = DataLoader::new(dataset(6), 4, false)
            .unwrap()
            .with_num_workers(2)
            .unwrap();
        assert_eq!(serial.epoch_batches().unwrap(), parallel.epoch_batches().unwrap());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(DataLoader::new(dataset(2), 0, false).is_err());
    }
}
