// src/dataset/mod.rs
pub mod brain_age;
pub mod loader;

pub use brain_age::{load_segmentations, prefetch_samples, BrainAgeImageDataset, SubjectRecord};
pub use loader::{get_image_dataloaders, split_loader, DataLoader, DataLoaders};

use crate::backend::{Float, Tensor};
use crate::error::{BrainAgeError, Result};

pub trait Dataset<T>
where
    T: Float,
{
    /// Get a single sample by index
    fn get_item(&self, index: usize) -> Result<(Tensor<T>, Tensor<T>)>;

    /// Total number of samples in the dataset
    fn len(&self) -> usize;

    /// Check if dataset is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Basic in-memory dataset for supervised learning
#[derive(Debug, Clone)]
pub struct TensorDataset<T>
where
    T: Float,
{
    /// Input tensors - shape: [num_samples, *input_dims]
    inputs: Vec<Tensor<T>>,
    /// Target tensors - shape: [num_samples, *target_dims]
    targets: Vec<Tensor<T>>,
}

impl<T> TensorDataset<T>
where
    T: Float,
{
    /// Create new tensor dataset from stacked input and target tensors
    pub fn new(inputs: Tensor<T>, targets: Tensor<T>) -> Result<Self> {
        let (Some(&num_inputs), Some(&num_targets)) = (inputs.shape().first(), targets.shape().first())
        else {
            return Err(BrainAgeError::Shape(
                "TensorDataset needs at least one dimension on inputs and targets".to_string(),
            ));
        };
        if num_inputs != num_targets {
            return Err(BrainAgeError::Shape(format!(
                "Input batch size {} doesn't match target batch size {}",
                num_inputs, num_targets
            )));
        }

        Ok(Self {
            inputs: inputs.unstack()?,
            targets: targets.unstack()?,
        })
    }
}

impl<T> Dataset<T> for TensorDataset<T>
where
    T: Float,
{
    fn get_item(&self, index: usize) -> Result<(Tensor<T>, Tensor<T>)> {
        match (self.inputs.get(index), self.targets.get(index)) {
            (Some(input), Some(target)) => Ok((input.clone(), target.clone())),
            _ => Err(BrainAgeError::Shape(format!(
                "Index {} out of bounds for dataset of {} samples",
                index,
                self.len()
            ))),
        }
    }

    fn len(&self) -> usize {
        self.inputs.len()
    }
}
