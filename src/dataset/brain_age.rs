// src/dataset/brain_age.rs
// Subject-level MRI dataset backed by the metadata CSVs.

use crate::backend::{Float, Tensor};
use crate::config::{BrainAgeConfig, Split};
use crate::dataset::Dataset;
use crate::error::{BrainAgeError, Result};
use crate::imaging::{load_and_preprocess, load_nii};
use crate::telemetry::progress_bar;
use ndarray::{Array, Array4, Axis, Dimension};
use rayon::prelude::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One row of a metadata CSV. Extra columns are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubjectRecord {
    pub subject_id: String,
    pub age: f64,
}

pub fn read_metadata(path: &Path) -> Result<Vec<SubjectRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<SubjectRecord>, csv::Error>>()?;
    debug!(path = %path.display(), subjects = records.len(), "read metadata");
    Ok(records)
}

fn volume_to_tensor<T: Float, D: Dimension>(volume: Array<f32, D>) -> Tensor<T> {
    Tensor::new(volume.mapv(|v| T::cast(v as f64)).into_dyn())
}

/// Brain MR images of one split with their ages. Volumes are loaded and
/// preprocessed on every access.
#[derive(Debug, Clone)]
pub struct BrainAgeImageDataset {
    split: Split,
    config: BrainAgeConfig,
    records: Vec<SubjectRecord>,
}

impl BrainAgeImageDataset {
    pub fn new(split: Split, config: &BrainAgeConfig) -> Result<Self> {
        info!("Loading {} data...", split);
        let records = read_metadata(&config.meta_path(split))?;
        Ok(Self {
            split,
            config: config.clone(),
            records,
        })
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn subject_ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.subject_id.as_str())
    }

    pub fn ages(&self) -> impl Iterator<Item = f64> + '_ {
        self.records.iter().map(|r| r.age)
    }
}

impl<T> Dataset<T> for BrainAgeImageDataset
where
    T: Float,
{
    /// Returns the image as `[1, H, W, D]` and the age as `[1]`.
    fn get_item(&self, index: usize) -> Result<(Tensor<T>, Tensor<T>)> {
        let record = self.records.get(index).ok_or_else(|| {
            BrainAgeError::Shape(format!(
                "Index {} out of bounds for {} split of {} subjects",
                index,
                self.split,
                self.records.len()
            ))
        })?;

        let img = load_and_preprocess(&self.config, &record.subject_id)?;
        let image = volume_to_tensor(img.insert_axis(Axis(0)));
        let age = Tensor::from_vec(vec![T::cast(record.age)], &[1])?;
        Ok((image, age))
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Loads and preprocesses every subject, stacked as `[N, 1, S, S, S]`.
/// Runs on a rayon pool of `num_workers` threads when that is non-zero.
/// No ids gives an empty `[0, 1, S, S, S]` tensor, with `S = 0` at native size.
pub fn prefetch_samples<T: Float>(config: &BrainAgeConfig, ids: &[String]) -> Result<Tensor<T>> {
    if ids.is_empty() {
        let s = config.target_size().unwrap_or(0);
        return Ok(Tensor::zeros(&[0, 1, s, s, s]));
    }
    let load = |id: &String| load_and_preprocess(config, id).map(volume_to_tensor::<T, _>);

    let volumes = if config.num_workers > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_workers)
            .build()
            .map_err(|e| BrainAgeError::Config(format!("failed to build worker pool: {}", e)))?;
        pool.install(|| ids.par_iter().map(load).collect::<Result<Vec<_>>>())?
    } else {
        ids.iter().map(load).collect::<Result<Vec<_>>>()?
    };

    let stacked = Tensor::stack(&volumes)?;
    let mut shape = stacked.shape().to_vec();
    shape.insert(1, 1);
    Ok(stacked.reshape(&shape)?)
}

/// Subject id encoded in a segmentation file name,
/// e.g. `.../sub-CC110033_T1w_brain_seg.nii.gz` -> `CC110033`.
pub fn subject_id_from_path(path: &Path) -> Result<String> {
    let full = path.to_string_lossy();
    let stem = full.split("_brain_").next().unwrap_or_default();
    let base = stem.rsplit('/').next().unwrap_or_default();
    base.split('-')
        .nth(1)
        .and_then(|rest| rest.split('_').next())
        .map(str::to_string)
        .ok_or_else(|| {
            BrainAgeError::Config(format!(
                "cannot parse a subject id from {}",
                path.display()
            ))
        })
}

/// Loads every segmentation volume together with its subject id.
/// Returns the ids and the volumes stacked as `[N, H, W, D]`.
pub fn load_segmentations(paths: &[PathBuf]) -> Result<(Vec<String>, Array4<f32>)> {
    let pb = progress_bar(paths.len() as u64, "segmentations");
    let mut ids = Vec::with_capacity(paths.len());
    let mut volumes = Vec::with_capacity(paths.len());
    for path in paths {
        ids.push(subject_id_from_path(path)?);
        volumes.push(load_nii(path)?);
        pb.inc(1);
    }
    pb.finish_and_clear();

    if let Some(first) = volumes.first() {
        if let Some(other) = volumes.iter().find(|v| v.dim() != first.dim()) {
            return Err(BrainAgeError::Shape(format!(
                "segmentations differ in shape: {:?} vs {:?}",
                first.dim(),
                other.dim()
            )));
        }
    }

    let views: Vec<_> = volumes.iter().map(|v| v.view()).collect();
    let stacked = if views.is_empty() {
        Array4::zeros((0, 0, 0, 0))
    } else {
        ndarray::stack(Axis(0), &views)
            .map_err(|e| BrainAgeError::Shape(format!("failed to stack segmentations: {}", e)))?
    };
    Ok((ids, stacked))
}
