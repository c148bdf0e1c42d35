// src/config.rs
// Run configuration: data locations, preprocessing and training hyperparameters.

use crate::error::{BrainAgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Dataset split, each backed by its own metadata CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Split {
    type Err = BrainAgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Split::Train),
            "val" => Ok(Split::Val),
            "test" => Ok(Split::Test),
            other => Err(BrainAgeError::Config(format!(
                "unknown split '{}', expected train, val or test",
                other
            ))),
        }
    }
}

/// Metadata CSV file names, relative to `<data_dir>/meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaFiles {
    pub train: String,
    pub val: String,
    pub test: String,
}

impl Default for MetaFiles {
    fn default() -> Self {
        Self {
            train: "meta_data_regression_train.csv".to_string(),
            val: "meta_data_segmentation_train.csv".to_string(),
            test: "meta_data_regression_test.csv".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainAgeConfig {
    pub data_dir: PathBuf,
    /// Edge length of the cubic network input. `0` or `-1` keep the native size.
    pub img_size: i64,
    pub batch_size: usize,
    pub num_workers: usize,
    pub shuffle_seed: Option<u64>,
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub optimizer: String,
    pub momentum: f64,
    pub loss: String,
    pub feats: usize,
    pub adap_pool: usize,
    pub checkpoint_path: PathBuf,
    pub log_every: usize,
    pub image_pattern: String,
    pub mask_pattern: String,
    pub meta_files: MetaFiles,
}

impl Default for BrainAgeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/brain_age"),
            img_size: 96,
            batch_size: 8,
            num_workers: 0,
            shuffle_seed: None,
            epochs: 20,
            learning_rate: 1e-3,
            weight_decay: 0.0,
            optimizer: "adam".to_string(),
            momentum: 0.9,
            loss: "mse".to_string(),
            feats: 16,
            adap_pool: 8,
            checkpoint_path: PathBuf::from("brain_age_cnn.ckpt"),
            log_every: 10,
            image_pattern: "images/sub-{id}_T1w_unbiased.nii.gz".to_string(),
            mask_pattern: "masks/sub-{id}_T1w_brain_mask.nii.gz".to_string(),
            meta_files: MetaFiles::default(),
        }
    }
}

impl BrainAgeConfig {
    /// Reads a JSON config. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BrainAgeError::Config("batch_size must be positive".into()));
        }
        if self.epochs == 0 {
            return Err(BrainAgeError::Config("epochs must be positive".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(BrainAgeError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.img_size < -1 {
            return Err(BrainAgeError::Config(format!(
                "img_size must be positive, 0 or -1, got {}",
                self.img_size
            )));
        }
        if self.feats == 0 || self.adap_pool == 0 {
            return Err(BrainAgeError::Config(
                "feats and adap_pool must be positive".into(),
            ));
        }
        if !matches!(self.optimizer.as_str(), "adam" | "sgd") {
            return Err(BrainAgeError::Config(format!(
                "unknown optimizer '{}', expected adam or sgd",
                self.optimizer
            )));
        }
        if !matches!(self.loss.as_str(), "mse" | "l1") {
            return Err(BrainAgeError::Config(format!(
                "unknown loss '{}', expected mse or l1",
                self.loss
            )));
        }
        Ok(())
    }

    /// Target volume edge length, or `None` when resizing is disabled.
    pub fn target_size(&self) -> Option<usize> {
        match self.img_size {
            0 | -1 => None,
            size => usize::try_from(size).ok(),
        }
    }

    pub fn meta_path(&self, split: Split) -> PathBuf {
        let file = match split {
            Split::Train => &self.meta_files.train,
            Split::Val => &self.meta_files.val,
            Split::Test => &self.meta_files.test,
        };
        self.data_dir.join("meta").join(file)
    }

    pub fn image_path(&self, subject_id: &str) -> PathBuf {
        self.data_dir
            .join(self.image_pattern.replace("{id}", subject_id))
    }

    pub fn mask_path(&self, subject_id: &str) -> PathBuf {
        self.data_dir.join(self.mask_pattern.replace("{id}", subject_id))
    }
}
