#![allow(dead_code)]

use brainage::config::{BrainAgeConfig, MetaFiles, Split};
use ndarray::Array3;
use nifti::writer::WriterOptions;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn to_nifti_array<A: Clone>(volume: &Array3<A>) -> ndarray_nifti::Array3<A> {
    ndarray_nifti::Array3::from_shape_vec(volume.dim(), volume.iter().cloned().collect()).unwrap()
}

fn writer(path: &Path) -> WriterOptions<'static> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    WriterOptions::new(path)
}

/// Writes a single-file, uncompressed NIfTI-1 float32 volume.
pub fn write_nifti(path: &Path, volume: &Array3<f32>) {
    writer(path).write_nifti(&to_nifti_array(volume)).unwrap();
}

/// Writes a uint8 volume, the usual storage for brain masks.
pub fn write_nifti_u8(path: &Path, volume: &Array3<u8>) {
    writer(path).write_nifti(&to_nifti_array(volume)).unwrap();
}

/// Box-shaped brain mask with a one-voxel background border.
pub fn box_mask(shape: (usize, usize, usize)) -> Array3<f32> {
    Array3::from_shape_fn(shape, |(x, y, z)| {
        let inside = |i: usize, n: usize| i > 0 && i + 1 < n;
        if inside(x, shape.0) && inside(y, shape.1) && inside(z, shape.2) {
            1.0
        } else {
            0.0
        }
    })
}

pub fn subject_id(split: Split, index: usize) -> String {
    format!("{}{:03}", split.as_str().to_uppercase(), index)
}

/// A data directory with `counts[split]` subjects per split, laid out the way
/// `config` expects, plus the config pointing at it.
pub struct SyntheticData {
    pub dir: TempDir,
    pub config: BrainAgeConfig,
}

impl SyntheticData {
    pub fn new(train: usize, val: usize, test: usize, shape: (usize, usize, usize)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = BrainAgeConfig {
            data_dir: dir.path().to_path_buf(),
            img_size: 8,
            batch_size: 2,
            epochs: 2,
            feats: 2,
            adap_pool: 1,
            shuffle_seed: Some(11),
            checkpoint_path: dir.path().join("checkpoints").join("best.ckpt"),
            image_pattern: "images/sub-{id}_T1w.nii".to_string(),
            mask_pattern: "masks/sub-{id}_mask.nii".to_string(),
            meta_files: MetaFiles {
                train: "train.csv".to_string(),
                val: "val.csv".to_string(),
                test: "test.csv".to_string(),
            },
            ..BrainAgeConfig::default()
        };

        let mut rng = StdRng::seed_from_u64(42);
        let mask = box_mask(shape).mapv(|v| v as u8);
        for (split, count) in [(Split::Train, train), (Split::Val, val), (Split::Test, test)] {
            let mut csv = String::from("subject_id,age,sex\n");
            for i in 0..count {
                let id = subject_id(split, i);
                let age: f64 = rng.random_range(20.0..80.0);
                let brightness = age as f32 / 10.0;
                let image = Array3::from_shape_fn(shape, |_| brightness + rng.random::<f32>());
                write_nifti(&config.image_path(&id), &image);
                write_nifti_u8(&config.mask_path(&id), &mask);
                csv.push_str(&format!("{},{:.1},F\n", id, age));
            }
            let meta = config.meta_path(split);
            fs::create_dir_all(meta.parent().unwrap()).unwrap();
            fs::write(meta, csv).unwrap();
        }

        Self { dir, config }
    }
}
