// src/imaging/mod.rs
// MRI volume loading and preprocessing.

pub mod normalize;
pub mod resize;
pub mod volume;

pub use normalize::normalize;
pub use resize::{resize, resize_cubic};
pub use volume::{load_mask, load_nii};

use crate::config::BrainAgeConfig;
use crate::error::Result;
use ndarray::Array3;

/// Normalizes inside the mask, then resizes to a cube of edge `img_size`
/// unless resizing is disabled (`0` or `-1`).
pub fn preprocess(img: &Array3<f32>, mask: &Array3<i32>, img_size: i64) -> Result<Array3<f32>> {
    let normalized = normalize(img, mask)?;
    match img_size {
        0 | -1 => Ok(normalized),
        size if size > 0 => resize_cubic(&normalized, size as usize),
        size => Err(crate::error::BrainAgeError::Config(format!(
            "img_size must be positive, 0 or -1, got {}",
            size
        ))),
    }
}

/// Loads a subject's image and brain mask from the configured locations and
/// preprocesses them.
pub fn load_and_preprocess(config: &BrainAgeConfig, subject_id: &str) -> Result<Array3<f32>> {
    let img = load_nii(&config.image_path(subject_id))?;
    let mask = load_mask(&config.mask_path(subject_id))?;
    preprocess(&img, &mask, config.img_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_resizes_unless_disabled() {
        let img = Array3::from_shape_fn((6, 5, 4), |(x, y, z)| (x + y + z) as f32);
        let mask = Array3::from_elem((6, 5, 4), 1);

        assert_eq!(preprocess(&img, &mask, 3).unwrap().dim(), (3, 3, 3));
        assert_eq!(preprocess(&img, &mask, 0).unwrap().dim(), (6, 5, 4));
        assert_eq!(preprocess(&img, &mask, -1).unwrap().dim(), (6, 5, 4));
        assert!(preprocess(&img, &mask, -4).is_err());
    }
}
