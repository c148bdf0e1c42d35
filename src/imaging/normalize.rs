use crate::error::{BrainAgeError, Result};
use ndarray::{Array3, Zip};

/// Instance z-score normalization restricted to the brain.
///
/// Mean and population standard deviation are taken over voxels where
/// `mask != 0`, and only those voxels are rescaled. Background voxels keep
/// their original values. With an empty mask the image is returned as is;
/// with a constant brain region only the mean is removed.
pub fn normalize(img: &Array3<f32>, mask: &Array3<i32>) -> Result<Array3<f32>> {
    if img.dim() != mask.dim() {
        return Err(BrainAgeError::Shape(format!(
            "image {:?} and mask {:?} differ",
            img.dim(),
            mask.dim()
        )));
    }

    let mut count = 0usize;
    let mut sum = 0.0f64;
    Zip::from(img).and(mask).for_each(|&v, &m| {
        if m != 0 {
            count += 1;
            sum += v as f64;
        }
    });

    let mut normalized = img.clone();
    if count == 0 {
        return Ok(normalized);
    }

    let mean = sum / count as f64;
    let mut sq_dev = 0.0f64;
    Zip::from(img).and(mask).for_each(|&v, &m| {
        if m != 0 {
            let d = v as f64 - mean;
            sq_dev += d * d;
        }
    });
    let std = (sq_dev / count as f64).sqrt();
    let scale = if std > 0.0 { 1.0 / std } else { 1.0 };

    Zip::from(&mut normalized).and(mask).for_each(|v, &m| {
        if m != 0 {
            *v = ((*v as f64 - mean) * scale) as f32;
        }
    });
    Ok(normalized)
}
