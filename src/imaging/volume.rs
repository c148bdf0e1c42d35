// src/imaging/volume.rs
// NIfTI-1 volume loading.

use crate::error::{BrainAgeError, Result};
use ndarray::Array3;
use nifti::{InMemNiftiVolume, IntoNdArray, NiftiObject, NiftiVolume, ReaderOptions};
use std::path::Path;
use tracing::debug;

/// Loads a 3D volume as `f32`, with the header scaling applied.
/// Axes follow the file's dim order, i.e. `(H, W, D)`.
pub fn load_nii(path: &Path) -> Result<Array3<f32>> {
    let volume = ReaderOptions::new().read_file(path)?.into_volume();
    let array = volume_to_array(volume, path)?;
    debug!(path = %path.display(), shape = ?array.dim(), "loaded volume");
    Ok(array)
}

/// Loads an integer mask from any stored type. Values are truncated toward zero.
pub fn load_mask(path: &Path) -> Result<Array3<i32>> {
    Ok(load_nii(path)?.mapv(|v| v as i32))
}

/// Rescales and casts every voxel to `f32`, then squeezes to three axes.
fn volume_to_array(volume: InMemNiftiVolume, path: &Path) -> Result<Array3<f32>> {
    let shape = spatial_shape(volume.dim(), path)?;
    let scaled = volume.into_ndarray::<f32>()?;
    // logical order, whatever the memory layout
    let data: Vec<f32> = scaled.iter().copied().collect();
    Array3::from_shape_vec(shape, data)
        .map_err(|e| BrainAgeError::Shape(format!("voxel count does not match header: {}", e)))
}

/// Spatial shape of a volume. Trailing singleton dimensions are ignored.
fn spatial_shape(dim: &[u16], path: &Path) -> Result<(usize, usize, usize)> {
    let mut dims: Vec<usize> = dim.iter().map(|&d| d as usize).collect();
    while dims.len() > 3 && dims.last() == Some(&1) {
        dims.pop();
    }
    match dims.as_slice() {
        &[h, w, d] => Ok((h, w, d)),
        other => Err(BrainAgeError::Shape(format!(
            "{} is not a 3D volume (dims {:?})",
            path.display(),
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nifti::{Endianness, NiftiType};

    fn raw_dim(shape: &[u16]) -> [u16; 8] {
        let mut dim = [1u16; 8];
        dim[0] = shape.len() as u16;
        dim[1..=shape.len()].copy_from_slice(shape);
        dim
    }

    fn volume_f32(shape: &[u16], values: &[f32], slope: f32, inter: f32) -> InMemNiftiVolume {
        let raw = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        InMemNiftiVolume::from_raw_fields(
            raw_dim(shape),
            NiftiType::Float32,
            slope,
            inter,
            raw,
            Endianness::Little,
        )
        .unwrap()
    }

    #[test]
    fn test_fortran_order_is_respected() {
        // value = x + 10 y + 100 z laid out x-fastest
        let mut data = Vec::new();
        for z in 0..2 {
            for y in 0..3 {
                for x in 0..4 {
                    data.push((x + 10 * y + 100 * z) as f32);
                }
            }
        }
        let volume = volume_to_array(volume_f32(&[4, 3, 2], &data, 1.0, 0.0), Path::new("x.nii")).unwrap();
        assert_eq!(volume.dim(), (4, 3, 2));
        assert_eq!(volume[[3, 1, 0]], 13.0);
        assert_eq!(volume[[2, 2, 1]], 122.0);
        assert!(volume.is_standard_layout());
    }

    #[test]
    fn test_header_scaling_is_applied() {
        let volume = volume_f32(&[2, 1, 1], &[1.0, 3.0], 2.0, 10.0);
        let loaded = volume_to_array(volume, Path::new("x.nii")).unwrap();
        assert_eq!(loaded.iter().copied().collect::<Vec<_>>(), vec![12.0, 16.0]);
    }

    #[test]
    fn test_int16_storage_is_scaled_to_f32() {
        let values: [i16; 4] = [-3, 0, 7, 100];
        let raw = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let volume = InMemNiftiVolume::from_raw_fields(
            raw_dim(&[4, 1, 1, 1]),
            NiftiType::Int16,
            0.5,
            -1.0,
            raw,
            Endianness::Little,
        )
        .unwrap();
        let loaded = volume_to_array(volume, Path::new("x.nii")).unwrap();
        assert_eq!(loaded.dim(), (4, 1, 1));
        assert_eq!(
            loaded.iter().copied().collect::<Vec<_>>(),
            vec![-2.5, -1.0, 2.5, 49.0]
        );
    }

    #[test]
    fn test_spatial_shape() {
        let path = Path::new("x.nii");
        assert_eq!(spatial_shape(&[4, 5, 6], path).unwrap(), (4, 5, 6));
        assert_eq!(spatial_shape(&[4, 5, 6, 1], path).unwrap(), (4, 5, 6));
        assert!(spatial_shape(&[4, 5], path).is_err());
        assert!(spatial_shape(&[4, 5, 6, 2], path).is_err());
    }
}
