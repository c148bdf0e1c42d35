// src/imaging/resize.rs
// Trilinear volume resampling with Gaussian anti-aliasing.
//
// Coordinates use pixel-centre alignment and out-of-range samples mirror
// about the edge voxel (d c b | a b c d | c b a), matching
// skimage.transform.resize with its defaults.

use crate::error::{BrainAgeError, Result};
use ndarray::{Array3, ArrayViewMut1, Axis, Zip};

/// Gaussian kernels are truncated at this many standard deviations.
const TRUNCATE: f64 = 4.0;

/// Resamples `img` to `out_shape`.
pub fn resize(img: &Array3<f32>, out_shape: [usize; 3]) -> Result<Array3<f32>> {
    let in_shape = [img.dim().0, img.dim().1, img.dim().2];
    if in_shape.contains(&0) || out_shape.contains(&0) {
        return Err(BrainAgeError::Shape(format!(
            "cannot resize {:?} to {:?}",
            in_shape, out_shape
        )));
    }
    if in_shape == out_shape {
        return Ok(img.clone());
    }

    let (min, max) = img
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let mut work = img.mapv(f64::from);
    for axis in 0..3 {
        let factor = in_shape[axis] as f64 / out_shape[axis] as f64;
        let sigma = ((factor - 1.0) / 2.0).max(0.0);
        if sigma > 0.0 {
            gaussian_filter_axis(&mut work, Axis(axis), sigma);
        }
    }
    for axis in 0..3 {
        work = linear_resample_axis(&work, Axis(axis), out_shape[axis]);
    }

    Ok(work.mapv(|v| (v as f32).clamp(min, max)))
}

/// Maps any integer index into `0..n` by mirroring about the edge samples.
fn mirror_index(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let i = i.rem_euclid(period);
    if i < n as isize {
        i as usize
    } else {
        (period - i) as usize
    }
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x * x) as f64 / (sigma * sigma)).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// 1D Gaussian smoothing of every lane along `axis`.
fn gaussian_filter_axis(volume: &mut Array3<f64>, axis: Axis, sigma: f64) {
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;
    let n = volume.len_of(axis);
    let mut line = vec![0.0; n];

    for mut lane in volume.lanes_mut(axis) {
        line.iter_mut().zip(lane.iter()).for_each(|(dst, &src)| *dst = src);
        for (i, out) in lane.iter_mut().enumerate() {
            *out = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * line[mirror_index(i as isize + k as isize - radius, n)])
                .sum();
        }
    }
}

/// Source index pair and weight of the second sample for every output index.
fn linear_taps(n_in: usize, n_out: usize) -> Vec<(usize, usize, f64)> {
    let scale = n_in as f64 / n_out as f64;
    (0..n_out)
        .map(|j| {
            let x = (j as f64 + 0.5) * scale - 0.5;
            let i0 = x.floor();
            let t = x - i0;
            let i0 = i0 as isize;
            (mirror_index(i0, n_in), mirror_index(i0 + 1, n_in), t)
        })
        .collect()
}

fn linear_resample_axis(volume: &Array3<f64>, axis: Axis, n_out: usize) -> Array3<f64> {
    let n_in = volume.len_of(axis);
    let mut shape = [volume.dim().0, volume.dim().1, volume.dim().2];
    shape[axis.index()] = n_out;
    let mut out = Array3::zeros(shape);
    if n_in == n_out {
        out.assign(volume);
        return out;
    }

    let taps = linear_taps(n_in, n_out);
    Zip::from(out.lanes_mut(axis))
        .and(volume.lanes(axis))
        .for_each(|mut dst: ArrayViewMut1<f64>, src| {
            for (value, &(i0, i1, t)) in dst.iter_mut().zip(&taps) {
                *value = (1.0 - t) * src[i0] + t * src[i1];
            }
        });
    out
}

/// Resizes to a cube of edge `size`.
pub fn resize_cubic(img: &Array3<f32>, size: usize) -> Result<Array3<f32>> {
    resize(img, [size; 3])
}
