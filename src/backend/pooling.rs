// src/backend/pooling.rs
// Volumetric pooling kernels over [batch, channels, d0, d1, d2] tensors.

use crate::backend::number::Float;
use crate::backend::tensor::Tensor;
use rayon::prelude::*;

fn spatial_dims(shape: &[usize], op: &str) -> Result<(usize, [usize; 3]), String> {
    if shape.len() != 5 {
        return Err(format!(
            "{op} requires 5D input [batch, channels, d, h, w], got {:?}",
            shape
        ));
    }
    Ok((shape[0] * shape[1], [shape[2], shape[3], shape[4]]))
}

/// Start/end of adaptive pooling window `i` when mapping `input` cells onto `output` cells.
fn adaptive_window(i: usize, input: usize, output: usize) -> (usize, usize) {
    let start = (i * input) / output;
    let end = ((i + 1) * input).div_ceil(output);
    (start, end)
}

impl<T> Tensor<T>
where
    T: Float,
{
    /// Max pooling with a cubic window and stride equal to the window.
    /// Trailing voxels that don't fill a full window are dropped.
    pub fn max_pool3d(&self, kernel: usize) -> Result<Self, String> {
        let (planes, [d, h, w]) = spatial_dims(self.shape(), "MaxPool3d")?;
        if kernel == 0 {
            return Err("MaxPool3d kernel size must be positive".to_string());
        }
        let (od, oh, ow) = (d / kernel, h / kernel, w / kernel);
        if od == 0 || oh == 0 || ow == 0 {
            return Err(format!(
                "MaxPool3d kernel {} is larger than input {:?}",
                kernel,
                &self.shape()[2..]
            ));
        }

        let input = self.as_slice()?;
        let in_plane = d * h * w;
        let out_plane = od * oh * ow;
        let mut output = vec![T::zero(); planes * out_plane];

        output
            .par_chunks_mut(out_plane)
            .enumerate()
            .for_each(|(p, out)| {
                let src = &input[p * in_plane..][..in_plane];
                for z in 0..od {
                    for y in 0..oh {
                        for x in 0..ow {
                            let mut best = T::neg_infinity();
                            for kz in 0..kernel {
                                for ky in 0..kernel {
                                    let row = ((z * kernel + kz) * h + y * kernel + ky) * w;
                                    for kx in 0..kernel {
                                        let v = src[row + x * kernel + kx];
                                        // NaN wins so divergence reaches the loss
                                        if v > best || (v.is_nan() && !best.is_nan()) {
                                            best = v;
                                        }
                                    }
                                }
                            }
                            out[(z * oh + y) * ow + x] = best;
                        }
                    }
                }
            });

        let mut shape = self.shape().to_vec();
        shape[2] = od;
        shape[3] = oh;
        shape[4] = ow;
        Tensor::from_vec(output, &shape)
    }

    /// Routes every upstream gradient to the first maximal element of its window.
    /// `self` is the forward input.
    pub fn max_pool3d_backward(&self, grad_output: &Self, kernel: usize) -> Result<Self, String> {
        let (planes, [d, h, w]) = spatial_dims(self.shape(), "MaxPool3d")?;
        let (od, oh, ow) = (d / kernel, h / kernel, w / kernel);
        let expected = [self.shape()[0], self.shape()[1], od, oh, ow];
        if grad_output.shape() != expected {
            return Err(format!(
                "MaxPool3d gradient shape {:?} doesn't match expected {:?}",
                grad_output.shape(),
                expected
            ));
        }

        let input = self.as_slice()?;
        let grad = grad_output.as_slice()?;
        let in_plane = d * h * w;
        let out_plane = od * oh * ow;
        let mut grad_in = vec![T::zero(); planes * in_plane];

        grad_in
            .par_chunks_mut(in_plane)
            .enumerate()
            .for_each(|(p, dst)| {
                let src = &input[p * in_plane..][..in_plane];
                let g = &grad[p * out_plane..][..out_plane];
                for z in 0..od {
                    for y in 0..oh {
                        for x in 0..ow {
                            let mut best = T::neg_infinity();
                            let mut best_idx = None;
                            for kz in 0..kernel {
                                for ky in 0..kernel {
                                    let row = ((z * kernel + kz) * h + y * kernel + ky) * w;
                                    for kx in 0..kernel {
                                        let idx = row + x * kernel + kx;
                                        let v = src[idx];
                                        if best_idx.is_none()
                                            || v > best
                                            || (v.is_nan() && !best.is_nan())
                                        {
                                            best = v;
                                            best_idx = Some(idx);
                                        }
                                    }
                                }
                            }
                            if let Some(idx) = best_idx {
                                dst[idx] += g[(z * oh + y) * ow + x];
                            }
                        }
                    }
                }
            });

        Tensor::from_vec(grad_in, self.shape())
    }

    /// Adaptive average pooling to a fixed spatial output size.
    pub fn adaptive_avg_pool3d(&self, output_size: [usize; 3]) -> Result<Self, String> {
        let (planes, [d, h, w]) = spatial_dims(self.shape(), "AdaptiveAvgPool3d")?;
        let [od, oh, ow] = output_size;
        if od == 0 || oh == 0 || ow == 0 || d == 0 || h == 0 || w == 0 {
            return Err(format!(
                "AdaptiveAvgPool3d needs non-empty input and output, got {:?} -> {:?}",
                &self.shape()[2..],
                output_size
            ));
        }

        let input = self.as_slice()?;
        let in_plane = d * h * w;
        let out_plane = od * oh * ow;
        let mut output = vec![T::zero(); planes * out_plane];

        output
            .par_chunks_mut(out_plane)
            .enumerate()
            .for_each(|(p, out)| {
                let src = &input[p * in_plane..][..in_plane];
                for z in 0..od {
                    let (z0, z1) = adaptive_window(z, d, od);
                    for y in 0..oh {
                        let (y0, y1) = adaptive_window(y, h, oh);
                        for x in 0..ow {
                            let (x0, x1) = adaptive_window(x, w, ow);
                            let mut sum = T::zero();
                            for zi in z0..z1 {
                                for yi in y0..y1 {
                                    let row = (zi * h + yi) * w;
                                    sum += src[row + x0..row + x1].iter().copied().sum::<T>();
                                }
                            }
                            let count = (z1 - z0) * (y1 - y0) * (x1 - x0);
                            out[(z * oh + y) * ow + x] = sum / T::from_usize(count);
                        }
                    }
                }
            });

        let mut shape = self.shape().to_vec();
        shape[2..].copy_from_slice(&output_size);
        Tensor::from_vec(output, &shape)
    }

    /// Gradient of [`Tensor::adaptive_avg_pool3d`]. `self` is the upstream gradient.
    pub fn adaptive_avg_pool3d_backward(&self, input_shape: &[usize]) -> Result<Self, String> {
        let (planes, [d, h, w]) = spatial_dims(input_shape, "AdaptiveAvgPool3d")?;
        let (_, [od, oh, ow]) = spatial_dims(self.shape(), "AdaptiveAvgPool3d")?;
        if self.shape()[..2] != input_shape[..2] {
            return Err(format!(
                "AdaptiveAvgPool3d gradient shape {:?} incompatible with input {:?}",
                self.shape(),
                input_shape
            ));
        }

        let grad = self.as_slice()?;
        let in_plane = d * h * w;
        let out_plane = od * oh * ow;
        let mut grad_in = vec![T::zero(); planes * in_plane];

        grad_in
            .par_chunks_mut(in_plane.max(1))
            .enumerate()
            .for_each(|(p, dst)| {
                let g = &grad[p * out_plane..][..out_plane];
                for z in 0..od {
                    let (z0, z1) = adaptive_window(z, d, od);
                    for y in 0..oh {
                        let (y0, y1) = adaptive_window(y, h, oh);
                        for x in 0..ow {
                            let (x0, x1) = adaptive_window(x, w, ow);
                            let count = (z1 - z0) * (y1 - y0) * (x1 - x0);
                            let share = g[(z * oh + y) * ow + x] / T::from_usize(count);
                            for zi in z0..z1 {
                                for yi in y0..y1 {
                                    let row = (zi * h + yi) * w;
                                    for v in &mut dst[row + x0..row + x1] {
                                        *v += share;
                                    }
                                }
                            }
                        }
                    }
                }
            });

        Tensor::from_vec(grad_in, input_shape)
    }
}
