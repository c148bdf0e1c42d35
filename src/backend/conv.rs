// src/backend/conv.rs
// Direct 3D convolution kernels (stride 1, symmetric zero padding).
// Volumes are [batch, channels, d0, d1, d2]; filters are [out, in, k0, k1, k2].
// Every (batch, channel) output plane is computed independently, so the work
// is split across planes with rayon.

use crate::backend::number::Float;
use crate::backend::tensor::Tensor;
use rayon::prelude::*;

/// Spatial geometry shared by the forward and backward kernels.
#[derive(Debug, Clone, Copy)]
struct ConvGeometry {
    batch: usize,
    in_channels: usize,
    out_channels: usize,
    input: [usize; 3],
    kernel: [usize; 3],
    output: [usize; 3],
    padding: usize,
}

impl ConvGeometry {
    fn new(input_shape: &[usize], filter_shape: &[usize], padding: usize) -> Result<Self, String> {
        if input_shape.len() != 5 {
            return Err(format!(
                "Conv3d input must be 5D [batch, channels, d, h, w], got {:?}",
                input_shape
            ));
        }
        if filter_shape.len() != 5 {
            return Err(format!(
                "Conv3d filter must be 5D [out, in, kd, kh, kw], got {:?}",
                filter_shape
            ));
        }
        if input_shape[1] != filter_shape[1] {
            return Err(format!(
                "Input channels {} don't match filter channels {}",
                input_shape[1], filter_shape[1]
            ));
        }

        let input = [input_shape[2], input_shape[3], input_shape[4]];
        let kernel = [filter_shape[2], filter_shape[3], filter_shape[4]];
        let mut output = [0; 3];
        for axis in 0..3 {
            let padded = input[axis] + 2 * padding;
            if kernel[axis] == 0 || padded < kernel[axis] {
                return Err(format!(
                    "Kernel {:?} does not fit padded input {:?} (padding {})",
                    kernel, input, padding
                ));
            }
            output[axis] = padded - kernel[axis] + 1;
        }

        Ok(Self {
            batch: input_shape[0],
            in_channels: input_shape[1],
            out_channels: filter_shape[0],
            input,
            kernel,
            output,
            padding,
        })
    }

    fn input_plane(&self) -> usize {
        self.input.iter().product()
    }

    fn output_plane(&self) -> usize {
        self.output.iter().product()
    }

    fn kernel_volume(&self) -> usize {
        self.kernel.iter().product()
    }

    /// Output positions along `axis` whose input index `out + k - padding`
    /// lands inside the unpadded input.
    fn valid_range(&self, axis: usize, k: usize) -> std::ops::Range<usize> {
        let pad = self.padding as isize;
        let k = k as isize;
        let start = (pad - k).max(0) as usize;
        let end = (self.input[axis] as isize + pad - k).clamp(0, self.output[axis] as isize) as usize;
        start..end.max(start)
    }

    fn shift(&self, out: usize, k: usize) -> usize {
        out + k - self.padding
    }
}

impl<T> Tensor<T>
where
    T: Float,
{
    /// 3D cross-correlation of `self` [N, C, D, H, W] with `filter` [O, C, kd, kh, kw].
    pub fn conv3d(&self, filter: &Self, padding: usize) -> Result<Self, String> {
        let geo = ConvGeometry::new(self.shape(), filter.shape(), padding)?;
        let input = self.as_slice()?;
        let weights = filter.as_slice()?;

        let in_plane = geo.input_plane();
        let out_plane = geo.output_plane();
        let k_vol = geo.kernel_volume();
        let [_, ih, iw] = geo.input;
        let [_, oh, ow] = geo.output;
        let [k0, k1, k2] = geo.kernel;

        let mut output = vec![T::zero(); geo.batch * geo.out_channels * out_plane];
        output
            .par_chunks_mut(out_plane.max(1))
            .enumerate()
            .for_each(|(plane_idx, out)| {
                let n = plane_idx / geo.out_channels;
                let o = plane_idx % geo.out_channels;
                for c in 0..geo.in_channels {
                    let src = &input[(n * geo.in_channels + c) * in_plane..][..in_plane];
                    let w = &weights[(o * geo.in_channels + c) * k_vol..][..k_vol];
                    for kz in 0..k0 {
                        for ky in 0..k1 {
                            for kx in 0..k2 {
                                let wv = w[(kz * k1 + ky) * k2 + kx];
                                let xs = geo.valid_range(2, kx);
                                if xs.is_empty() {
                                    continue;
                                }
                                for z in geo.valid_range(0, kz) {
                                    let zi = geo.shift(z, kz);
                                    for y in geo.valid_range(1, ky) {
                                        let yi = geo.shift(y, ky);
                                        let dst = &mut out[(z * oh + y) * ow..][..ow];
                                        let row = &src[(zi * ih + yi) * iw..][..iw];
                                        for x in xs.clone() {
                                            dst[x] += wv * row[geo.shift(x, kx)];
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            });

        Tensor::from_vec(
            output,
            &[
                geo.batch,
                geo.out_channels,
                geo.output[0],
                geo.output[1],
                geo.output[2],
            ],
        )
    }

    /// Gradient of [`Tensor::conv3d`] with respect to its input.
    /// `self` is the upstream gradient [N, O, od, oh, ow].
    pub fn conv3d_backward_input(
        &self,
        filter: &Self,
        input_shape: &[usize],
        padding: usize,
    ) -> Result<Self, String> {
        let geo = ConvGeometry::new(input_shape, filter.shape(), padding)?;
        let expected = [
            geo.batch,
            geo.out_channels,
            geo.output[0],
            geo.output[1],
            geo.output[2],
        ];
        if self.shape() != expected {
            return Err(format!(
                "Conv3d gradient shape {:?} doesn't match expected {:?}",
                self.shape(),
                expected
            ));
        }

        let grad_out = self.as_slice()?;
        let weights = filter.as_slice()?;
        let in_plane = geo.input_plane();
        let out_plane = geo.output_plane();
        let k_vol = geo.kernel_volume();
        let [_, ih, iw] = geo.input;
        let [_, oh, ow] = geo.output;
        let [k0, k1, k2] = geo.kernel;

        let mut grad_in = vec![T::zero(); geo.batch * geo.in_channels * in_plane];
        grad_in
            .par_chunks_mut(in_plane.max(1))
            .enumerate()
            .for_each(|(plane_idx, dst)| {
                let n = plane_idx / geo.in_channels;
                let c = plane_idx % geo.in_channels;
                for o in 0..geo.out_channels {
                    let g = &grad_out[(n * geo.out_channels + o) * out_plane..][..out_plane];
                    let w = &weights[(o * geo.in_channels + c) * k_vol..][..k_vol];
                    for kz in 0..k0 {
                        for ky in 0..k1 {
                            for kx in 0..k2 {
                                let wv = w[(kz * k1 + ky) * k2 + kx];
                                let xs = geo.valid_range(2, kx);
                                for z in geo.valid_range(0, kz) {
                                    let zi = geo.shift(z, kz);
                                    for y in geo.valid_range(1, ky) {
                                        let yi = geo.shift(y, ky);
                                        let g_row = &g[(z * oh + y) * ow..][..ow];
                                        let d_row = &mut dst[(zi * ih + yi) * iw..][..iw];
                                        for x in xs.clone() {
                                            d_row[geo.shift(x, kx)] += wv * g_row[x];
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            });

        Tensor::from_vec(grad_in, input_shape)
    }

    /// Gradient of [`Tensor::conv3d`] with respect to the filter.
    /// `self` is the forward input, `grad_output` the upstream gradient.
    pub fn conv3d_backward_weight(
        &self,
        grad_output: &Self,
        filter_shape: &[usize],
        padding: usize,
    ) -> Result<Self, String> {
        let geo = ConvGeometry::new(self.shape(), filter_shape, padding)?;
        let input = self.as_slice()?;
        let grad_out = grad_output.as_slice()?;
        let in_plane = geo.input_plane();
        let out_plane = geo.output_plane();
        let k_vol = geo.kernel_volume();
        let [_, ih, iw] = geo.input;
        let [_, oh, ow] = geo.output;
        let [_, k1, k2] = geo.kernel;

        let mut grad_w = vec![T::zero(); geo.out_channels * geo.in_channels * k_vol];
        grad_w
            .par_chunks_mut(k_vol.max(1))
            .enumerate()
            .for_each(|(pair_idx, dw)| {
                let o = pair_idx / geo.in_channels;
                let c = pair_idx % geo.in_channels;
                for n in 0..geo.batch {
                    let src = &input[(n * geo.in_channels + c) * in_plane..][..in_plane];
                    let g = &grad_out[(n * geo.out_channels + o) * out_plane..][..out_plane];
                    for (k_idx, acc) in dw.iter_mut().enumerate() {
                        let kz = k_idx / (k1 * k2);
                        let ky = (k_idx / k2) % k1;
                        let kx = k_idx % k2;
                        let xs = geo.valid_range(2, kx);
                        let mut sum = T::zero();
                        for z in geo.valid_range(0, kz) {
                            let zi = geo.shift(z, kz);
                            for y in geo.valid_range(1, ky) {
                                let yi = geo.shift(y, ky);
                                let g_row = &g[(z * oh + y) * ow..][..ow];
                                let s_row = &src[(zi * ih + yi) * iw..][..iw];
                                for x in xs.clone() {
                                    sum += g_row[x] * s_row[geo.shift(x, kx)];
                                }
                            }
                        }
                        *acc += sum;
                    }
                }
            });

        Tensor::from_vec(grad_w, filter_shape)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::Tensor;
    use approx::assert_abs_diff_eq;

    fn ramp(shape: &[usize], scale: f64) -> Tensor<f64> {
        let size: usize = shape.iter().product();
        let data = (0..size).map(|i| ((i * 7 % 11) as f64 - 5.0) * scale).collect();
        Tensor::from_vec(data, shape).unwrap()
    }

    #[test]
    fn test_conv3d_identity_kernel_same_padding() {
        let input = ramp(&[1, 1, 3, 4, 5], 1.0);
        let mut w = vec![0.0; 27];
        w[13] = 1.0; // centre tap
        let filter = Tensor::from_vec(w, &[1, 1, 3, 3, 3]).unwrap();
        let out = input.conv3d(&filter, 1).unwrap();
        assert_eq!(out.shape(), input.shape());
        assert_eq!(out.to_vec(), input.to_vec());
    }

    #[test]
    fn test_conv3d_zero_taps_still_see_infinity() {
        let mut data = vec![1.0f32; 27];
        data[13] = f32::INFINITY;
        let input = Tensor::from_vec(data, &[1, 1, 3, 3, 3]).unwrap();
        let mut w = vec![0.0f32; 27];
        w[13] = 1.0;
        let filter = Tensor::from_vec(w, &[1, 1, 3, 3, 3]).unwrap();
        let out = input.conv3d(&filter, 1).unwrap().to_vec();
        assert_eq!(out[13], f32::INFINITY);
        // 0 * inf from the neighbouring taps
        assert!(out[0].is_nan());
    }

    #[test]
    fn test_conv3d_box_filter_counts_neighbours() {
        let input = Tensor::<f32>::ones(&[1, 1, 3, 3, 3]);
        let filter = Tensor::<f32>::ones(&[2, 1, 3, 3, 3]);
        let out = input.conv3d(&filter, 1).unwrap();
        assert_eq!(out.shape(), &[1, 2, 3, 3, 3]);
        let v = out.to_vec();
        assert_eq!(v[13], 27.0); // centre sees the whole cube
        assert_eq!(v[0], 8.0); // corner sees 2x2x2
        assert_eq!(v[27 + 13], 27.0);
    }

    #[test]
    fn test_conv3d_valid_padding_shape() {
        let input = Tensor::<f32>::ones(&[2, 3, 5, 6, 7]);
        let filter = Tensor::<f32>::ones(&[4, 3, 3, 3, 3]);
        let out = input.conv3d(&filter, 0).unwrap();
        assert_eq!(out.shape(), &[2, 4, 3, 4, 5]);
        assert!(out.to_vec().iter().all(|&x| x == 81.0));

        let wrong = Tensor::<f32>::ones(&[4, 2, 3, 3, 3]);
        assert!(input.conv3d(&wrong, 0).is_err());
    }

    /// The backward kernels must satisfy <conv(x, w), g> = <x, dX(g)> = <w, dW(g)>.
    #[test]
    fn test_conv3d_backward_adjoint_identity() {
        let x = ramp(&[2, 2, 4, 3, 5], 0.1);
        let w = ramp(&[3, 2, 3, 3, 3], 0.05);
        let y = x.conv3d(&w, 1).unwrap();
        let g = ramp(y.shape(), 0.2);

        let lhs: f64 = y.to_vec().iter().zip(g.to_vec()).map(|(a, b)| a * b).sum();

        let dx = g.conv3d_backward_input(&w, x.shape(), 1).unwrap();
        let rhs_x: f64 = x.to_vec().iter().zip(dx.to_vec()).map(|(a, b)| a * b).sum();
        assert_abs_diff_eq!(lhs, rhs_x, epsilon = 1e-9);

        let dw = x.conv3d_backward_weight(&g, w.shape(), 1).unwrap();
        let rhs_w: f64 = w.to_vec().iter().zip(dw.to_vec()).map(|(a, b)| a * b).sum();
        assert_abs_diff_eq!(lhs, rhs_w, epsilon = 1e-9);
    }
}
