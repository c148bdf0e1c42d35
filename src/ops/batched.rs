// batched.rs
// Operators over batched volumetric tensors [batch, channels, d, h, w].

use crate::backend::{Float, Tensor};
use crate::ops::{check_inputs, Operator};

/// 3D convolution with unit stride and symmetric zero padding.
/// Inputs: [input [N, C, D, H, W], filter [O, C, kd, kh, kw]].
#[derive(Debug, Clone, Copy)]
pub struct Conv3d {
    pub padding: usize,
}

impl Conv3d {
    pub fn new(padding: usize) -> Self {
        Self { padding }
    }
}

impl<T> Operator<T> for Conv3d
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Conv3d", inputs, 2)?;
        inputs[0].conv3d(inputs[1], self.padding)
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Conv3d", inputs, 2)?;
        let (input, filter) = (inputs[0], inputs[1]);

        let grad_input =
            grad_output.conv3d_backward_input(filter, input.shape(), self.padding)?;
        let grad_filter =
            input.conv3d_backward_weight(&grad_output, filter.shape(), self.padding)?;

        Ok(vec![grad_input, grad_filter])
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::{check_gradient, seq};

    #[test]
    fn test_conv3d_same_padding_shape() {
        let x = Tensor::<f32>::ones(&[2, 1, 4, 5, 3]);
        let w = Tensor::<f32>::ones(&[4, 1, 3, 3, 3]);
        let op: &dyn Operator<f32> = &Conv3d::new(1);
        let y = op.compute(&[&x, &w]).unwrap();
        assert_eq!(y.shape(), &[2, 4, 4, 5, 3]);
        // interior voxel sees the full 27-voxel neighbourhood
        assert_eq!(y.data()[&[0, 0, 1, 1, 1][..]], 27.0);
        // corner sees 2 * 2 * 2
        assert_eq!(y.data()[&[1, 3, 0, 0, 0][..]], 8.0);
    }

    #[test]
    fn test_conv3d_gradients() {
        let x = seq(&[1, 2, 3, 4, 3], 0.3, 0.0);
        let w = seq(&[2, 2, 3, 3, 3], 0.1, 0.05);
        check_gradient(&Conv3d::new(1), &[x.clone(), w.clone()], 1e-5);
        check_gradient(&Conv3d::new(0), &[x, w], 1e-5);
    }
}
