// pooling.rs
// Volumetric pooling operators.

use crate::backend::{Float, Tensor};
use crate::ops::{check_inputs, Operator};

/// Max pooling with a cubic window and stride equal to the window.
#[derive(Debug, Clone, Copy)]
pub struct MaxPool3d {
    pub kernel_size: usize,
}

impl MaxPool3d {
    pub fn new(kernel_size: usize) -> Self {
        Self { kernel_size }
    }
}

impl<T> Operator<T> for MaxPool3d
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("MaxPool3d", inputs, 1)?;
        inputs[0].max_pool3d(self.kernel_size)
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("MaxPool3d", inputs, 1)?;
        Ok(vec![inputs[0].max_pool3d_backward(&grad_output, self.kernel_size)?])
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(*self)
    }
}

/// Adaptive average pooling to a fixed [d, h, w] output.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveAvgPool3d {
    pub output_size: [usize; 3],
}

impl AdaptiveAvgPool3d {
    pub fn new(output_size: [usize; 3]) -> Self {
        Self { output_size }
    }

    /// Same size along every spatial axis.
    pub fn cubic(size: usize) -> Self {
        Self::new([size; 3])
    }
}

impl<T> Operator<T> for AdaptiveAvgPool3d
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("AdaptiveAvgPool3d", inputs, 1)?;
        inputs[0].adaptive_avg_pool3d(self.output_size)
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("AdaptiveAvgPool3d", inputs, 1)?;
        Ok(vec![grad_output.adaptive_avg_pool3d_backward(inputs[0].shape())?])
    }

    fn num_inputs(&self) -> usize {
        1
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
    fn test_pooling_gradients() {
        // distinct values so the argmax is stable under the finite difference
        let n = 2 * 4 * 4 * 5;
        let data: Vec<f64> = (0..n).map(|i| ((i * 53) % n) as f64 * 0.01).collect();
        let x = Tensor::from_vec(data, &[1, 2, 4, 4, 5]).unwrap();
        check_gradient(&MaxPool3d::new(2), &[x], 1e-6);

        let x = seq(&[2, 1, 5, 3, 4], 0.2, 0.1);
        check_gradient(&AdaptiveAvgPool3d::new([2, 3, 3]), &[x.clone()], 1e-6);
        check_gradient(&AdaptiveAvgPool3d::cubic(1), &[x], 1e-6);
    }
}
