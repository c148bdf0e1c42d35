// unary.rs
// Element-wise unary functions.

use crate::backend::{Float, Tensor};
use crate::ops::{check_inputs, Operator};

/// Rectified linear unit: output = max(0, input)
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl<T> Operator<T> for ReLU
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("ReLU", inputs, 1)?;
        Ok(inputs[0].relu())
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("ReLU", inputs, 1)?;
        // Gradient is 1 where input > 0, else 0
        let mask = inputs[0].relu_mask();
        Ok(vec![grad_output.mul(&mask)?])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(*self)
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

/// Square root: output = sqrt(input)
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqrt;

impl<T> Operator<T> for Sqrt
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Sqrt", inputs, 1)?;
        Ok(inputs[0].sqrt())
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Sqrt", inputs, 1)?;
        // d/dx sqrt(x) = 1 / (2 sqrt(x))
        let denom = output.mul_scalar(T::cast(2.0));
        Ok(vec![grad_output.div(&denom)?])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(*self)
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

/// Absolute value: output = |input|
/// Uses sign(0) = 0 as the subgradient at the kink.
#[derive(Debug, Clone, Copy, Default)]
pub struct Abs;

impl<T> Operator<T> for Abs
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Abs", inputs, 1)?;
        Ok(inputs[0].abs())
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Abs", inputs, 1)?;
        Ok(vec![grad_output.mul(&inputs[0].sign())?])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(*self)
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::{check_gradient, seq};

    #[test]
    fn test_relu_forward_and_gradient() {
        let x = Tensor::from_vec(vec![-1.0f32, 0.0, 2.0], &[3]).unwrap();
        let relu: &dyn Operator<f32> = &ReLU;
        let out = relu.compute(&[&x]).unwrap();
        assert_eq!(out.to_vec(), vec![0.0, 0.0, 2.0]);
        let grad = relu.gradient(Tensor::ones(&[3]), &[&x], &out).unwrap();
        assert_eq!(grad[0].to_vec(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unary_gradients() {
        // keep values away from the kinks at zero
        let x = seq(&[3, 2], 0.3, 0.05);
        check_gradient(&ReLU, &[x.clone()], 1e-6);
        check_gradient(&Abs, &[x], 1e-6);
        let positive = seq(&[4], 0.1, 1.0);
        check_gradient(&Sqrt, &[positive], 1e-6);
    }
}
