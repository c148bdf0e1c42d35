// scalar.rs
// Operations between a tensor and a fixed scalar.

use crate::backend::{Float, Tensor};
use crate::ops::{check_inputs, Operator};

/// Scalar addition: output = input + scalar
#[derive(Debug, Clone)]
pub struct AddScalar<T: Float> {
    scalar: T,
}

impl<T> AddScalar<T>
where
    T: Float,
{
    pub fn new(scalar: T) -> Self {
        Self { scalar }
    }
}

impl<T> Operator<T> for AddScalar<T>
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("AddScalar", inputs, 1)?;
        Ok(inputs[0].add_scalar(self.scalar))
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("AddScalar", inputs, 1)?;
        // d/dx(x + c) = 1
        Ok(vec![grad_output])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

/// Scalar multiplication: output = input * scalar
#[derive(Debug, Clone)]
pub struct MulScalar<T: Float> {
    scalar: T,
}

impl<T> MulScalar<T>
where
    T: Float,
{
    pub fn new(scalar: T) -> Self {
        Self { scalar }
    }
}

impl<T> Operator<T> for MulScalar<T>
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("MulScalar", inputs, 1)?;
        Ok(inputs[0].mul_scalar(self.scalar))
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("MulScalar", inputs, 1)?;
        // d/dx(x * c) = c
        Ok(vec![grad_output.mul_scalar(self.scalar)])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(self.clone())
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
    fn test_scalar_ops() {
        let x = Tensor::from_vec(vec![1.0f32, -2.0], &[2]).unwrap();
        let op = AddScalar::new(0.5f32);
        assert_eq!(op.compute(&[&x]).unwrap().to_vec(), vec![1.5, -1.5]);
        let op = MulScalar::new(-3.0f32);
        assert_eq!(op.compute(&[&x]).unwrap().to_vec(), vec![-3.0, 6.0]);
    }

    #[test]
    fn test_scalar_gradients() {
        let x = seq(&[2, 2], 0.4, 0.0);
        check_gradient(&AddScalar::new(2.0), &[x.clone()], 1e-6);
        check_gradient(&MulScalar::new(-1.5), &[x], 1e-6);
    }
}
