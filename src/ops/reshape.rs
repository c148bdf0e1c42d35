// reshape.rs
// Shape manipulation operators.

use crate::backend::{Float, Tensor};
use crate::ops::basic::reduce_gradient_for_broadcasting;
use crate::ops::{check_inputs, Operator};

/// Reshape: same elements, new shape.
#[derive(Debug, Clone)]
pub struct Reshape {
    pub new_shape: Vec<usize>,
}

impl Reshape {
    pub fn new(new_shape: Vec<usize>) -> Self {
        Self { new_shape }
    }
}

impl<T> Operator<T> for Reshape
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Reshape", inputs, 1)?;
        inputs[0].reshape(&self.new_shape)
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Reshape", inputs, 1)?;
        // Gradient just goes back to the original shape
        Ok(vec![grad_output.reshape(inputs[0].shape())?])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

/// BroadcastTo: expands size-1 (or missing leading) axes to a target shape.
#[derive(Debug, Clone)]
pub struct BroadcastTo {
    pub target_shape: Vec<usize>,
}

impl BroadcastTo {
    pub fn new(target_shape: Vec<usize>) -> Self {
        Self { target_shape }
    }
}

impl<T> Operator<T> for BroadcastTo
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("BroadcastTo", inputs, 1)?;
        inputs[0].broadcast_to(&self.target_shape)
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("BroadcastTo", inputs, 1)?;
        let mut grad = grad_output;
        reduce_gradient_for_broadcasting(&mut grad, inputs[0].shape())?;
        Ok(vec![grad])
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
    fn test_reshape_gradient() {
        let x = seq(&[2, 3, 2], 0.5, 0.0);
        check_gradient(&Reshape::new(vec![3, 4]), &[x], 1e-6);
    }

    #[test]
    fn test_broadcast_gradient() {
        let bias = seq(&[1, 3, 1], 0.5, 0.0);
        check_gradient(&BroadcastTo::new(vec![2, 3, 4]), &[bias], 1e-6);
        let row = seq(&[4], 0.5, 0.0);
        check_gradient(&BroadcastTo::new(vec![3, 4]), &[row], 1e-6);
    }
}
