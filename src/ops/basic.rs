// basic.rs
// Basic arithmetic operations for the computational graph.
// These operators wrap the tensor API to enable automatic differentiation.

use crate::backend::{Float, Tensor};
use crate::ops::{check_inputs, Operator};

/// Helper to reduce gradients when broadcasting was used in forward pass
/// This ensures gradient shapes match the original input shapes
pub fn reduce_gradient_for_broadcasting<T>(
    grad: &mut Tensor<T>,
    target_shape: &[usize],
) -> Result<(), String>
where
    T: Float,
{
    let grad_shape = grad.shape().to_vec();

    // If shapes match, no reduction needed
    if grad_shape == target_shape {
        return Ok(());
    }

    // Find axes that were broadcasted (size 1 in target, size > 1 in grad)
    let mut axes_to_reduce = Vec::new();
    let mut target_idx = target_shape.len();

    for i in (0..grad_shape.len()).rev() {
        if target_idx == 0 {
            // Extra leading dimensions in grad - sum them out
            axes_to_reduce.push(i);
        } else {
            target_idx -= 1;
            if target_shape[target_idx] == 1 && grad_shape[i] > 1 {
                axes_to_reduce.push(i);
            }
        }
    }

    if !axes_to_reduce.is_empty() {
        axes_to_reduce.sort_unstable();
        *grad = grad.sum(Some(axes_to_reduce.as_slice()), false)?;
    }

    // Reshape to match target if needed (handles trailing/leading 1s)
    if grad.shape() != target_shape {
        *grad = grad.reshape(target_shape)?;
    }

    Ok(())
}

/// Element-wise addition: output = input1 + input2
/// Supports broadcasting as per PyTorch semantics
#[derive(Debug, Clone, Copy, Default)]
pub struct Add;

impl<T> Operator<T> for Add
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Add", inputs, 2)?;
        inputs[0].add(inputs[1])
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Add", inputs, 2)?;

        // d/dx(x + y) = 1, d/dy(x + y) = 1
        let mut grad_input1 = grad_output.clone();
        let mut grad_input2 = grad_output;

        reduce_gradient_for_broadcasting(&mut grad_input1, inputs[0].shape())?;
        reduce_gradient_for_broadcasting(&mut grad_input2, inputs[1].shape())?;

        Ok(vec![grad_input1, grad_input2])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(*self)
    }

    fn num_inputs(&self) -> usize {
        2
    }
}

/// Element-wise subtraction: output = input1 - input2
#[derive(Debug, Clone, Copy, Default)]
pub struct Sub;

impl<T> Operator<T> for Sub
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Sub", inputs, 2)?;
        inputs[0].sub(inputs[1])
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Sub", inputs, 2)?;

        // d/dx(x - y) = 1, d/dy(x - y) = -1
        let mut grad_input2 = grad_output.mul_scalar(-T::one());
        let mut grad_input1 = grad_output;

        reduce_gradient_for_broadcasting(&mut grad_input1, inputs[0].shape())?;
        reduce_gradient_for_broadcasting(&mut grad_input2, inputs[1].shape())?;

        Ok(vec![grad_input1, grad_input2])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(*self)
    }

    fn num_inputs(&self) -> usize {
        2
    }
}

/// Element-wise multiplication: output = input1 * input2
#[derive(Debug, Clone, Copy, Default)]
pub struct Mul;

impl<T> Operator<T> for Mul
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Mul", inputs, 2)?;
        inputs[0].mul(inputs[1])
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Mul", inputs, 2)?;

        // d/dx(x * y) = y, d/dy(x * y) = x
        let mut grad_input1 = grad_output.mul(inputs[1])?;
        let mut grad_input2 = grad_output.mul(inputs[0])?;

        reduce_gradient_for_broadcasting(&mut grad_input1, inputs[0].shape())?;
        reduce_gradient_for_broadcasting(&mut grad_input2, inputs[1].shape())?;

        Ok(vec![grad_input1, grad_input2])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(*self)
    }

    fn num_inputs(&self) -> usize {
        2
    }
}

/// Element-wise division: output = input1 / input2
#[derive(Debug, Clone, Copy, Default)]
pub struct Div;

impl<T> Operator<T> for Div
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Div", inputs, 2)?;
        inputs[0].div(inputs[1])
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Div", inputs, 2)?;

        // d/dx(x / y) = 1/y, d/dy(x / y) = -x/y² = -output/y
        let mut grad_input1 = grad_output.div(inputs[1])?;
        reduce_gradient_for_broadcasting(&mut grad_input1, inputs[0].shape())?;

        let neg_output = output.div(inputs[1])?.mul_scalar(-T::one());
        let mut grad_input2 = grad_output.mul(&neg_output)?;
        reduce_gradient_for_broadcasting(&mut grad_input2, inputs[1].shape())?;

        Ok(vec![grad_input1, grad_input2])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(*self)
    }

    fn num_inputs(&self) -> usize {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::{check_gradient, seq};

    #[test]
    fn test_reduce_gradient_for_broadcasting() {
        let mut grad = Tensor::<f32>::ones(&[4, 2, 3]);
        reduce_gradient_for_broadcasting(&mut grad, &[2, 1]).unwrap();
        assert_eq!(grad.shape(), &[2, 1]);
        assert_eq!(grad.to_vec(), vec![12.0, 12.0]);

        let mut grad = Tensor::<f32>::ones(&[2, 3]);
        reduce_gradient_for_broadcasting(&mut grad, &[3]).unwrap();
        assert_eq!(grad.to_vec(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_binary_gradients_with_broadcasting() {
        let a = seq(&[2, 3], 0.3, 0.1);
        let b = seq(&[3], 0.2, 2.0);
        check_gradient(&Add, &[a.clone(), b.clone()], 1e-6);
        check_gradient(&Sub, &[a.clone(), b.clone()], 1e-6);
        check_gradient(&Mul, &[a.clone(), b.clone()], 1e-6);
        check_gradient(&Div, &[a, b], 1e-5);
    }
}
