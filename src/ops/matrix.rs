// matrix.rs
// Linear algebra operators.

use crate::backend::{Float, Tensor};
use crate::ops::{check_inputs, Operator};

/// Matrix multiplication: [m, k] x [k, n] -> [m, n]
#[derive(Debug, Clone, Copy, Default)]
pub struct MatMul;

impl<T> Operator<T> for MatMul
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("MatMul", inputs, 2)?;
        inputs[0].matmul(inputs[1])
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("MatMul", inputs, 2)?;

        // dA = dC · Bᵀ, dB = Aᵀ · dC
        let grad_a = grad_output.matmul(&inputs[1].transpose()?)?;
        let grad_b = inputs[0].transpose()?.matmul(&grad_output)?;

        Ok(vec![grad_a, grad_b])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(*self)
    }

    fn num_inputs(&self) -> usize {
        2
    }
}

/// 2D transpose.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transpose;

impl<T> Operator<T> for Transpose
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Transpose", inputs, 1)?;
        inputs[0].transpose()
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Transpose", inputs, 1)?;
        Ok(vec![grad_output.transpose()?])
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
    fn test_matmul_forward() {
        let a = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let b = Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]).unwrap();
        let op: &dyn Operator<f32> = &MatMul;
        let c = op.compute(&[&a, &b]).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.to_vec(), vec![4.0, 5.0, 10.0, 11.0]);
    }

    #[test]
    fn test_matrix_gradients() {
        let a = seq(&[3, 4], 0.3, 0.1);
        let b = seq(&[4, 2], 0.2, -0.1);
        check_gradient(&MatMul, &[a.clone(), b], 1e-6);
        check_gradient(&Transpose, &[a], 1e-6);
    }
}
