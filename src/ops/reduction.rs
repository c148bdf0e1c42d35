// reduction.rs
// Reduction operations for the computational graph.

use crate::backend::{Float, Tensor};
use crate::ops::{check_inputs, Operator};

/// Expands a reduced gradient back to the input shape.
fn expand_reduction<T>(
    grad_output: Tensor<T>,
    axes: &Option<Vec<usize>>,
    keep_dims: bool,
    input_shape: &[usize],
) -> Result<Tensor<T>, String>
where
    T: Float,
{
    match axes {
        Some(reduction_axes) => {
            if reduction_axes.is_empty() {
                return Ok(grad_output);
            }
            // Restore reduced dimensions as size 1, then broadcast.
            let grad_output = if keep_dims {
                grad_output
            } else {
                let kept_shape: Vec<usize> = input_shape
                    .iter()
                    .enumerate()
                    .map(|(ax, &dim)| if reduction_axes.contains(&ax) { 1 } else { dim })
                    .collect();
                grad_output.reshape(&kept_shape)?
            };
            grad_output.broadcast_to(input_shape)
        }
        None => {
            // All axes reduced to a single value
            let scalar = grad_output.first()?;
            Ok(Tensor::full(input_shape, scalar))
        }
    }
}

/// Sum reduction: output = sum(input, axes)
/// Reduces tensor along specified axes or all elements if None
#[derive(Debug, Clone, Default)]
pub struct Sum {
    /// Axes to reduce along. If None, reduces all elements to scalar
    pub axes: Option<Vec<usize>>,
    /// Whether to keep the reduced dimensions as size 1
    pub keep_dims: bool,
}

impl Sum {
    /// Create sum operation that reduces all elements to scalar
    pub fn new(keep_dims: bool) -> Self {
        Self {
            axes: None,
            keep_dims,
        }
    }

    /// Create sum operation along specific axes
    pub fn along_axes(axes: Vec<usize>, keep_dims: bool) -> Self {
        Self {
            axes: Some(axes),
            keep_dims,
        }
    }
}

impl<T> Operator<T> for Sum
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Sum", inputs, 1)?;
        inputs[0].sum(self.axes.as_deref(), self.keep_dims)
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Sum", inputs, 1)?;
        let grad = expand_reduction(grad_output, &self.axes, self.keep_dims, inputs[0].shape())?;
        Ok(vec![grad])
    }

    fn clone_op(&self) -> Box<dyn Operator<T>> {
        Box::new(self.clone())
    }

    fn num_inputs(&self) -> usize {
        1
    }
}

/// Mean reduction: output = mean(input, axes)
/// Computes average along specified axes or all elements if None
#[derive(Debug, Clone, Default)]
pub struct Mean {
    pub axes: Option<Vec<usize>>,
    pub keep_dims: bool,
}

impl Mean {
    pub fn new(keep_dims: bool) -> Self {
        Self {
            axes: None,
            keep_dims,
        }
    }

    pub fn along_axes(axes: Vec<usize>, keep_dims: bool) -> Self {
        Self {
            axes: Some(axes),
            keep_dims,
        }
    }
}

impl<T> Operator<T> for Mean
where
    T: Float,
{
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String> {
        check_inputs("Mean", inputs, 1)?;
        inputs[0].mean(self.axes.as_deref(), self.keep_dims)
    }

    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        _output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String> {
        check_inputs("Mean", inputs, 1)?;
        let input_shape = inputs[0].shape();

        let count: usize = match &self.axes {
            Some(axes) => axes.iter().map(|&ax| input_shape[ax]).product(),
            None => input_shape.iter().product(),
        };

        // Same routing as Sum, scaled by 1/N
        let grad = expand_reduction(grad_output, &self.axes, self.keep_dims, input_shape)?;
        Ok(vec![grad.div_scalar(T::from_usize(count))])
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
    fn test_sum_and_mean_forward() {
        let x = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let sum: &dyn Operator<f32> = &Sum::new(false);
        let total = sum.compute(&[&x]).unwrap();
        assert_eq!(total.to_vec(), vec![21.0]);
        let mean: &dyn Operator<f32> = &Mean::along_axes(vec![1], true);
        let rows = mean.compute(&[&x]).unwrap();
        assert_eq!(rows.shape(), &[2, 1]);
        assert_eq!(rows.to_vec(), vec![2.0, 5.0]);
    }

    #[test]
    fn test_reduction_gradients() {
        let x = seq(&[2, 3, 4], 0.2, 0.3);
        check_gradient(&Sum::new(false), &[x.clone()], 1e-6);
        check_gradient(&Sum::along_axes(vec![0, 2], false), &[x.clone()], 1e-6);
        check_gradient(&Mean::new(true), &[x.clone()], 1e-6);
        check_gradient(&Mean::along_axes(vec![1], false), &[x.clone()], 1e-6);
        check_gradient(&Mean::along_axes(vec![0, 2], true), &[x], 1e-6);
    }
}
