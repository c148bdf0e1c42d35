// ops/mod.rs
// Differentiable operators recorded by the graph engine.
// Each operator wraps a tensor kernel and knows how to route the upstream
// gradient back to its inputs.
use crate::backend::{Float, Tensor};
use std::any::type_name;

// All operators in the computational graph implement this trait.
pub trait Operator<T>: std::fmt::Debug
where
    T: Float,
{
    // Compute function computes the output in the computational graph.
    fn compute(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>, String>;

    // Gradient function computes the gradient of the output with respect to the inputs.
    // `output` is the tensor produced by `compute` for these inputs.
    fn gradient(
        &self,
        grad_output: Tensor<T>,
        inputs: &[&Tensor<T>],
        output: &Tensor<T>,
    ) -> Result<Vec<Tensor<T>>, String>;

    // Get number of inputs this operator expects
    fn num_inputs(&self) -> usize;

    fn name(&self) -> String {
        let full_name = type_name::<Self>();
        full_name
            .rsplit("::")
            .next()
            .unwrap_or(full_name)
            .to_string()
    }

    fn clone_op(&self) -> Box<dyn Operator<T>>;
}

/// Shared arity check so every operator reports the same message.
pub(crate) fn check_inputs<T: Float>(
    name: &str,
    inputs: &[&Tensor<T>],
    expected: usize,
) -> Result<(), String> {
    if inputs.len() != expected {
        return Err(format!(
            "{} operation requires exactly {} input{}",
            name,
            expected,
            if expected == 1 { "" } else { "s" }
        ));
    }
    Ok(())
}

pub mod basic;
pub mod batched;
pub mod matrix;
pub mod pooling;
pub mod reduction;
pub mod reshape;
pub mod scalar;
pub mod unary;

// Re-export all operations for convenient importing
pub use basic::*;
pub use batched::*;
pub use matrix::*;
pub use pooling::*;
pub use reduction::*;
pub use reshape::*;
pub use scalar::*;
pub use unary::*;
