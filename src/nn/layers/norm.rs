// src/nn/layers/norm.rs
// Batch normalization built from existing graph operations.

use crate::backend::{Float, Tensor};
use crate::graph::{Engine, NodeId};
use crate::nn::layers::utils::reshape_and_broadcast;
use crate::nn::parameter::Parameter;
use crate::nn::Module;
use crate::ops::{Add, AddScalar, Div, Mean, Mul, Sqrt, Sub};
use std::cell::{Cell, RefCell};

/// Batch Normalization over the channel axis (axis 1).
///
/// Normalizes input using batch statistics: (x - batch_mean) / sqrt(batch_var + eps),
/// followed by a learnable scale (gamma) and shift (beta). Accepts
/// `[batch, features]` and `[batch, channels, ...spatial]` inputs; statistics
/// are taken over every axis except the channel axis.
///
/// Training mode normalizes with the biased batch variance and folds the
/// unbiased variance into the running estimate. Evaluation mode uses the
/// running statistics.
#[derive(Debug)]
pub struct BatchNorm<T>
where
    T: Float,
{
    num_features: usize,
    eps: f64,
    /// Momentum for running mean/var updates (default: 0.1)
    momentum: f64,
    /// Learnable scale parameter (gamma)
    pub weight: Parameter<T>,
    /// Learnable shift parameter (beta)
    pub bias: Parameter<T>,
    pub running_mean: RefCell<Tensor<T>>,
    pub running_var: RefCell<Tensor<T>>,
    num_batches_tracked: Cell<usize>,
    training: bool,
}

/// Batch norm over `[batch, features]`.
pub type BatchNorm1d<T> = BatchNorm<T>;
/// Batch norm over `[batch, channels, d, h, w]`.
pub type BatchNorm3d<T> = BatchNorm<T>;

impl<T> BatchNorm<T>
where
    T: Float,
{
    pub fn new(num_features: usize, eps: f64, momentum: f64) -> Self {
        Self {
            num_features,
            eps,
            momentum,
            weight: Parameter::new_named(Tensor::ones(&[num_features]), "weight"),
            bias: Parameter::new_named(Tensor::zeros(&[num_features]), "bias"),
            running_mean: RefCell::new(Tensor::zeros(&[num_features])),
            running_var: RefCell::new(Tensor::ones(&[num_features])),
            num_batches_tracked: Cell::new(0),
            training: true,
        }
    }

    /// eps = 1e-5, momentum = 0.1
    pub fn new_default(num_features: usize) -> Self {
        Self::new(num_features, 1e-5, 0.1)
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_batches_tracked(&self) -> usize {
        self.num_batches_tracked.get()
    }

    pub fn reset_running_stats(&self) {
        *self.running_mean.borrow_mut() = Tensor::zeros(&[self.num_features]);
        *self.running_var.borrow_mut() = Tensor::ones(&[self.num_features]);
        self.num_batches_tracked.set(0);
    }

    fn reduction_axes(&self, input_shape: &[usize]) -> Result<Vec<usize>, String> {
        if input_shape.len() < 2 || input_shape[1] != self.num_features {
            return Err(format!(
                "BatchNorm expects input [batch, {}, ...], got {:?}",
                self.num_features, input_shape
            ));
        }
        Ok(std::iter::once(0).chain(2..input_shape.len()).collect())
    }

    /// Exponential moving average of the batch statistics.
    /// `batch_var` is the biased variance over `count` elements per channel.
    fn update_running_stats(
        &self,
        batch_mean: &Tensor<T>,
        batch_var: &Tensor<T>,
        count: usize,
    ) -> Result<(), String> {
        let momentum = T::cast(self.momentum);
        let keep = T::cast(1.0 - self.momentum);
        let batch_mean = batch_mean.reshape(&[self.num_features])?;
        let batch_var = batch_var.reshape(&[self.num_features])?;
        // A single value per channel has no unbiased estimate; fall back to the biased one.
        let unbiased = if count > 1 {
            batch_var.mul_scalar(T::from_usize(count) / T::from_usize(count - 1))
        } else {
            batch_var
        };

        {
            let mut running_mean = self.running_mean.borrow_mut();
            *running_mean = running_mean
                .mul_scalar(keep)
                .add(&batch_mean.mul_scalar(momentum))?;
        }
        {
            let mut running_var = self.running_var.borrow_mut();
            *running_var = running_var
                .mul_scalar(keep)
                .add(&unbiased.mul_scalar(momentum))?;
        }
        self.num_batches_tracked.set(self.num_batches_tracked.get() + 1);
        Ok(())
    }

    fn training_forward(
        &self,
        graph: &mut Engine<T>,
        input: NodeId,
        axes: Vec<usize>,
    ) -> Result<NodeId, String> {
        let input_shape = graph
            .get_node_shape(input)
            .ok_or("Input tensor not found in graph")?
            .to_vec();
        let count: usize = axes.iter().map(|&ax| input_shape[ax]).product();

        let batch_mean = graph
            .apply_operation(Box::new(Mean::along_axes(axes.clone(), true)), vec![input])
            .map_err(|e| format!("BatchNorm mean computation failed: {}", e))?;
        let centered = graph
            .apply_operation(Box::new(Sub), vec![input, batch_mean])
            .map_err(|e| format!("BatchNorm centering failed: {}", e))?;
        let squared = graph.apply_operation(Box::new(Mul), vec![centered, centered])?;
        let variance = graph
            .apply_operation(Box::new(Mean::along_axes(axes, true)), vec![squared])
            .map_err(|e| format!("BatchNorm variance computation failed: {}", e))?;

        // Running statistics are updated outside the graph
        {
            let mean_tensor = graph
                .get_tensor(batch_mean)
                .ok_or("Could not get batch mean tensor")?;
            let var_tensor = graph
                .get_tensor(variance)
                .ok_or("Could not get variance tensor")?;
            self.update_running_stats(mean_tensor, var_tensor, count)?;
        }

        self.finish_normalization(graph, centered, variance)
    }

    fn inference_forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        let ndim = graph
            .get_node_shape(input)
            .ok_or("Input tensor not found in graph")?
            .len();
        let mut stat_shape = vec![1; ndim];
        stat_shape[1] = self.num_features;

        let running_mean = self.running_mean.borrow().reshape(&stat_shape)?;
        let running_var = self.running_var.borrow().reshape(&stat_shape)?;
        let mean_node = graph.create_variable(running_mean, false);
        let var_node = graph.create_variable(running_var, false);

        let centered = graph
            .apply_operation(Box::new(Sub), vec![input, mean_node])
            .map_err(|e| format!("BatchNorm inference centering failed: {}", e))?;
        self.finish_normalization(graph, centered, var_node)
    }

    /// (centered / sqrt(var + eps)) * gamma + beta
    fn finish_normalization(
        &self,
        graph: &mut Engine<T>,
        centered: NodeId,
        variance: NodeId,
    ) -> Result<NodeId, String> {
        let var_eps =
            graph.apply_operation(Box::new(AddScalar::new(T::cast(self.eps))), vec![variance])?;
        let std_dev = graph.apply_operation(Box::new(Sqrt), vec![var_eps])?;
        let normalized = graph
            .apply_operation(Box::new(Div), vec![centered, std_dev])
            .map_err(|e| format!("BatchNorm normalization failed: {}", e))?;

        let gamma = reshape_and_broadcast(self.weight.node()?, normalized, graph)?;
        let scaled = graph
            .apply_operation(Box::new(Mul), vec![normalized, gamma])
            .map_err(|e| format!("BatchNorm scaling failed: {}", e))?;

        let beta = reshape_and_broadcast(self.bias.node()?, scaled, graph)?;
        graph
            .apply_operation(Box::new(Add), vec![scaled, beta])
            .map_err(|e| format!("BatchNorm bias addition failed: {}", e))
    }
}

impl<T> Module<T> for BatchNorm<T>
where
    T: Float,
{
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        let axes = {
            let shape = graph
                .get_node_shape(input)
                .ok_or("Input tensor not found in graph")?;
            self.reduction_axes(shape)?
        };

        if self.training {
            self.training_forward(graph, input, axes)
        } else {
            self.inference_forward(graph, input)
        }
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter<T>> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn buffers(&self) -> Vec<(String, &RefCell<Tensor<T>>)> {
        vec![
            ("running_mean".to_string(), &self.running_mean),
            ("running_var".to_string(), &self.running_var),
        ]
    }

    fn training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}
