// src/nn/layers/pooling.rs
// Parameter-free pooling layers.

use crate::backend::Float;
use crate::graph::{Engine, NodeId};
use crate::nn::Module;
use crate::ops;

/// Max pooling with a cubic window and stride equal to the window.
#[derive(Debug, Clone)]
pub struct MaxPool3d {
    pub kernel_size: usize,
    training: bool,
}

impl MaxPool3d {
    pub fn new(kernel_size: usize) -> Self {
        Self {
            kernel_size,
            training: true,
        }
    }
}

impl<T> Module<T> for MaxPool3d
where
    T: Float,
{
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        graph.apply_operation(Box::new(ops::MaxPool3d::new(self.kernel_size)), vec![input])
    }

    fn training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

/// Adaptive average pooling to a fixed spatial size.
#[derive(Debug, Clone)]
pub struct AdaptiveAvgPool3d {
    pub output_size: [usize; 3],
    training: bool,
}

impl AdaptiveAvgPool3d {
    pub fn new(output_size: [usize; 3]) -> Self {
        Self {
            output_size,
            training: true,
        }
    }

    /// Same output size along every spatial axis.
    pub fn cubic(size: usize) -> Self {
        Self::new([size; 3])
    }
}

impl<T> Module<T> for AdaptiveAvgPool3d
where
    T: Float,
{
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        graph.apply_operation(
            Box::new(ops::AdaptiveAvgPool3d::new(self.output_size)),
            vec![input],
        )
    }

    fn training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}
