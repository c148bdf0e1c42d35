// src/nn/layers/activation.rs
// Activation and reshaping layers without parameters.

use crate::backend::Float;
use crate::graph::{Engine, NodeId};
use crate::nn::Module;
use crate::ops;

/// ReLU activation layer: max(0, x)
#[derive(Debug, Clone)]
pub struct ReLU {
    training: bool,
}

impl ReLU {
    pub fn new() -> Self {
        Self { training: true }
    }
}

impl Default for ReLU {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Module<T> for ReLU
where
    T: Float,
{
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        graph.apply_operation(Box::new(ops::ReLU), vec![input])
    }

    fn training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

/// Flattens every axis after the batch axis: [N, ...] -> [N, prod(...)]
#[derive(Debug, Clone)]
pub struct Flatten {
    training: bool,
}

impl Flatten {
    pub fn new() -> Self {
        Self { training: true }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Module<T> for Flatten
where
    T: Float,
{
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        let shape = graph
            .get_node_shape(input)
            .ok_or("Input tensor not found in graph")?;
        let Some((&batch, rest)) = shape.split_first() else {
            return Err("Flatten needs at least one dimension".to_string());
        };
        let flat = vec![batch, rest.iter().product()];
        graph.apply_operation(Box::new(ops::Reshape::new(flat)), vec![input])
    }

    fn training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}
