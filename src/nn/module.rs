use crate::backend::{Float, Tensor};
use crate::graph::{Engine, NodeId};
use crate::nn::parameter::Parameter;
use std::cell::RefCell;
use std::collections::HashMap;

/// The base trait for all neural network modules.
///
/// Similar to PyTorch's Module class, this trait allows for:
/// - Hierarchical composition of neural network layers
/// - Automatic parameter collection and management
/// - Training/evaluation mode switching
///
/// Parameters live in the graph as persistent nodes once
/// [`Module::create_parameters_in_graph`] has run. Optimizers update those
/// nodes, and [`Module::sync_from_graph`] copies the result back.
pub trait Module<T>
where
    T: Float,
{
    /// Performs the forward pass of the module.
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String>;

    /// Returns all parameters of this module, submodules included.
    fn parameters(&self) -> Vec<&Parameter<T>> {
        Vec::new()
    }

    /// Returns mutable references to all parameters of this module.
    fn parameters_mut(&mut self) -> Vec<&mut Parameter<T>> {
        Vec::new()
    }

    /// Parameters paired with a stable name. Composite modules prefix the
    /// names of their children.
    fn named_parameters(&self) -> Vec<(String, &Parameter<T>)> {
        self.parameters()
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let name = p
                    .name()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("param_{}", i));
                (name, p)
            })
            .collect()
    }

    /// Non-learnable state that still has to be checkpointed.
    fn buffers(&self) -> Vec<(String, &RefCell<Tensor<T>>)> {
        Vec::new()
    }

    /// Returns whether the module is in training mode.
    fn training(&self) -> bool;

    /// Sets the training mode for this module and all submodules.
    fn set_training(&mut self, training: bool);

    fn eval(&mut self) {
        self.set_training(false);
    }

    fn train(&mut self) {
        self.set_training(true);
    }

    /// Number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.size()).sum()
    }

    /// Registers every parameter as a persistent node in the graph.
    /// Must run before the first forward pass.
    fn create_parameters_in_graph(&self, graph: &mut Engine<T>) -> HashMap<String, NodeId> {
        self.named_parameters()
            .into_iter()
            .map(|(name, param)| (name, param.create_in_graph(graph)))
            .collect()
    }

    /// Copies optimized parameter values from the graph into the module.
    fn sync_from_graph(&mut self, graph: &Engine<T>) -> Result<(), String> {
        for param in self.parameters_mut() {
            param.sync_from_graph(graph)?;
        }
        Ok(())
    }
}

/// Prefixes child names with `prefix.`.
pub(crate) fn prefixed<V>(prefix: &str, items: Vec<(String, V)>) -> Vec<(String, V)> {
    items
        .into_iter()
        .map(|(name, v)| (format!("{}.{}", prefix, name), v))
        .collect()
}
