use crate::backend::{Float, Tensor};
use crate::graph::{Engine, NodeId};
use rand::Rng;
use std::cell::Cell;

/// A Parameter is a special kind of tensor that represents learnable parameters in a neural network.
///
/// Parameters always require gradients. Once registered with
/// [`Parameter::create_in_graph`] the parameter remembers its persistent
/// graph node so layers can reference it on every forward pass.
#[derive(Debug, Clone)]
pub struct Parameter<T>
where
    T: Float,
{
    /// The actual tensor data
    pub data: Tensor<T>,
    /// Whether this parameter requires gradients (always true for parameters)
    pub requires_grad: bool,
    /// Optional name for debugging and checkpoints
    pub name: Option<String>,
    node: Cell<Option<NodeId>>,
}

impl<T> Parameter<T>
where
    T: Float,
{
    pub fn new(data: Tensor<T>) -> Self {
        Self {
            data,
            requires_grad: true,
            name: None,
            node: Cell::new(None),
        }
    }

    pub fn new_named(data: Tensor<T>, name: &str) -> Self {
        let mut param = Self::new(data);
        param.set_name(name);
        param
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(Tensor::zeros(shape))
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::new(Tensor::ones(shape))
    }

    /// U(-bound, bound) initialization.
    pub fn uniform<R: Rng + ?Sized>(shape: &[usize], bound: f64, rng: &mut R) -> Result<Self, String> {
        Tensor::uniform(shape, -bound, bound, rng).map(Self::new)
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.to_string());
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn size(&self) -> usize {
        self.data.size()
    }

    /// Node this parameter was registered as, if any.
    pub fn node_id(&self) -> Option<NodeId> {
        self.node.get()
    }

    /// Node id or an error telling the caller to register the module first.
    pub fn node(&self) -> Result<NodeId, String> {
        self.node.get().ok_or_else(|| {
            format!(
                "Parameter '{}' not yet created in graph. Call create_parameters_in_graph() first.",
                self.name().unwrap_or("<unnamed>")
            )
        })
    }

    /// Registers the parameter as a persistent node of `graph`.
    /// Re-registering in the same graph is a no-op.
    pub fn create_in_graph(&self, graph: &mut Engine<T>) -> NodeId {
        if let Some(id) = self.node.get() {
            if graph.get_node(id).is_some() {
                return id;
            }
        }
        let id = graph.create_parameter(self.data.clone());
        self.node.set(Some(id));
        id
    }

    /// Copies the current graph value back into `data`.
    pub fn sync_from_graph(&mut self, graph: &Engine<T>) -> Result<(), String> {
        let id = self.node()?;
        let tensor = graph
            .get_tensor(id)
            .ok_or_else(|| format!("Parameter node {} missing from graph", id))?;
        self.data = tensor.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_once_per_graph() {
        let param = Parameter::<f32>::new_named(Tensor::ones(&[3]), "w");
        assert!(param.node().is_err());

        let mut graph = Engine::new();
        let id = param.create_in_graph(&mut graph);
        assert_eq!(param.create_in_graph(&mut graph), id);
        assert_eq!(graph.num_parameters(), 1);

        // a fresh graph gets a fresh node
        let mut other = Engine::new();
        assert_ne!(param.create_in_graph(&mut other), id);
    }

    #[test]
    fn test_sync_from_graph() {
        let mut param = Parameter::<f64>::zeros(&[2]);
        let mut graph = Engine::new();
        let id = param.create_in_graph(&mut graph);
        graph.update_parameter(id, Tensor::full(&[2], 4.0)).unwrap();
        param.sync_from_graph(&graph).unwrap();
        assert_eq!(param.data.to_vec(), vec![4.0, 4.0]);
    }
}
