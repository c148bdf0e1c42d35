use crate::backend::{Float, Tensor};
use crate::ops::Operator;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// ATOMIC auto incrementing id for all nodes.
static NODE_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn new() -> Self {
        let id = NODE_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum NodeState<T>
where
    T: Float,
{
    /// Leaf node with materialized tensor.
    Leaf(Tensor<T>),

    /// Result of an operator applied to other nodes.
    Computed {
        tensor: Tensor<T>,
        op: Box<dyn Operator<T>>,
        inputs: Vec<NodeId>,
    },
}

/// Computational graph node.
#[derive(Debug)]
pub struct Node<T>
where
    T: Float,
{
    pub id: NodeId,
    pub state: NodeState<T>,
    pub requires_grad: bool,
    /// Persistent nodes (model parameters) survive [`Engine::prune`].
    pub persistent: bool,
}

impl<T> Node<T>
where
    T: Float,
{
    pub fn new_leaf(tensor: Tensor<T>, requires_grad: bool) -> Self {
        Self {
            id: NodeId::new(),
            state: NodeState::Leaf(tensor),
            requires_grad,
            persistent: false,
        }
    }

    pub fn new_computed(
        tensor: Tensor<T>,
        op: Box<dyn Operator<T>>,
        inputs: Vec<NodeId>,
        requires_grad: bool,
    ) -> Self {
        Self {
            id: NodeId::new(),
            state: NodeState::Computed { tensor, op, inputs },
            requires_grad,
            persistent: false,
        }
    }

    pub fn tensor(&self) -> &Tensor<T> {
        match &self.state {
            NodeState::Leaf(tensor) => tensor,
            NodeState::Computed { tensor, .. } => tensor,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.state, NodeState::Leaf(_))
    }
}

/// Eager reverse-mode autodiff engine.
///
/// Every operation is evaluated as soon as it is applied and recorded
/// together with its inputs so `backward` can replay the graph in reverse.
/// Parameters are registered once as persistent leaves; everything else is
/// per-step scratch that [`Engine::prune`] throws away.
#[derive(Debug)]
pub struct Engine<T>
where
    T: Float,
{
    nodes: HashMap<NodeId, Node<T>>,
    gradients: HashMap<NodeId, Tensor<T>>,
    training_mode: bool,
}

impl<T> Default for Engine<T>
where
    T: Float,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Engine<T>
where
    T: Float,
{
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            gradients: HashMap::new(),
            training_mode: true,
        }
    }

    pub fn set_training(&mut self, training: bool) {
        self.training_mode = training;
    }

    pub fn is_training(&self) -> bool {
        self.training_mode
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node<T>> {
        self.nodes.get(&node_id)
    }

    pub fn get_tensor(&self, node_id: NodeId) -> Option<&Tensor<T>> {
        self.nodes.get(&node_id).map(|node| node.tensor())
    }

    pub fn get_node_shape(&self, node_id: NodeId) -> Option<&[usize]> {
        self.get_tensor(node_id).map(|t| t.shape())
    }

    pub fn requires_grad(&self, node_id: NodeId) -> bool {
        self.nodes
            .get(&node_id)
            .is_some_and(|node| node.requires_grad)
    }

    pub fn get_gradient(&self, node_id: NodeId) -> Option<&Tensor<T>> {
        self.gradients.get(&node_id)
    }

    pub fn set_gradient(&mut self, node_id: NodeId, grad: Tensor<T>) {
        self.gradients.insert(node_id, grad);
    }

    pub fn clear_gradient(&mut self, node_id: NodeId) {
        self.gradients.remove(&node_id);
    }

    /// Clean up gradients
    pub fn zero_gradients(&mut self) {
        self.gradients.clear();
    }

    // Creates a new leaf node in the computational graph
    pub fn create_variable(&mut self, tensor: Tensor<T>, requires_grad: bool) -> NodeId {
        let node = Node::new_leaf(tensor, requires_grad);
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Registers a learnable tensor that survives [`Engine::prune`].
    pub fn create_parameter(&mut self, tensor: Tensor<T>) -> NodeId {
        let mut node = Node::new_leaf(tensor, true);
        node.persistent = true;
        let id = node.id;
        self.nodes.insert(id, node);
        id
    }

    /// Replaces the data of a leaf node. Used by optimizers.
    pub fn update_parameter(&mut self, node_id: NodeId, tensor: Tensor<T>) -> Result<(), String> {
        let node = self
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| format!("Node {} not found", node_id))?;
        match &mut node.state {
            NodeState::Leaf(current) => {
                if current.shape() != tensor.shape() {
                    return Err(format!(
                        "Parameter update shape {:?} doesn't match {:?}",
                        tensor.shape(),
                        current.shape()
                    ));
                }
                *current = tensor;
                Ok(())
            }
            NodeState::Computed { .. } => Err(format!(
                "Node {} is computed and cannot be updated in place",
                node_id
            )),
        }
    }

    fn validate_inputs(&self, op: &dyn Operator<T>, input_ids: &[NodeId]) -> Result<(), String> {
        for &input_id in input_ids {
            if !self.nodes.contains_key(&input_id) {
                return Err(format!("Input node {} not found", input_id));
            }
        }

        if input_ids.len() != op.num_inputs() {
            return Err(format!(
                "Operation {} expects {} inputs, got {}",
                op.name(),
                op.num_inputs(),
                input_ids.len()
            ));
        }

        Ok(())
    }

    pub fn apply_operation(
        &mut self,
        op: Box<dyn Operator<T>>,
        input_ids: Vec<NodeId>,
    ) -> Result<NodeId, String> {
        self.validate_inputs(op.as_ref(), &input_ids)?;

        let result_tensor = {
            let input_tensors: Vec<&Tensor<T>> = input_ids
                .iter()
                .map(|id| self.nodes[id].tensor())
                .collect();
            op.compute(&input_tensors)
                .map_err(|e| format!("{} failed: {}", op.name(), e))?
        };

        let requires_grad = input_ids.iter().any(|&id| self.requires_grad(id));
        let node = Node::new_computed(result_tensor, op, input_ids, requires_grad);
        let id = node.id;
        self.nodes.insert(id, node);
        Ok(id)
    }

    fn accumulate_gradient(&mut self, node_id: NodeId, grad: Tensor<T>) -> Result<(), String> {
        match self.gradients.remove(&node_id) {
            Some(existing_grad) => {
                let accumulated = existing_grad.add(&grad)?;
                self.gradients.insert(node_id, accumulated);
            }
            None => {
                self.gradients.insert(node_id, grad);
            }
        }
        Ok(())
    }

    pub fn backward(&mut self, loss_id: NodeId) -> Result<(), String> {
        if !self.training_mode {
            return Ok(());
        }

        let loss_shape = self
            .get_node_shape(loss_id)
            .ok_or_else(|| format!("Loss node {} not found", loss_id))?
            .to_vec();
        self.gradients.insert(loss_id, Tensor::ones(&loss_shape));

        let mut visited = HashSet::new();
        let mut topo_order = Vec::new();
        self.topological_sort(loss_id, &mut visited, &mut topo_order);
        topo_order.reverse();

        for &node_id in &topo_order {
            self.backward_node(node_id)?;
        }

        Ok(())
    }

    fn backward_node(&mut self, node_id: NodeId) -> Result<(), String> {
        let Some(node) = self.nodes.get(&node_id) else {
            return Err(format!("Node {} not found", node_id));
        };
        let NodeState::Computed { op, inputs, tensor } = &node.state else {
            // Leaf nodes. The gradient stops here
            return Ok(());
        };
        if !node.requires_grad {
            return Ok(());
        }
        let Some(grad_output) = self.gradients.remove(&node_id) else {
            return Ok(());
        };

        let input_tensors: Vec<&Tensor<T>> =
            inputs.iter().map(|id| self.nodes[id].tensor()).collect();
        let input_grads = op
            .gradient(grad_output, &input_tensors, tensor)
            .map_err(|e| format!("{} backward failed: {}", op.name(), e))?;

        let targets: Vec<NodeId> = inputs
            .iter()
            .copied()
            .filter(|&id| self.requires_grad(id))
            .collect();
        let grads: Vec<Tensor<T>> = inputs
            .iter()
            .zip(input_grads)
            .filter(|(id, _)| self.requires_grad(**id))
            .map(|(_, grad)| grad)
            .collect();

        for (input_id, input_grad) in targets.into_iter().zip(grads) {
            self.accumulate_gradient(input_id, input_grad)?;
        }

        Ok(())
    }

    /// TOPOLOGICAL SORTING TO COMPUTE OPS IN ORDER
    fn topological_sort(
        &self,
        node_id: NodeId,
        visited: &mut HashSet<NodeId>,
        topo_order: &mut Vec<NodeId>,
    ) {
        if !visited.insert(node_id) {
            return;
        }

        if let Some(node) = self.nodes.get(&node_id) {
            if let NodeState::Computed { inputs, .. } = &node.state {
                for &input_id in inputs {
                    self.topological_sort(input_id, visited, topo_order);
                }
            }
        }

        topo_order.push(node_id);
    }

    /// Drops every non-persistent node and all gradients.
    pub fn prune(&mut self) {
        self.nodes.retain(|_, node| node.persistent);
        self.gradients.clear();
    }

    /// GRAPH STATISTICS
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_parameters(&self) -> usize {
        self.nodes.values().filter(|node| node.persistent).count()
    }
}
