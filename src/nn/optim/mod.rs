use crate::backend::{Float, Tensor};
use crate::graph::{Engine, NodeId};
use crate::nn::Module;
use bincode::{config, decode_from_slice, encode_to_vec, Decode, Encode};
use std::collections::HashMap;
use std::fs::{read, write};
use std::path::Path;
use thiserror::Error;

pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::SGD;

/// Error types for optimizer operations
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("Gradient not found for node {0}")]
    GradientNotFound(NodeId),
    #[error("Parameter not found for node {0}")]
    ParameterNotFound(NodeId),
    #[error("Tensor operation failed: {0}")]
    TensorOperation(String),
    #[error("State dict mismatch: {0}")]
    StateMismatch(String),
    #[error("Checkpoint I/O failed: {0}")]
    Io(String),
}

/// Optimizer state tensor stored as f64 values plus shape.
/// `param_index` is the position of the parameter in registration order,
/// so a state dict can be loaded into a fresh graph.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct TensorBuffer {
    pub data: Vec<f64>,
    pub shape: Vec<usize>,
    pub buffer_type: String, // "momentum", "first_moment", "second_moment"
    pub param_index: usize,
}

impl TensorBuffer {
    pub fn from_tensor<T: Float>(tensor: &Tensor<T>, buffer_type: &str, param_index: usize) -> Self {
        Self {
            data: tensor.data().iter().map(|v| v.as_f64()).collect(),
            shape: tensor.shape().to_vec(),
            buffer_type: buffer_type.to_string(),
            param_index,
        }
    }

    pub fn to_tensor<T: Float>(&self) -> Result<Tensor<T>, OptimizerError> {
        let data = self.data.iter().map(|&v| T::cast(v)).collect();
        Tensor::from_vec(data, &self.shape).map_err(OptimizerError::TensorOperation)
    }
}

/// State dictionary for saving and loading optimizer state
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct OptimizerStateDict {
    pub optimizer_type: String,
    pub step_count: u64,
    pub num_params: usize,
    pub hyperparameters: HashMap<String, f64>,
    pub parameter_buffers: Vec<TensorBuffer>,
}

impl OptimizerStateDict {
    pub fn new(optimizer_type: &str, num_params: usize) -> Self {
        Self {
            optimizer_type: optimizer_type.to_string(),
            step_count: 0,
            num_params,
            hyperparameters: HashMap::new(),
            parameter_buffers: Vec::new(),
        }
    }

    pub fn add_buffer<T: Float>(&mut self, param_index: usize, tensor: &Tensor<T>, buffer_type: &str) {
        self.parameter_buffers
            .push(TensorBuffer::from_tensor(tensor, buffer_type, param_index));
    }

    /// Buffers of one kind, in parameter order.
    pub fn buffers_of<'a>(&'a self, buffer_type: &'a str) -> impl Iterator<Item = &'a TensorBuffer> + 'a {
        self.parameter_buffers
            .iter()
            .filter(move |b| b.buffer_type == buffer_type)
    }

    pub fn hyperparameter(&self, key: &str) -> Option<f64> {
        self.hyperparameters.get(key).copied()
    }

    /// Checks that this dict was produced by `optimizer_type` over `num_params` parameters.
    pub fn check_compatible(&self, optimizer_type: &str, num_params: usize) -> Result<(), OptimizerError> {
        if self.optimizer_type != optimizer_type {
            return Err(OptimizerError::StateMismatch(format!(
                "Expected {} state dict, got {}",
                optimizer_type, self.optimizer_type
            )));
        }
        if self.num_params != num_params {
            return Err(OptimizerError::StateMismatch(format!(
                "State dict holds {} parameters, optimizer has {}",
                self.num_params, num_params
            )));
        }
        if let Some(buffer) = self.parameter_buffers.iter().find(|b| b.param_index >= num_params) {
            return Err(OptimizerError::StateMismatch(format!(
                "Buffer {} refers to parameter {} out of {}",
                buffer.buffer_type, buffer.param_index, num_params
            )));
        }
        Ok(())
    }

    /// Save to bytes using bincode
    pub fn save_to_bytes(&self) -> Result<Vec<u8>, OptimizerError> {
        encode_to_vec(self, config::standard()).map_err(|e| OptimizerError::Io(e.to_string()))
    }

    /// Load from bytes using bincode
    pub fn load_from_bytes(data: &[u8]) -> Result<Self, OptimizerError> {
        decode_from_slice(data, config::standard())
            .map(|(val, _)| val)
            .map_err(|e| OptimizerError::Io(e.to_string()))
    }
}

/// Core trait for all optimizers with proper error handling
pub trait Optimizer<T>
where
    T: Float,
{
    /// Perform one optimization step using computed gradients.
    /// Parameters without a gradient are left untouched.
    fn step(&mut self, engine: &mut Engine<T>) -> Result<(), OptimizerError>;

    /// Registered parameter nodes, in registration order.
    fn params(&self) -> &[NodeId];

    /// Add a single parameter to be optimized
    fn add_param(&mut self, param_node_id: NodeId);

    /// Clear all gradients for registered parameters
    fn reset_grad(&mut self, engine: &mut Engine<T>) {
        for &param_node in self.params() {
            engine.clear_gradient(param_node);
        }
    }

    /// Registers the module's parameters in the graph (if needed) and adds them
    /// in the module's naming order.
    fn add_module_params<M>(&mut self, module: &M, engine: &mut Engine<T>)
    where
        M: Module<T>,
        Self: Sized,
    {
        for (_, param) in module.named_parameters() {
            let node = param.create_in_graph(engine);
            self.add_param(node);
        }
    }

    fn get_lr(&self) -> T;

    fn set_lr(&mut self, lr: T);

    fn get_step_count(&self) -> u64;

    /// Save optimizer state to state dict
    fn state_dict(&self) -> OptimizerStateDict;

    /// Load optimizer state from state dict
    fn load_state_dict(&mut self, state_dict: &OptimizerStateDict) -> Result<(), OptimizerError>;

    /// Save state dict to file
    fn save_checkpoint(&self, filepath: &Path) -> Result<(), OptimizerError> {
        let bytes = self.state_dict().save_to_bytes()?;
        write(filepath, bytes)
            .map_err(|e| OptimizerError::Io(format!("Failed to write {}: {}", filepath.display(), e)))
    }

    /// Load state dict from file
    fn load_checkpoint(&mut self, filepath: &Path) -> Result<(), OptimizerError> {
        let bytes = read(filepath)
            .map_err(|e| OptimizerError::Io(format!("Failed to read {}: {}", filepath.display(), e)))?;
        let state_dict = OptimizerStateDict::load_from_bytes(&bytes)?;
        self.load_state_dict(&state_dict)
    }
}

/// Returns the current value and gradient of a parameter, or `None` when it
/// received no gradient this step.
pub(crate) fn param_and_grad<T: Float>(
    engine: &Engine<T>,
    node: NodeId,
) -> Result<Option<(Tensor<T>, Tensor<T>)>, OptimizerError> {
    let Some(grad) = engine.get_gradient(node) else {
        return Ok(None);
    };
    let param = engine
        .get_tensor(node)
        .ok_or(OptimizerError::ParameterNotFound(node))?;
    if param.shape() != grad.shape() {
        return Err(OptimizerError::TensorOperation(format!(
            "Gradient shape {:?} does not match parameter shape {:?} for node {}",
            grad.shape(),
            param.shape(),
            node
        )));
    }
    Ok(Some((param.clone(), grad.clone())))
}

/// Restores per-parameter buffers of one kind from a state dict.
pub(crate) fn restore_buffers<T: Float>(
    state_dict: &OptimizerStateDict,
    buffer_type: &str,
    params: &[NodeId],
) -> Result<HashMap<NodeId, Tensor<T>>, OptimizerError> {
    state_dict
        .buffers_of(buffer_type)
        .map(|buffer| Ok((params[buffer.param_index], buffer.to_tensor()?)))
        .collect()
}

#[cfg(test)]
mod serialization_tests {
    use super::*;
    use crate::nn::layers::Linear;

    fn single_param(engine: &mut Engine<f32>) -> NodeId {
        engine.create_parameter(Tensor::from_vec(vec![1.0f32, -1.0], &[2]).unwrap())
    }

    #[test]
    fn test_adam_save_load() {
        let mut engine = Engine::<f32>::new();
        let node = single_param(&mut engine);

        let mut optimizer = Adam::with_defaults(0.01f32);
        optimizer.add_param(node);

        for _ in 0..3 {
            engine.set_gradient(node, Tensor::from_vec(vec![0.5f32, 0.25], &[2]).unwrap());
            optimizer.step(&mut engine).unwrap();
            optimizer.reset_grad(&mut engine);
        }

        let state_dict = optimizer.state_dict();
        assert_eq!(state_dict.optimizer_type, "Adam");
        assert_eq!(state_dict.step_count, 3);

        let bytes = state_dict.save_to_bytes().unwrap();
        let restored = OptimizerStateDict::load_from_bytes(&bytes).unwrap();
        assert_eq!(restored, state_dict);

        // A fresh optimizer over a fresh node picks up the saved state.
        let mut other_engine = Engine::<f32>::new();
        let other_node = single_param(&mut other_engine);
        let mut new_optimizer = Adam::with_defaults(0.1f32);
        new_optimizer.add_param(other_node);
        new_optimizer.load_state_dict(&restored).unwrap();

        assert_eq!(new_optimizer.get_step_count(), 3);
        assert_eq!(new_optimizer.get_lr(), 0.01f32);
        assert_eq!(new_optimizer.state_dict().parameter_buffers, state_dict.parameter_buffers);
    }

    #[test]
    fn test_save_load_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("optimizer.bin");

        let optimizer = SGD::with_momentum(0.05f32, 0.9);
        optimizer.save_checkpoint(&path).unwrap();

        let mut new_optimizer = SGD::with_defaults(0.01f32);
        new_optimizer.load_checkpoint(&path).unwrap();
        assert_eq!(new_optimizer.get_lr(), 0.05f32);
    }

    #[test]
    fn test_type_mismatch_error() {
        let sgd_state = SGD::with_defaults(0.1f32).state_dict();
        let mut adam = Adam::with_defaults(0.1f32);
        assert!(matches!(
            adam.load_state_dict(&sgd_state),
            Err(OptimizerError::StateMismatch(_))
        ));
    }

    #[test]
    fn test_param_count_mismatch_error() {
        let mut engine = Engine::<f64>::new();
        let model = Linear::<f64>::new(3, 2, true).unwrap();
        let mut optimizer = SGD::with_defaults(0.1);
        optimizer.add_module_params(&model, &mut engine);
        assert_eq!(optimizer.params().len(), 2);

        let mut other = SGD::with_defaults(0.1);
        assert!(other.load_state_dict(&optimizer.state_dict()).is_err());
    }
}
