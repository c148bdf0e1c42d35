use crate::backend::{Float, Tensor};
use crate::graph::{Engine, NodeId};
use crate::nn::optim::{
    param_and_grad, restore_buffers, Optimizer, OptimizerError, OptimizerStateDict,
};
use std::collections::HashMap;

/// Stochastic Gradient Descent optimizer with momentum and weight decay
/// Uses L2 weight decay folded into the gradient (not AdamW-style decoupled weight decay)
#[derive(Debug, Clone)]
pub struct SGD<T>
where
    T: Float,
{
    lr: T,
    momentum: T,
    weight_decay: T,
    nesterov: bool,
    params: Vec<NodeId>,
    momentum_buffers: HashMap<NodeId, Tensor<T>>,
    step_count: u64,
}

impl<T> SGD<T>
where
    T: Float,
{
    pub fn new(lr: T, momentum: T, weight_decay: T, nesterov: bool) -> Self {
        Self {
            lr,
            momentum,
            weight_decay,
            nesterov,
            params: Vec::new(),
            momentum_buffers: HashMap::new(),
            step_count: 0,
        }
    }

    pub fn with_defaults(lr: T) -> Self {
        Self::new(lr, T::zero(), T::zero(), false)
    }

    pub fn with_momentum(lr: T, momentum: T) -> Self {
        Self::new(lr, momentum, T::zero(), false)
    }

    pub fn set_nesterov(&mut self, nesterov: bool) {
        self.nesterov = nesterov;
    }

    /// effective_grad = grad + weight_decay * params
    fn apply_weight_decay(&self, grad: Tensor<T>, params: &Tensor<T>) -> Result<Tensor<T>, OptimizerError> {
        if self.weight_decay == T::zero() {
            return Ok(grad);
        }
        grad.add(&params.mul_scalar(self.weight_decay))
            .map_err(OptimizerError::TensorOperation)
    }

    /// buf = momentum * buf + grad; returns the direction to step along.
    fn momentum_direction(&mut self, node: NodeId, grad: Tensor<T>) -> Result<Tensor<T>, OptimizerError> {
        if self.momentum == T::zero() {
            return Ok(grad);
        }

        let momentum = self.momentum;
        // PyTorch seeds the buffer with the first gradient.
        let buffer = match self.momentum_buffers.remove(&node) {
            Some(buffer) => buffer
                .mul_scalar(momentum)
                .add(&grad)
                .map_err(OptimizerError::TensorOperation)?,
            None => grad.clone(),
        };

        let direction = if self.nesterov {
            grad.add(&buffer.mul_scalar(momentum))
                .map_err(OptimizerError::TensorOperation)?
        } else {
            buffer.clone()
        };
        self.momentum_buffers.insert(node, buffer);
        Ok(direction)
    }
}

impl<T> Optimizer<T> for SGD<T>
where
    T: Float,
{
    fn step(&mut self, engine: &mut Engine<T>) -> Result<(), OptimizerError> {
        self.step_count += 1;

        for i in 0..self.params.len() {
            let node = self.params[i];
            let Some((params, grad)) = param_and_grad(engine, node)? else {
                continue;
            };

            let effective_grad = self.apply_weight_decay(grad, &params)?;
            let direction = self.momentum_direction(node, effective_grad)?;
            let updated_params = params
                .sub(&direction.mul_scalar(self.lr))
                .map_err(OptimizerError::TensorOperation)?;

            engine
                .update_parameter(node, updated_params)
                .map_err(OptimizerError::TensorOperation)?;
        }
        Ok(())
    }

    fn params(&self) -> &[NodeId] {
        &self.params
    }

    fn add_param(&mut self, param_node_id: NodeId) {
        if !self.params.contains(&param_node_id) {
            self.params.push(param_node_id);
        }
    }

    fn get_lr(&self) -> T {
        self.lr
    }

    fn set_lr(&mut self, lr: T) {
        self.lr = lr;
    }

    fn get_step_count(&self) -> u64 {
        self.step_count
    }

    fn state_dict(&self) -> OptimizerStateDict {
        let mut state_dict = OptimizerStateDict::new("SGD", self.params.len());
        state_dict.step_count = self.step_count;

        for (key, value) in [
            ("lr", self.lr.as_f64()),
            ("momentum", self.momentum.as_f64()),
            ("weight_decay", self.weight_decay.as_f64()),
            ("nesterov", if self.nesterov { 1.0 } else { 0.0 }),
        ] {
            state_dict.hyperparameters.insert(key.to_string(), value);
        }

        for (index, node) in self.params.iter().enumerate() {
            if let Some(buffer) = self.momentum_buffers.get(node) {
                state_dict.add_buffer(index, buffer, "momentum");
            }
        }
        state_dict
    }

    fn load_state_dict(&mut self, state_dict: &OptimizerStateDict) -> Result<(), OptimizerError> {
        state_dict.check_compatible("SGD", self.params.len())?;

        self.momentum_buffers = restore_buffers(state_dict, "momentum", &self.params)?;
        self.step_count = state_dict.step_count;

        let restore = |key: &str, current: T| state_dict.hyperparameter(key).map_or(current, T::cast);
        self.lr = restore("lr", self.lr);
        self.momentum = restore("momentum", self.momentum);
        self.weight_decay = restore("weight_decay", self.weight_decay);
        if let Some(nesterov) = state_dict.hyperparameter("nesterov") {
            self.nesterov = nesterov > 0.5;
        }
        Ok(())
    }
}
