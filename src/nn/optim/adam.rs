use crate::backend::{Float, Tensor};
use crate::graph::{Engine, NodeId};
use crate::nn::optim::{
    param_and_grad, restore_buffers, Optimizer, OptimizerError, OptimizerStateDict,
};
use std::collections::HashMap;

/// Adam optimizer with bias correction and optional AdamW-style decoupled
/// weight decay.
#[derive(Debug, Clone)]
pub struct Adam<T>
where
    T: Float,
{
    lr: T,
    beta1: T,
    beta2: T,
    eps: T,
    weight_decay: T,
    params: Vec<NodeId>,
    first_moments: HashMap<NodeId, Tensor<T>>,
    second_moments: HashMap<NodeId, Tensor<T>>,
    step_count: u64,
}

impl<T> Adam<T>
where
    T: Float,
{
    pub fn new(lr: T, beta1: T, beta2: T, eps: T, weight_decay: T) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
            params: Vec::new(),
            first_moments: HashMap::new(),
            second_moments: HashMap::new(),
            step_count: 0,
        }
    }

    pub fn with_defaults(lr: T) -> Self {
        Self::adamw(lr, T::zero())
    }

    /// AdamW variant with decoupled weight decay
    pub fn adamw(lr: T, weight_decay: T) -> Self {
        Self::new(lr, T::cast(0.9), T::cast(0.999), T::cast(1e-8), weight_decay)
    }

    /// Reset optimizer state for fresh training
    pub fn reset_state(&mut self) {
        self.first_moments.clear();
        self.second_moments.clear();
        self.step_count = 0;
    }

    /// Compute bias correction factors for current step
    fn compute_bias_corrections(&self) -> (T, T) {
        let step = self.step_count as i32;
        (
            T::one() - self.beta1.powi(step),
            T::one() - self.beta2.powi(step),
        )
    }

    fn update_moments(&mut self, node: NodeId, grad: &Tensor<T>) -> Result<(), OptimizerError> {
        // m = beta1 * m + (1 - beta1) * grad
        let first = self
            .first_moments
            .entry(node)
            .or_insert_with(|| Tensor::zeros(grad.shape()));
        *first = first
            .mul_scalar(self.beta1)
            .add(&grad.mul_scalar(T::one() - self.beta1))
            .map_err(OptimizerError::TensorOperation)?;

        // v = beta2 * v + (1 - beta2) * grad²
        let grad_squared = grad.mul(grad).map_err(OptimizerError::TensorOperation)?;
        let second = self
            .second_moments
            .entry(node)
            .or_insert_with(|| Tensor::zeros(grad.shape()));
        *second = second
            .mul_scalar(self.beta2)
            .add(&grad_squared.mul_scalar(T::one() - self.beta2))
            .map_err(OptimizerError::TensorOperation)?;
        Ok(())
    }

    /// lr * m_hat / (sqrt(v_hat) + eps)
    fn compute_update(
        &self,
        node: NodeId,
        bias_correction1: T,
        bias_correction2: T,
    ) -> Result<Tensor<T>, OptimizerError> {
        let first = self
            .first_moments
            .get(&node)
            .ok_or(OptimizerError::ParameterNotFound(node))?;
        let second = self
            .second_moments
            .get(&node)
            .ok_or(OptimizerError::ParameterNotFound(node))?;

        let denominator = second
            .div_scalar(bias_correction2)
            .sqrt()
            .add_scalar(self.eps);
        first
            .div_scalar(bias_correction1)
            .div(&denominator)
            .map(|update| update.mul_scalar(self.lr))
            .map_err(OptimizerError::TensorOperation)
    }
}

impl<T> Optimizer<T> for Adam<T>
where
    T: Float,
{
    fn step(&mut self, engine: &mut Engine<T>) -> Result<(), OptimizerError> {
        self.step_count += 1;
        let (bias_correction1, bias_correction2) = self.compute_bias_corrections();

        for i in 0..self.params.len() {
            let node = self.params[i];
            let Some((params, grad)) = param_and_grad(engine, node)? else {
                continue;
            };

            self.update_moments(node, &grad)?;
            let update = self.compute_update(node, bias_correction1, bias_correction2)?;

            // Decoupled weight decay acts on the parameters directly.
            let decayed = if self.weight_decay != T::zero() {
                params.sub(&params.mul_scalar(self.weight_decay * self.lr))
            } else {
                Ok(params)
            };
            let new_params = decayed
                .and_then(|p| p.sub(&update))
                .map_err(OptimizerError::TensorOperation)?;

            engine
                .update_parameter(node, new_params)
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
        let mut state_dict = OptimizerStateDict::new("Adam", self.params.len());
        state_dict.step_count = self.step_count;

        for (key, value) in [
            ("lr", self.lr),
            ("beta1", self.beta1),
            ("beta2", self.beta2),
            ("eps", self.eps),
            ("weight_decay", self.weight_decay),
        ] {
            state_dict.hyperparameters.insert(key.to_string(), value.as_f64());
        }

        for (index, node) in self.params.iter().enumerate() {
            if let Some(first) = self.first_moments.get(node) {
                state_dict.add_buffer(index, first, "first_moment");
            }
            if let Some(second) = self.second_moments.get(node) {
                state_dict.add_buffer(index, second, "second_moment");
            }
        }

        state_dict
    }

    fn load_state_dict(&mut self, state_dict: &OptimizerStateDict) -> Result<(), OptimizerError> {
        state_dict.check_compatible("Adam", self.params.len())?;

        let first_moments = restore_buffers(state_dict, "first_moment", &self.params)?;
        let second_moments = restore_buffers(state_dict, "second_moment", &self.params)?;

        self.step_count = state_dict.step_count;
        self.first_moments = first_moments;
        self.second_moments = second_moments;

        let restore = |key: &str, current: T| state_dict.hyperparameter(key).map_or(current, T::cast);
        self.lr = restore("lr", self.lr);
        self.beta1 = restore("beta1", self.beta1);
        self.beta2 = restore("beta2", self.beta2);
        self.eps = restore("eps", self.eps);
        self.weight_decay = restore("weight_decay", self.weight_decay);

        Ok(())
    }
}
