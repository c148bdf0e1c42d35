// src/nn/layers/linear.rs
// Fully connected layer on top of the graph engine.

use crate::backend::{Float, Tensor};
use crate::graph::{Engine, NodeId};
use crate::nn::init::{default_bias_bound, default_weight_bound};
use crate::nn::layers::utils::reshape_and_broadcast;
use crate::nn::parameter::Parameter;
use crate::nn::Module;
use crate::ops::{Add, MatMul, Transpose};
use rand::Rng;

/// Linear transformation layer: y = x * W^T + b
/// Weight matrix is stored as [out_features, in_features] to match PyTorch convention
#[derive(Debug)]
pub struct Linear<T>
where
    T: Float,
{
    /// Weight matrix [out_features, in_features]
    pub weight: Parameter<T>,
    /// Optional bias vector [out_features]
    pub bias: Option<Parameter<T>>,
    pub in_features: usize,
    pub out_features: usize,
    training: bool,
}

impl<T> Linear<T>
where
    T: Float,
{
    /// Create a new linear layer with PyTorch's default initialization
    pub fn new(in_features: usize, out_features: usize, bias: bool) -> Result<Self, String> {
        Self::with_rng(in_features, out_features, bias, &mut rand::rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut R,
    ) -> Result<Self, String> {
        let mut weight = Parameter::uniform(
            &[out_features, in_features],
            default_weight_bound(in_features),
            rng,
        )?;
        weight.set_name("weight");

        let bias = if bias {
            let mut b = Parameter::uniform(&[out_features], default_bias_bound(in_features), rng)?;
            b.set_name("bias");
            Some(b)
        } else {
            None
        };

        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
            training: true,
        })
    }

    /// Create linear layer with custom weight and bias tensors
    pub fn from_tensors(weight: Tensor<T>, bias: Option<Tensor<T>>) -> Result<Self, String> {
        let &[out_features, in_features] = weight.shape() else {
            return Err(format!(
                "Weight must be [out_features, in_features], got {:?}",
                weight.shape()
            ));
        };

        if let Some(ref bias_tensor) = bias {
            if bias_tensor.shape() != [out_features] {
                return Err(format!(
                    "Bias shape {:?} doesn't match expected [out_features={}]",
                    bias_tensor.shape(),
                    out_features
                ));
            }
        }

        Ok(Self {
            weight: Parameter::new_named(weight, "weight"),
            bias: bias.map(|b| Parameter::new_named(b, "bias")),
            in_features,
            out_features,
            training: true,
        })
    }
}

impl<T> Module<T> for Linear<T>
where
    T: Float,
{
    /// Forward pass: y = x @ W^T + b
    /// Input shape: [batch_size, in_features]
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        let input_shape = graph
            .get_node_shape(input)
            .ok_or("Input tensor not found in graph")?;

        if input_shape.len() != 2 || input_shape[1] != self.in_features {
            return Err(format!(
                "Linear expects input [batch, {}], got {:?}",
                self.in_features, input_shape
            ));
        }

        let weight_node = self.weight.node()?;
        let weight_t = graph
            .apply_operation(Box::new(Transpose), vec![weight_node])
            .map_err(|e| format!("Weight transpose failed: {}", e))?;

        let linear_result = graph
            .apply_operation(Box::new(MatMul), vec![input, weight_t])
            .map_err(|e| format!("Linear transformation failed: {}", e))?;

        match &self.bias {
            Some(bias) => {
                let bias_node = reshape_and_broadcast(bias.node()?, linear_result, graph)?;
                graph
                    .apply_operation(Box::new(Add), vec![linear_result, bias_node])
                    .map_err(|e| format!("Bias addition failed: {}", e))
            }
            None => Ok(linear_result),
        }
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        let mut params = vec![&self.weight];
        if let Some(ref bias) = self.bias {
            params.push(bias);
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter<T>> {
        let mut params = vec![&mut self.weight];
        if let Some(ref mut bias) = self.bias {
            params.push(bias);
        }
        params
    }

    fn training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_linear_forward_known_weights() {
        let weight = Tensor::from_vec(vec![1.0f32, 0.0, -1.0, 2.0, 1.0, 0.5], &[2, 3]).unwrap();
        let bias = Tensor::from_vec(vec![0.5f32, -1.0], &[2]).unwrap();
        let layer = Linear::from_tensors(weight, Some(bias)).unwrap();

        let mut graph = Engine::new();
        layer.create_parameters_in_graph(&mut graph);
        let x = graph.create_variable(
            Tensor::from_vec(vec![1.0, 2.0, 3.0, 0.0, 1.0, 0.0], &[2, 3]).unwrap(),
            false,
        );
        let y = layer.forward(&mut graph, x).unwrap();
        let out = graph.get_tensor(y).unwrap().to_vec();
        assert_eq!(out, vec![-1.5, 4.5, 0.5, 0.0]);
    }

    #[test]
    fn test_linear_gradients_reach_parameters() {
        let layer = Linear::<f64>::with_rng(3, 2, true, &mut StdRng::seed_from_u64(0)).unwrap();
        let mut graph = Engine::new();
        let params = layer.create_parameters_in_graph(&mut graph);
        let x = graph.create_variable(Tensor::ones(&[4, 3]), false);
        let y = layer.forward(&mut graph, x).unwrap();
        let loss = graph
            .apply_operation(Box::new(crate::ops::Sum::new(false)), vec![y])
            .unwrap();
        graph.backward(loss).unwrap();

        // d(sum)/dW = sum over batch of x = 4 everywhere, d/db = batch size
        let grad_w = graph.get_gradient(params["weight"]).unwrap();
        assert_eq!(grad_w.shape(), &[2, 3]);
        for g in grad_w.to_vec() {
            assert_abs_diff_eq!(g, 4.0);
        }
        assert_eq!(graph.get_gradient(params["bias"]).unwrap().to_vec(), vec![4.0, 4.0]);
    }

    #[test]
    fn test_linear_rejects_wrong_width_and_unregistered_use() {
        let layer = Linear::<f32>::new(3, 2, false).unwrap();
        let mut graph = Engine::new();
        let x = graph.create_variable(Tensor::ones(&[1, 3]), false);
        assert!(layer.forward(&mut graph, x).is_err());

        layer.create_parameters_in_graph(&mut graph);
        let bad = graph.create_variable(Tensor::ones(&[1, 4]), false);
        assert!(layer.forward(&mut graph, bad).is_err());
        assert_eq!(layer.num_parameters(), 6);
    }

    #[test]
    fn test_default_init_stays_in_bounds() {
        let layer = Linear::<f32>::with_rng(64, 8, true, &mut StdRng::seed_from_u64(3)).unwrap();
        let bound = 1.0 / 8.0;
        assert!(layer.weight.data.to_vec().iter().all(|w| w.abs() <= bound));
        assert!(layer
            .bias
            .as_ref()
            .unwrap()
            .data
            .to_vec()
            .iter()
            .all(|b| b.abs() <= bound));
    }
}
