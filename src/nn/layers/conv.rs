// src/nn/layers/conv.rs
// Volumetric convolution layer.

use crate::backend::{Float, Tensor};
use crate::graph::{Engine, NodeId};
use crate::nn::init::{default_bias_bound, default_weight_bound};
use crate::nn::layers::utils::reshape_and_broadcast;
use crate::nn::parameter::Parameter;
use crate::nn::Module;
use crate::ops::{Add, Conv3d as Conv3dOp};
use rand::Rng;

/// Padding policy of a convolution with unit stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Output keeps the spatial size of the input. Needs an odd kernel.
    Same,
    /// No padding.
    Valid,
    /// Explicit symmetric zero padding.
    Explicit(usize),
}

impl Padding {
    fn resolve(self, kernel_size: usize) -> Result<usize, String> {
        match self {
            Padding::Same if kernel_size % 2 == 1 => Ok((kernel_size - 1) / 2),
            Padding::Same => Err(format!(
                "Same padding needs an odd kernel size, got {}",
                kernel_size
            )),
            Padding::Valid => Ok(0),
            Padding::Explicit(p) => Ok(p),
        }
    }
}

/// 3D convolution over [batch, channels, d, h, w] inputs.
/// Weight: [out_channels, in_channels, k, k, k]
#[derive(Debug)]
pub struct Conv3d<T>
where
    T: Float,
{
    pub weight: Parameter<T>,
    pub bias: Option<Parameter<T>>,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    padding: usize,
    training: bool,
}

impl<T> Conv3d<T>
where
    T: Float,
{
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: Padding,
    ) -> Result<Self, String> {
        Self::with_rng(in_channels, out_channels, kernel_size, padding, &mut rand::rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        padding: Padding,
        rng: &mut R,
    ) -> Result<Self, String> {
        if in_channels == 0 || out_channels == 0 || kernel_size == 0 {
            return Err(format!(
                "Conv3d needs positive sizes, got in={} out={} k={}",
                in_channels, out_channels, kernel_size
            ));
        }
        let padding = padding.resolve(kernel_size)?;
        let fan_in = in_channels * kernel_size.pow(3);

        let mut weight = Parameter::uniform(
            &[out_channels, in_channels, kernel_size, kernel_size, kernel_size],
            default_weight_bound(fan_in),
            rng,
        )?;
        weight.set_name("weight");
        let mut bias = Parameter::uniform(&[out_channels], default_bias_bound(fan_in), rng)?;
        bias.set_name("bias");

        Ok(Self {
            weight,
            bias: Some(bias),
            in_channels,
            out_channels,
            kernel_size,
            padding,
            training: true,
        })
    }

    /// Layer with explicit weights [O, C, k, k, k] and optional bias [O].
    pub fn from_tensors(
        weight: Tensor<T>,
        bias: Option<Tensor<T>>,
        padding: Padding,
    ) -> Result<Self, String> {
        let &[out_channels, in_channels, k0, k1, k2] = weight.shape() else {
            return Err(format!("Conv3d weight must be 5D, got {:?}", weight.shape()));
        };
        if k0 != k1 || k1 != k2 {
            return Err(format!("Conv3d kernel must be cubic, got {:?}", weight.shape()));
        }
        if let Some(ref b) = bias {
            if b.shape() != [out_channels] {
                return Err(format!(
                    "Bias shape {:?} doesn't match out_channels {}",
                    b.shape(),
                    out_channels
                ));
            }
        }
        Ok(Self {
            weight: Parameter::new_named(weight, "weight"),
            bias: bias.map(|b| Parameter::new_named(b, "bias")),
            in_channels,
            out_channels,
            kernel_size: k0,
            padding: padding.resolve(k0)?,
            training: true,
        })
    }

    pub fn padding(&self) -> usize {
        self.padding
    }
}

impl<T> Module<T> for Conv3d<T>
where
    T: Float,
{
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        let input_shape = graph
            .get_node_shape(input)
            .ok_or("Input tensor not found in graph")?;
        if input_shape.len() != 5 || input_shape[1] != self.in_channels {
            return Err(format!(
                "Conv3d expects input [batch, {}, d, h, w], got {:?}",
                self.in_channels, input_shape
            ));
        }

        let conv = graph
            .apply_operation(
                Box::new(Conv3dOp::new(self.padding)),
                vec![input, self.weight.node()?],
            )
            .map_err(|e| format!("Conv3d forward failed: {}", e))?;

        match &self.bias {
            Some(bias) => {
                let bias_node = reshape_and_broadcast(bias.node()?, conv, graph)?;
                graph.apply_operation(Box::new(Add), vec![conv, bias_node])
            }
            None => Ok(conv),
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

    #[test]
    fn test_same_padding_keeps_shape() {
        let layer = Conv3d::<f32>::new(2, 4, 3, Padding::Same).unwrap();
        assert_eq!(layer.padding(), 1);
        assert_eq!(layer.num_parameters(), 4 * 2 * 27 + 4);

        let mut graph = Engine::new();
        layer.create_parameters_in_graph(&mut graph);
        let x = graph.create_variable(Tensor::ones(&[2, 2, 5, 4, 3]), false);
        let y = layer.forward(&mut graph, x).unwrap();
        assert_eq!(graph.get_node_shape(y).unwrap(), &[2, 4, 5, 4, 3]);
    }

    #[test]
    fn test_even_kernel_rejects_same_padding() {
        assert!(Conv3d::<f32>::new(1, 1, 2, Padding::Same).is_err());
        let valid = Conv3d::<f32>::new(1, 1, 2, Padding::Valid).unwrap();
        assert_eq!(valid.padding(), 0);
    }

    #[test]
    fn test_bias_is_added_per_channel() {
        let weight = Tensor::<f64>::zeros(&[2, 1, 1, 1, 1]);
        let bias = Tensor::from_vec(vec![1.5, -2.0], &[2]).unwrap();
        let layer = Conv3d::from_tensors(weight, Some(bias), Padding::Same).unwrap();

        let mut graph = Engine::new();
        layer.create_parameters_in_graph(&mut graph);
        let x = graph.create_variable(Tensor::ones(&[1, 1, 2, 2, 2]), false);
        let y = layer.forward(&mut graph, x).unwrap();
        let out = graph.get_tensor(y).unwrap().to_vec();
        assert!(out[..8].iter().all(|&v| v == 1.5));
        assert!(out[8..].iter().all(|&v| v == -2.0));
    }
}
