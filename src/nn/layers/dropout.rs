// src/nn/layers/dropout.rs
// Dropout layers for regularization during training.

use crate::backend::{Float, Tensor};
use crate::graph::{Engine, NodeId};
use crate::nn::Module;
use crate::ops::Mul;
use rand::Rng;

fn check_probability(p: f64) -> Result<(), String> {
    if !(0.0..1.0).contains(&p) {
        return Err(format!("Dropout probability must be in [0, 1), got {}", p));
    }
    Ok(())
}

/// Inverted dropout mask: each entry is 0 with probability `p`, else 1/(1-p).
fn dropout_mask<T: Float>(shape: &[usize], p: f64) -> Result<Tensor<T>, String> {
    let total_elements: usize = shape.iter().product();
    let keep_prob = 1.0 - p;
    let scale = T::cast(1.0 / keep_prob);

    let mut rng = rand::rng();
    let mask_data = (0..total_elements)
        .map(|_| {
            if rng.random::<f64>() < keep_prob {
                scale
            } else {
                T::zero()
            }
        })
        .collect();

    Tensor::from_vec(mask_data, shape)
}

/// Applies a mask of `mask_shape` (broadcast against the input) during training.
fn apply_dropout<T: Float>(
    graph: &mut Engine<T>,
    input: NodeId,
    mask_shape: &[usize],
    p: f64,
) -> Result<NodeId, String> {
    let mask_tensor = dropout_mask(mask_shape, p)
        .map_err(|e| format!("Failed to create dropout mask: {}", e))?;
    let mask_node = graph.create_variable(mask_tensor, false);
    graph.apply_operation(Box::new(Mul), vec![input, mask_node])
}

/// Element-wise dropout.
/// During training each element is zeroed with probability p and the
/// survivors are scaled by 1/(1-p); during evaluation it is the identity.
#[derive(Debug, Clone)]
pub struct Dropout {
    pub p: f64,
    training: bool,
}

impl Dropout {
    pub fn new(p: f64) -> Result<Self, String> {
        check_probability(p)?;
        Ok(Self { p, training: true })
    }
}

impl<T> Module<T> for Dropout
where
    T: Float,
{
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        if !self.training || self.p == 0.0 {
            return Ok(input);
        }
        let shape = graph
            .get_node_shape(input)
            .ok_or("Input tensor not found in graph")?
            .to_vec();
        apply_dropout(graph, input, &shape, self.p)
    }

    fn training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

/// Channel dropout for volumetric feature maps [N, C, D, H, W]:
/// whole channels are zeroed together.
#[derive(Debug, Clone)]
pub struct Dropout3d {
    pub p: f64,
    training: bool,
}

impl Dropout3d {
    pub fn new(p: f64) -> Result<Self, String> {
        check_probability(p)?;
        Ok(Self { p, training: true })
    }
}

impl<T> Module<T> for Dropout3d
where
    T: Float,
{
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        if !self.training || self.p == 0.0 {
            return Ok(input);
        }
        let shape = graph
            .get_node_shape(input)
            .ok_or("Input tensor not found in graph")?;
        if shape.len() != 5 {
            return Err(format!(
                "Dropout3d expects input [batch, channels, d, h, w], got {:?}",
                shape
            ));
        }
        let mask_shape = [shape[0], shape[1], 1, 1, 1];
        apply_dropout(graph, input, &mask_shape, self.p)
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
    fn test_probability_range() {
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout3d::new(0.4).is_ok());
    }

    #[test]
    fn test_eval_mode_is_identity() {
        let mut dropout = Dropout::new(0.5).unwrap();
        Module::<f32>::eval(&mut dropout);
        let mut graph = Engine::<f32>::new();
        let x = graph.create_variable(Tensor::ones(&[4, 4]), false);
        assert_eq!(dropout.forward(&mut graph, x).unwrap(), x);
    }

    #[test]
    fn test_inverted_scaling() {
        let dropout = Dropout::new(0.5).unwrap();
        let mut graph = Engine::<f64>::new();
        let x = graph.create_variable(Tensor::ones(&[1000]), false);
        let y = dropout.forward(&mut graph, x).unwrap();
        let out = graph.get_tensor(y).unwrap().to_vec();
        assert!(out.iter().all(|&v| v == 0.0 || v == 2.0));
        let kept = out.iter().filter(|&&v| v > 0.0).count();
        assert!((350..650).contains(&kept), "kept {}", kept);
    }

    #[test]
    fn test_channel_dropout_zeroes_whole_channels() {
        let dropout = Dropout3d::new(0.5).unwrap();
        let mut graph = Engine::<f32>::new();
        let x = graph.create_variable(Tensor::ones(&[2, 8, 2, 2, 2]), false);
        let y = dropout.forward(&mut graph, x).unwrap();
        let out = graph.get_tensor(y).unwrap().to_vec();
        for channel in out.chunks(8) {
            assert!(channel.iter().all(|&v| v == channel[0]));
            assert!(channel[0] == 0.0 || channel[0] == 2.0);
        }
    }
}
