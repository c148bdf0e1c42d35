// src/models/brain_age_cnn.rs
// 3D CNN regressor from a T1w volume to the subject's age.

use crate::backend::{Float, Tensor};
use crate::graph::{Engine, NodeId};
use crate::nn::module::prefixed;
use crate::nn::{
    AdaptiveAvgPool3d, BatchNorm1d, BatchNorm3d, Conv3d, Dropout, Dropout3d, Flatten, Linear,
    MaxPool3d, Module, Padding, Parameter, ReLU,
};
use rand::Rng;
use std::cell::RefCell;

/// Width of the fully connected hidden layer.
pub const HIDDEN_FEATURES: usize = 1024;
const CONV_DROPOUT: f64 = 0.4;
const FC_DROPOUT: f64 = 0.3;

/// Input size of `fc1` for an architecture, `4 · feats · adap_pool³`.
/// Fails when that or the size of `fc1` does not fit in `usize`.
pub fn flat_features_for(feats: usize, adap_pool: usize) -> Result<usize, String> {
    adap_pool
        .checked_pow(3)
        .and_then(|cube| cube.checked_mul(feats))
        .and_then(|n| n.checked_mul(4))
        .filter(|n| n.checked_mul(HIDDEN_FEATURES).is_some())
        .ok_or_else(|| {
            format!(
                "BrainAgeCNN with feats {} and adap_pool {} is too large",
                feats, adap_pool
            )
        })
}

/// Three conv blocks followed by a two-layer regression head.
///
/// ```text
/// conv1(1→f) bn1 relu pool(2) drop3d(0.4)
/// conv2(f→2f) bn2 relu pool(2) drop3d(0.4)
/// conv3(2f→4f) bn3 relu adaptive_avg_pool(a) flatten
/// fc1(4f·a³→1024) bn4 relu drop(0.3) fc2(1024→1)
/// ```
#[derive(Debug)]
pub struct BrainAgeCNN<T>
where
    T: Float,
{
    pub feats: usize,
    pub adap_pool: usize,
    conv1: Conv3d<T>,
    bn1: BatchNorm3d<T>,
    conv2: Conv3d<T>,
    bn2: BatchNorm3d<T>,
    conv3: Conv3d<T>,
    bn3: BatchNorm3d<T>,
    fc1: Linear<T>,
    bn4: BatchNorm1d<T>,
    fc2: Linear<T>,
    relu: ReLU,
    pool: MaxPool3d,
    adaptive_pool: AdaptiveAvgPool3d,
    flatten: Flatten,
    conv_dropout: Dropout3d,
    fc_dropout: Dropout,
    training: bool,
}

impl<T> BrainAgeCNN<T>
where
    T: Float,
{
    pub fn new(feats: usize, adap_pool: usize) -> Result<Self, String> {
        Self::with_rng(feats, adap_pool, &mut rand::rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        feats: usize,
        adap_pool: usize,
        rng: &mut R,
    ) -> Result<Self, String> {
        if feats == 0 || adap_pool == 0 {
            return Err(format!(
                "BrainAgeCNN needs positive feats and adap_pool, got {} and {}",
                feats, adap_pool
            ));
        }
        let flat_features = flat_features_for(feats, adap_pool)?;
        Ok(Self {
            feats,
            adap_pool,
            conv1: Conv3d::with_rng(1, feats, 3, Padding::Same, rng)?,
            bn1: BatchNorm3d::new_default(feats),
            conv2: Conv3d::with_rng(feats, 2 * feats, 3, Padding::Same, rng)?,
            bn2: BatchNorm3d::new_default(2 * feats),
            conv3: Conv3d::with_rng(2 * feats, 4 * feats, 3, Padding::Same, rng)?,
            bn3: BatchNorm3d::new_default(4 * feats),
            fc1: Linear::with_rng(flat_features, HIDDEN_FEATURES, true, rng)?,
            bn4: BatchNorm1d::new_default(HIDDEN_FEATURES),
            fc2: Linear::with_rng(HIDDEN_FEATURES, 1, true, rng)?,
            relu: ReLU::new(),
            pool: MaxPool3d::new(2),
            adaptive_pool: AdaptiveAvgPool3d::cubic(adap_pool),
            flatten: Flatten::new(),
            conv_dropout: Dropout3d::new(CONV_DROPOUT)?,
            fc_dropout: Dropout::new(FC_DROPOUT)?,
            training: true,
        })
    }

    /// Input size of `fc1`.
    pub fn flat_features(&self) -> usize {
        self.fc1.in_features
    }

    /// conv → batch norm → relu
    fn conv_block(
        &self,
        graph: &mut Engine<T>,
        input: NodeId,
        conv: &Conv3d<T>,
        bn: &BatchNorm3d<T>,
    ) -> Result<NodeId, String> {
        let x = conv.forward(graph, input)?;
        let x = bn.forward(graph, x)?;
        self.relu.forward(graph, x)
    }
}

impl<T> Module<T> for BrainAgeCNN<T>
where
    T: Float,
{
    /// `[N, 1, H, W, D]` → `[N, 1]`
    fn forward(&self, graph: &mut Engine<T>, input: NodeId) -> Result<NodeId, String> {
        match graph.get_node_shape(input) {
            Some(&[_, 1, _, _, _]) => {}
            Some(shape) => {
                return Err(format!(
                    "BrainAgeCNN expects input [batch, 1, h, w, d], got {:?}",
                    shape
                ));
            }
            None => return Err("Input tensor not found in graph".to_string()),
        }

        let x = self.conv_block(graph, input, &self.conv1, &self.bn1)?;
        let x = self.pool.forward(graph, x)?;
        let x = self.conv_dropout.forward(graph, x)?;

        let x = self.conv_block(graph, x, &self.conv2, &self.bn2)?;
        let x = self.pool.forward(graph, x)?;
        let x = self.conv_dropout.forward(graph, x)?;

        let x = self.conv_block(graph, x, &self.conv3, &self.bn3)?;
        let x = self.adaptive_pool.forward(graph, x)?;
        let x = self.flatten.forward(graph, x)?;

        let x = self.fc1.forward(graph, x)?;
        let x = self.bn4.forward(graph, x)?;
        let x = self.relu.forward(graph, x)?;
        let x = self.fc_dropout.forward(graph, x)?;
        self.fc2.forward(graph, x)
    }

    fn parameters(&self) -> Vec<&Parameter<T>> {
        self.named_parameters().into_iter().map(|(_, p)| p).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter<T>> {
        let mut params = Vec::new();
        params.extend(self.conv1.parameters_mut());
        params.extend(self.bn1.parameters_mut());
        params.extend(self.conv2.parameters_mut());
        params.extend(self.bn2.parameters_mut());
        params.extend(self.conv3.parameters_mut());
        params.extend(self.bn3.parameters_mut());
        params.extend(self.fc1.parameters_mut());
        params.extend(self.bn4.parameters_mut());
        params.extend(self.fc2.parameters_mut());
        params
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter<T>)> {
        let mut params = Vec::new();
        params.extend(prefixed("conv1", self.conv1.named_parameters()));
        params.extend(prefixed("bn1", self.bn1.named_parameters()));
        params.extend(prefixed("conv2", self.conv2.named_parameters()));
        params.extend(prefixed("bn2", self.bn2.named_parameters()));
        params.extend(prefixed("conv3", self.conv3.named_parameters()));
        params.extend(prefixed("bn3", self.bn3.named_parameters()));
        params.extend(prefixed("fc1", self.fc1.named_parameters()));
        params.extend(prefixed("bn4", self.bn4.named_parameters()));
        params.extend(prefixed("fc2", self.fc2.named_parameters()));
        params
    }

    fn buffers(&self) -> Vec<(String, &RefCell<Tensor<T>>)> {
        let mut buffers = Vec::new();
        buffers.extend(prefixed("bn1", self.bn1.buffers()));
        buffers.extend(prefixed("bn2", self.bn2.buffers()));
        buffers.extend(prefixed("bn3", self.bn3.buffers()));
        buffers.extend(prefixed("bn4", self.bn4.buffers()));
        buffers
    }

    fn training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        self.conv1.set_training(training);
        self.bn1.set_training(training);
        self.conv2.set_training(training);
        self.bn2.set_training(training);
        self.conv3.set_training(training);
        self.bn3.set_training(training);
        self.fc1.set_training(training);
        self.bn4.set_training(training);
        self.fc2.set_training(training);
        Module::<T>::set_training(&mut self.relu, training);
        Module::<T>::set_training(&mut self.pool, training);
        Module::<T>::set_training(&mut self.adaptive_pool, training);
        Module::<T>::set_training(&mut self.flatten, training);
        Module::<T>::set_training(&mut self.conv_dropout, training);
        Module::<T>::set_training(&mut self.fc_dropout, training);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_model() -> BrainAgeCNN<f32> {
        BrainAgeCNN::with_rng(2, 2, &mut StdRng::seed_from_u64(0)).unwrap()
    }

    #[test]
    fn test_default_head_width() {
        assert_eq!(flat_features_for(16, 8).unwrap(), 32768);
        assert_eq!(small_model().flat_features(), 4 * 2 * 8);
    }

    #[test]
    fn test_overflowing_architecture_is_rejected() {
        assert!(flat_features_for(2, 1 << 22).is_err());
        assert!(flat_features_for(usize::MAX / 4, 1).is_err());
        assert!(BrainAgeCNN::<f32>::new(2, 1 << 22).is_err());
    }

    #[test]
    fn test_forward_shape_and_gradients() {
        let model = small_model();
        let mut graph = Engine::new();
        model.create_parameters_in_graph(&mut graph);

        let input = graph.create_variable(
            Tensor::uniform(&[2, 1, 8, 8, 8], -1.0, 1.0, &mut StdRng::seed_from_u64(1)).unwrap(),
            false,
        );
        let output = model.forward(&mut graph, input).unwrap();
        assert_eq!(graph.get_node_shape(output).unwrap(), &[2, 1]);

        let loss = graph
            .apply_operation(Box::new(crate::ops::Sum::new(false)), vec![output])
            .unwrap();
        graph.backward(loss).unwrap();
        for (name, param) in model.named_parameters() {
            let grad = graph.get_gradient(param.node().unwrap());
            assert!(grad.is_some(), "{} has no gradient", name);
            assert_eq!(grad.unwrap().shape(), param.shape());
        }
    }

    #[test]
    fn test_eval_mode_accepts_single_sample() {
        let mut model = small_model();
        model.eval();
        assert!(!model.bn1.training());
        assert!(!Module::<f32>::training(&model.fc_dropout));

        let mut graph = Engine::new();
        graph.set_training(false);
        model.create_parameters_in_graph(&mut graph);
        let input = graph.create_variable(Tensor::ones(&[1, 1, 5, 6, 7]), false);
        let output = model.forward(&mut graph, input).unwrap();
        assert_eq!(graph.get_node_shape(output).unwrap(), &[1, 1]);
    }

    #[test]
    fn test_parameter_names_are_prefixed() {
        let model = small_model();
        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names.len(), 18);
        assert_eq!(names[0], "conv1.weight");
        assert_eq!(names[3], "bn1.bias");
        assert_eq!(names[17], "fc2.bias");

        let buffers: Vec<String> = model.buffers().into_iter().map(|(n, _)| n).collect();
        assert_eq!(buffers.len(), 8);
        assert_eq!(buffers[0], "bn1.running_mean");
    }

    #[test]
    fn test_rejects_multi_channel_input() {
        let model = small_model();
        let mut graph = Engine::new();
        model.create_parameters_in_graph(&mut graph);
        let input = graph.create_variable(Tensor::ones(&[1, 2, 4, 4, 4]), false);
        assert!(model.forward(&mut graph, input).is_err());
    }
}
