// src/training/checkpoint.rs
// Model weights on disk, bincode encoded.

use crate::backend::{Float, Tensor};
use crate::error::{BrainAgeError, Result};
use crate::models::{flat_features_for, BrainAgeCNN, HIDDEN_FEATURES};
use crate::nn::Module;
use bincode::{config, decode_from_slice, encode_to_vec, Decode, Encode};
use std::path::Path;
use tracing::info;

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct NamedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl NamedTensor {
    pub fn from_tensor<T: Float>(name: &str, tensor: &Tensor<T>) -> Self {
        Self {
            name: name.to_string(),
            shape: tensor.shape().to_vec(),
            data: tensor.data().iter().map(|v| v.as_f64()).collect(),
        }
    }

    pub fn to_tensor<T: Float>(&self) -> Result<Tensor<T>> {
        let data = self.data.iter().map(|&v| T::cast(v)).collect();
        Tensor::from_vec(data, &self.shape)
            .map_err(|e| BrainAgeError::Checkpoint(format!("{}: {}", self.name, e)))
    }
}

/// Architecture, preprocessing size and weights of a trained model.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct ModelCheckpoint {
    pub version: u32,
    pub feats: usize,
    pub adap_pool: usize,
    pub img_size: i64,
    pub parameters: Vec<NamedTensor>,
    pub buffers: Vec<NamedTensor>,
}

/// Checks that `stored` lines up name by name and shape by shape with `expected`.
fn check_layout(kind: &str, expected: &[(String, Vec<usize>)], stored: &[NamedTensor]) -> Result<()> {
    if expected.len() != stored.len() {
        return Err(BrainAgeError::Checkpoint(format!(
            "model has {} {}, checkpoint has {}",
            expected.len(),
            kind,
            stored.len()
        )));
    }
    for ((name, shape), tensor) in expected.iter().zip(stored) {
        if *name != tensor.name {
            return Err(BrainAgeError::Checkpoint(format!(
                "expected {} '{}', checkpoint has '{}'",
                kind, name, tensor.name
            )));
        }
        if *shape != tensor.shape {
            return Err(BrainAgeError::Checkpoint(format!(
                "{} '{}' has shape {:?} in the model but {:?} in the checkpoint",
                kind, name, shape, tensor.shape
            )));
        }
    }
    Ok(())
}

impl ModelCheckpoint {
    /// Snapshot of the model's current host-side weights. Parameters must have
    /// been synced from the graph beforehand.
    pub fn from_model<T: Float>(model: &BrainAgeCNN<T>, img_size: i64) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            feats: model.feats,
            adap_pool: model.adap_pool,
            img_size,
            parameters: model
                .named_parameters()
                .into_iter()
                .map(|(name, p)| NamedTensor::from_tensor(&name, &p.data))
                .collect(),
            buffers: model
                .buffers()
                .into_iter()
                .map(|(name, b)| NamedTensor::from_tensor(&name, &b.borrow()))
                .collect(),
        }
    }

    /// Copies the stored weights into `model`. Nothing is written unless every
    /// name, count and shape matches.
    pub fn apply_to<T: Float, M: Module<T>>(&self, model: &mut M) -> Result<()> {
        let expected_params: Vec<(String, Vec<usize>)> = model
            .named_parameters()
            .into_iter()
            .map(|(name, p)| (name, p.shape().to_vec()))
            .collect();
        check_layout("parameter", &expected_params, &self.parameters)?;

        let expected_buffers: Vec<(String, Vec<usize>)> = model
            .buffers()
            .into_iter()
            .map(|(name, b)| (name, b.borrow().shape().to_vec()))
            .collect();
        check_layout("buffer", &expected_buffers, &self.buffers)?;

        let params = self
            .parameters
            .iter()
            .map(NamedTensor::to_tensor::<T>)
            .collect::<Result<Vec<Tensor<T>>>>()?;
        let buffers = self
            .buffers
            .iter()
            .map(NamedTensor::to_tensor::<T>)
            .collect::<Result<Vec<Tensor<T>>>>()?;

        for (param, tensor) in model.parameters_mut().into_iter().zip(params) {
            param.data = tensor;
        }
        for ((_, cell), tensor) in model.buffers().into_iter().zip(buffers) {
            *cell.borrow_mut() = tensor;
        }
        Ok(())
    }

    /// Builds a fresh model with the stored architecture and weights.
    pub fn build_model<T: Float>(&self) -> Result<BrainAgeCNN<T>> {
        self.check_architecture()?;
        let mut model = BrainAgeCNN::new(self.feats, self.adap_pool)?;
        self.apply_to::<T, _>(&mut model)?;
        Ok(model)
    }

    /// Checks `feats` and `adap_pool` against the stored `fc1.weight`
    /// before any model of that size is allocated.
    fn check_architecture(&self) -> Result<()> {
        let flat = flat_features_for(self.feats, self.adap_pool).map_err(BrainAgeError::Checkpoint)?;
        let expected = [HIDDEN_FEATURES, flat];
        let fc1 = self
            .parameters
            .iter()
            .find(|p| p.name == "fc1.weight")
            .ok_or_else(|| BrainAgeError::Checkpoint("checkpoint has no fc1.weight".to_string()))?;
        if fc1.shape != expected || fc1.data.len() != HIDDEN_FEATURES * flat {
            return Err(BrainAgeError::Checkpoint(format!(
                "fc1.weight has shape {:?} with {} values, feats {} and adap_pool {} need {:?}",
                fc1.shape,
                fc1.data.len(),
                self.feats,
                self.adap_pool,
                expected
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_to_vec(self, config::standard())
            .map_err(|e| BrainAgeError::Checkpoint(format!("failed to encode: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (checkpoint, _): (Self, usize) = decode_from_slice(bytes, config::standard())
            .map_err(|e| BrainAgeError::Checkpoint(format!("failed to decode: {}", e)))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(BrainAgeError::Checkpoint(format!(
                "unsupported checkpoint version {}",
                checkpoint.version
            )));
        }
        Ok(checkpoint)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes()?)?;
        info!(path = %path.display(), "saved checkpoint");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model(seed: u64) -> BrainAgeCNN<f32> {
        BrainAgeCNN::with_rng(2, 1, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn test_apply_restores_weights_and_buffers() {
        let source = model(1);
        *source.buffers()[0].1.borrow_mut() = Tensor::full(&[2], 0.5);
        let checkpoint = ModelCheckpoint::from_model(&source, 32);

        let bytes = checkpoint.to_bytes().unwrap();
        let decoded = ModelCheckpoint::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, checkpoint);

        let mut target = model(2);
        decoded.apply_to(&mut target).unwrap();
        for ((_, a), (_, b)) in source.named_parameters().iter().zip(target.named_parameters()) {
            assert_eq!(a.data, b.data);
        }
        assert_eq!(target.buffers()[0].1.borrow().to_vec(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_architecture_mismatch_is_rejected() {
        let checkpoint = ModelCheckpoint::from_model(&model(1), 32);
        let mut wider = BrainAgeCNN::<f32>::with_rng(4, 1, &mut StdRng::seed_from_u64(0)).unwrap();
        let before = wider.named_parameters()[0].1.data.clone();
        assert!(checkpoint.apply_to(&mut wider).is_err());
        assert_eq!(wider.named_parameters()[0].1.data, before);

        let mut renamed = checkpoint.clone();
        renamed.parameters[0].name = "conv0.weight".to_string();
        assert!(renamed.apply_to(&mut model(3)).is_err());

        let mut truncated = checkpoint;
        truncated.buffers.pop();
        assert!(truncated.apply_to(&mut model(3)).is_err());
    }

    #[test]
    fn test_file_round_trip_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.ckpt");
        let checkpoint = ModelCheckpoint::from_model(&model(5), -1);
        checkpoint.save(&path).unwrap();

        let loaded = ModelCheckpoint::load(&path).unwrap();
        assert_eq!(loaded.img_size, -1);
        let rebuilt: BrainAgeCNN<f32> = loaded.build_model().unwrap();
        assert_eq!(rebuilt.feats, 2);

        assert!(ModelCheckpoint::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_oversized_architecture_is_an_error() {
        let mut checkpoint = ModelCheckpoint::from_model(&model(1), 8);
        checkpoint.adap_pool = 1 << 22;
        match checkpoint.build_model::<f32>() {
            Err(BrainAgeError::Checkpoint(_)) => {}
            other => panic!("expected a checkpoint error, got {:?}", other.map(|m| m.feats)),
        }

        // fits in usize but disagrees with the stored fc1
        let mut wider = ModelCheckpoint::from_model(&model(1), 8);
        wider.feats = 3;
        assert!(matches!(
            wider.build_model::<f32>(),
            Err(BrainAgeError::Checkpoint(_))
        ));
    }
}
