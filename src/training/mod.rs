// src/training/mod.rs
// Training loop, evaluation and inference around BrainAgeCNN.

pub mod checkpoint;
pub mod metrics;

pub use checkpoint::{ModelCheckpoint, NamedTensor};
pub use metrics::{EvalMetrics, RunningMetrics};

use crate::backend::{Float, Tensor};
use crate::config::BrainAgeConfig;
use crate::dataset::{DataLoader, DataLoaders, Dataset};
use crate::error::{BrainAgeError, Result};
use crate::graph::{Engine, NodeId};
use crate::models::BrainAgeCNN;
use crate::nn::{Adam, L1Loss, Loss, MSELoss, Module, Optimizer, Reduction, SGD};
use crate::telemetry::progress_bar;
use std::path::Path;
use tracing::{debug, info, warn};

/// Optimizer named by the config: `adam` (decoupled weight decay) or `sgd`.
pub fn build_optimizer<T: Float>(config: &BrainAgeConfig) -> Result<Box<dyn Optimizer<T>>> {
    let lr = T::cast(config.learning_rate);
    let weight_decay = T::cast(config.weight_decay);
    match config.optimizer.as_str() {
        "adam" => Ok(Box::new(Adam::adamw(lr, weight_decay))),
        "sgd" => Ok(Box::new(SGD::new(
            lr,
            T::cast(config.momentum),
            weight_decay,
            false,
        ))),
        other => Err(BrainAgeError::Config(format!(
            "unknown optimizer '{}', expected adam or sgd",
            other
        ))),
    }
}

pub fn build_loss<T: Float>(config: &BrainAgeConfig) -> Result<Box<dyn Loss<T>>> {
    match config.loss.as_str() {
        "mse" => Ok(Box::new(MSELoss::new(Reduction::Mean))),
        "l1" => Ok(Box::new(L1Loss::new(Reduction::Mean))),
        other => Err(BrainAgeError::Config(format!(
            "unknown loss '{}', expected mse or l1",
            other
        ))),
    }
}

/// Outcome of one epoch of `fit`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: f64,
    pub val: EvalMetrics,
    pub checkpointed: bool,
}

pub struct Trainer<T>
where
    T: Float,
{
    model: BrainAgeCNN<T>,
    engine: Engine<T>,
    optimizer: Box<dyn Optimizer<T>>,
    loss_fn: Box<dyn Loss<T>>,
    config: BrainAgeConfig,
    best_val_mae: f64,
}

impl<T> Trainer<T>
where
    T: Float,
{
    /// Fresh model with the architecture of `config`.
    pub fn new(config: BrainAgeConfig) -> Result<Self> {
        config.validate()?;
        let model = BrainAgeCNN::new(config.feats, config.adap_pool)?;
        Self::with_model(config, model)
    }

    /// Wraps an existing model and registers its parameters with a new graph
    /// and optimizer.
    pub fn with_model(config: BrainAgeConfig, model: BrainAgeCNN<T>) -> Result<Self> {
        let mut engine = Engine::new();
        let mut optimizer = build_optimizer(&config)?;
        for (_, param) in model.named_parameters() {
            optimizer.add_param(param.create_in_graph(&mut engine));
        }
        info!(
            parameters = model.num_parameters(),
            optimizer = %config.optimizer,
            loss = %config.loss,
            "initialised BrainAgeCNN"
        );

        Ok(Self {
            loss_fn: build_loss(&config)?,
            model,
            engine,
            optimizer,
            config,
            best_val_mae: f64::INFINITY,
        })
    }

    /// Restores a trained model. Architecture and image size come from the
    /// checkpoint and override `config`.
    pub fn from_checkpoint(mut config: BrainAgeConfig, path: &Path) -> Result<Self> {
        let checkpoint = ModelCheckpoint::load(path)?;
        if checkpoint.img_size != config.img_size {
            warn!(
                config = config.img_size,
                checkpoint = checkpoint.img_size,
                "img_size differs from the checkpoint, using the checkpoint's"
            );
        }
        config.feats = checkpoint.feats;
        config.adap_pool = checkpoint.adap_pool;
        config.img_size = checkpoint.img_size;
        let model = checkpoint.build_model()?;
        Self::with_model(config, model)
    }

    pub fn model(&self) -> &BrainAgeCNN<T> {
        &self.model
    }

    pub fn config(&self) -> &BrainAgeConfig {
        &self.config
    }

    pub fn optimizer(&self) -> &dyn Optimizer<T> {
        self.optimizer.as_ref()
    }

    pub fn best_val_mae(&self) -> f64 {
        self.best_val_mae
    }

    fn set_training(&mut self, training: bool) {
        self.model.set_training(training);
        self.engine.set_training(training);
    }

    /// One optimisation step on a batch. Returns the batch loss.
    pub fn train_step(&mut self, inputs: Tensor<T>, targets: Tensor<T>, epoch: usize) -> Result<f64> {
        self.set_training(true);
        self.optimizer.reset_grad(&mut self.engine);

        let input_node = self.engine.create_variable(inputs, false);
        let target_node = self.engine.create_variable(targets, false);
        let predictions = self.model.forward(&mut self.engine, input_node)?;
        let loss_node = self.loss_fn.forward(&mut self.engine, predictions, target_node)?;
        let loss = self.scalar(loss_node)?;

        if !loss.is_finite() {
            self.engine.prune();
            return Err(BrainAgeError::UnstableTraining { epoch, loss });
        }

        self.engine.backward(loss_node)?;
        self.optimizer.step(&mut self.engine)?;
        self.engine.prune();
        Ok(loss)
    }

    fn scalar(&self, node: NodeId) -> Result<f64> {
        let tensor = self
            .engine
            .get_tensor(node)
            .ok_or_else(|| BrainAgeError::Tensor(format!("Node {} not found", node)))?;
        Ok(tensor.first()?.as_f64())
    }

    /// One pass over `loader`. Returns the mean batch loss.
    pub fn train_epoch<D>(&mut self, loader: &DataLoader<T, D>, epoch: usize) -> Result<f64>
    where
        D: Dataset<T> + Sync,
    {
        let pb = progress_bar(loader.num_batches() as u64, &format!("epoch {}", epoch));
        let mut total = 0.0;
        let mut steps = 0usize;
        for batch in loader.iter() {
            let (inputs, targets) = batch?;
            let loss = self.train_step(inputs, targets, epoch)?;
            total += loss;
            steps += 1;
            if self.config.log_every > 0 && steps % self.config.log_every == 0 {
                debug!(epoch, step = steps, loss, "train step");
            }
            pb.set_message(format!("epoch {} | loss {:.4}", epoch, loss));
            pb.inc(1);
        }
        pb.finish_and_clear();

        Ok(if steps == 0 { f64::NAN } else { total / steps as f64 })
    }

    /// MSE and MAE of the model over `loader`, in eval mode.
    pub fn evaluate<D>(&mut self, loader: &DataLoader<T, D>) -> Result<EvalMetrics>
    where
        D: Dataset<T> + Sync,
    {
        self.set_training(false);
        let result = self.accumulate_metrics(loader);
        self.engine.prune();
        self.set_training(true);
        result
    }

    fn accumulate_metrics<D>(&mut self, loader: &DataLoader<T, D>) -> Result<EvalMetrics>
    where
        D: Dataset<T> + Sync,
    {
        let mut metrics = RunningMetrics::new();
        for batch in loader.iter() {
            let (inputs, targets) = batch?;
            let predictions = self.forward_eval(inputs)?;
            metrics.update(&predictions, &targets)?;
            self.engine.prune();
        }
        Ok(metrics.finish())
    }

    fn forward_eval(&mut self, inputs: Tensor<T>) -> Result<Tensor<T>> {
        let input_node = self.engine.create_variable(inputs, false);
        let output = self.model.forward(&mut self.engine, input_node)?;
        self.engine
            .get_tensor(output)
            .cloned()
            .ok_or_else(|| BrainAgeError::Tensor(format!("Node {} not found", output)))
    }

    /// Predicted ages for a stack of preprocessed volumes `[N, 1, H, W, D]`.
    pub fn predict(&mut self, inputs: Tensor<T>) -> Result<Vec<T>> {
        self.set_training(false);
        let result = self.forward_eval(inputs);
        self.engine.prune();
        self.set_training(true);
        Ok(result?.to_vec())
    }

    /// Trains on `train` for `config.epochs` epochs, validating after each one.
    /// A checkpoint is written whenever the validation MAE improves, or after
    /// every epoch when the validation split is empty.
    pub fn fit_with<D>(
        &mut self,
        train: &DataLoader<T, D>,
        val: &DataLoader<T, D>,
    ) -> Result<Vec<EpochSummary>>
    where
        D: Dataset<T> + Sync,
    {
        info!(
            epochs = self.config.epochs,
            train_samples = train.len(),
            val_samples = val.len(),
            "starting training"
        );
        let mut history = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let train_loss = self.train_epoch(train, epoch)?;
            let val_metrics = self.evaluate(val)?;

            let improved = val_metrics.is_empty() || val_metrics.mae < self.best_val_mae;
            if improved {
                if !val_metrics.is_empty() {
                    self.best_val_mae = val_metrics.mae;
                }
                let path = self.config.checkpoint_path.clone();
                self.save_checkpoint(&path)?;
            }
            info!(
                epoch,
                train_loss,
                val_mse = val_metrics.mse,
                val_mae = val_metrics.mae,
                best_val_mae = self.best_val_mae,
                "epoch finished"
            );
            history.push(EpochSummary {
                epoch,
                train_loss,
                val: val_metrics,
                checkpointed: improved,
            });
        }
        Ok(history)
    }

    pub fn fit(&mut self, loaders: &DataLoaders<T>) -> Result<Vec<EpochSummary>> {
        self.fit_with(&loaders.train, &loaders.val)
    }

    /// Copies the graph's parameters into the model and writes them to `path`.
    pub fn save_checkpoint(&mut self, path: &Path) -> Result<()> {
        self.model.sync_from_graph(&self.engine)?;
        ModelCheckpoint::from_model(&self.model, self.config.img_size).save(path)
    }

    /// Loads weights saved from a model of the same architecture.
    pub fn load_checkpoint(&mut self, path: &Path) -> Result<()> {
        let checkpoint = ModelCheckpoint::load(path)?;
        checkpoint.apply_to::<T, _>(&mut self.model)?;
        for param in self.model.parameters() {
            self.engine.update_parameter(param.node()?, param.data.clone())?;
        }
        info!(path = %path.display(), "loaded checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TensorDataset;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(dir: &Path) -> BrainAgeConfig {
        BrainAgeConfig {
            feats: 2,
            adap_pool: 1,
            img_size: 8,
            batch_size: 2,
            epochs: 2,
            learning_rate: 1e-3,
            checkpoint_path: dir.join("best.ckpt"),
            ..BrainAgeConfig::default()
        }
    }

    fn trainer(dir: &Path) -> Trainer<f32> {
        let model = BrainAgeCNN::with_rng(2, 1, &mut StdRng::seed_from_u64(3)).unwrap();
        Trainer::with_model(config(dir), model).unwrap()
    }

    fn loader(n: usize, seed: u64) -> DataLoader<f32, TensorDataset<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let inputs = Tensor::uniform(&[n, 1, 8, 8, 8], 0.0, 1.0, &mut rng).unwrap();
        let targets = Tensor::uniform(&[n, 1], 20.0, 80.0, &mut rng).unwrap();
        DataLoader::new(TensorDataset::new(inputs, targets).unwrap(), 2, false).unwrap()
    }

    #[test]
    fn test_optimizer_and_loss_selection() {
        let mut config = BrainAgeConfig::default();
        config.optimizer = "sgd".to_string();
        assert_eq!(build_optimizer::<f32>(&config).unwrap().get_lr(), 1e-3);
        config.optimizer = "rmsprop".to_string();
        assert!(build_optimizer::<f32>(&config).is_err());
        config.loss = "huber".to_string();
        assert!(build_loss::<f32>(&config).is_err());
    }

    #[test]
    fn test_train_step_updates_parameters_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(dir.path());
        let nodes_before = trainer.engine.num_nodes();
        let before = trainer.model.named_parameters()[0].1.node().unwrap();
        let weights_before = trainer.engine.get_tensor(before).unwrap().clone();

        let (inputs, targets) = loader(2, 0).epoch_batches().unwrap().remove(0);
        let loss = trainer.train_step(inputs, targets, 1).unwrap();
        assert!(loss.is_finite() && loss > 0.0);
        assert_eq!(trainer.engine.num_nodes(), nodes_before);
        assert_ne!(trainer.engine.get_tensor(before).unwrap(), &weights_before);
        assert_eq!(trainer.optimizer().get_step_count(), 1);
    }

    #[test]
    fn test_non_finite_loss_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(dir.path());
        let inputs = Tensor::ones(&[2, 1, 8, 8, 8]);
        let targets = Tensor::from_vec(vec![f32::NAN, 1.0], &[2, 1]).unwrap();
        match trainer.train_step(inputs, targets, 4) {
            Err(BrainAgeError::UnstableTraining { epoch, loss }) => {
                assert_eq!(epoch, 4);
                assert!(loss.is_nan());
            }
            other => panic!("expected UnstableTraining, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_fit_checkpoints_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(dir.path());
        let train = loader(4, 1);
        let val = loader(3, 2);

        let history = trainer.fit_with(&train, &val).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].checkpointed);
        assert_eq!(history[0].val.num_samples, 3);
        assert!(trainer.best_val_mae().is_finite());

        let path = dir.path().join("best.ckpt");
        assert!(path.exists());
        let mut restored = Trainer::<f32>::from_checkpoint(config(dir.path()), &path).unwrap();
        let metrics = restored.evaluate(&val).unwrap();
        assert_eq!(metrics.num_samples, 3);
        assert!(restored.model().training());
    }

    #[test]
    fn test_predict_is_deterministic_in_eval_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(dir.path());
        let inputs = Tensor::uniform(&[3, 1, 8, 8, 8], 0.0, 1.0, &mut StdRng::seed_from_u64(9)).unwrap();
        let first = trainer.predict(inputs.clone()).unwrap();
        let second = trainer.predict(inputs).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_checkpoint_pushes_weights_into_graph() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.ckpt");
        let mut source = trainer(dir.path());
        source.save_checkpoint(&path).unwrap();

        let model = BrainAgeCNN::with_rng(2, 1, &mut StdRng::seed_from_u64(99)).unwrap();
        let mut target = Trainer::with_model(config(dir.path()), model).unwrap();
        target.load_checkpoint(&path).unwrap();

        let inputs = Tensor::ones(&[1, 1, 8, 8, 8]);
        assert_eq!(
            source.predict(inputs.clone()).unwrap(),
            target.predict(inputs).unwrap()
        );
    }
}
