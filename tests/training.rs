mod common;

use brainage::config::{BrainAgeConfig, Split};
use brainage::dataset::{get_image_dataloaders, prefetch_samples, split_loader};
use brainage::{BrainAgeError, ModelCheckpoint, Trainer};
use common::{subject_id, SyntheticData};

#[test]
fn test_fit_then_evaluate_best_checkpoint() {
    let data = SyntheticData::new(4, 2, 3, (9, 9, 9));
    let loaders = get_image_dataloaders::<f32>(&data.config).unwrap();

    let mut trainer = Trainer::<f32>::new(data.config.clone()).unwrap();
    let history = trainer.fit(&loaders).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|e| e.train_loss.is_finite()));
    assert!(history[0].checkpointed);
    assert!(data.config.checkpoint_path.exists());

    let checkpoint = ModelCheckpoint::load(&data.config.checkpoint_path).unwrap();
    assert_eq!((checkpoint.feats, checkpoint.adap_pool, checkpoint.img_size), (2, 1, 8));
    assert_eq!(checkpoint.parameters.len(), 18);

    let mut restored = Trainer::<f32>::from_checkpoint(data.config.clone(), &data.config.checkpoint_path).unwrap();
    let val = restored.evaluate(&loaders.val).unwrap();
    assert_eq!(val.num_samples, 2);
    assert!((val.mae - trainer.best_val_mae()).abs() < 1e-3);

    let test = restored.evaluate(&split_loader::<f32>(restored.config(), Split::Test).unwrap()).unwrap();
    assert_eq!(test.num_samples, 3);
    assert!(test.mse >= test.mae * test.mae - 1e-6);
}

#[test]
fn test_predict_single_subject_from_checkpoint() {
    let data = SyntheticData::new(2, 1, 1, (8, 8, 8));
    let mut trainer = Trainer::<f32>::new(data.config.clone()).unwrap();
    trainer.save_checkpoint(&data.config.checkpoint_path).unwrap();

    // architecture comes from the checkpoint, not from the config
    let mut config = data.config.clone();
    config.feats = 5;
    let mut restored = Trainer::<f32>::from_checkpoint(config, &data.config.checkpoint_path).unwrap();
    assert_eq!(restored.model().feats, 2);

    let id = subject_id(Split::Test, 0);
    let inputs = prefetch_samples::<f32>(restored.config(), &[id]).unwrap();
    let ages = restored.predict(inputs.clone()).unwrap();
    assert_eq!(ages.len(), 1);
    assert!(ages[0].is_finite());
    assert_eq!(ages, trainer.predict(inputs).unwrap());
}

#[test]
fn test_sgd_with_l1_loss_trains() {
    let mut data = SyntheticData::new(4, 0, 0, (8, 8, 8));
    data.config.optimizer = "sgd".to_string();
    data.config.loss = "l1".to_string();
    data.config.epochs = 1;
    let loaders = get_image_dataloaders::<f32>(&data.config).unwrap();

    let mut trainer = Trainer::<f32>::new(data.config.clone()).unwrap();
    let history = trainer.fit(&loaders).unwrap();
    assert_eq!(history.len(), 1);
    // an empty validation split still leaves a checkpoint behind
    assert!(history[0].val.is_empty());
    assert!(data.config.checkpoint_path.exists());
    assert_eq!(trainer.optimizer().get_step_count(), 2);
}

#[test]
fn test_config_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"epochs": 3, "optimizer": "sgd", "img_size": 0}"#).unwrap();

    let config = BrainAgeConfig::from_file(&path).unwrap();
    assert_eq!(config.epochs, 3);
    assert_eq!(config.optimizer, "sgd");
    assert_eq!(config.target_size(), None);
    assert_eq!(config.batch_size, BrainAgeConfig::default().batch_size);

    std::fs::write(&path, r#"{"loss": "huber"}"#).unwrap();
    assert!(BrainAgeConfig::from_file(&path).is_err());
}

#[test]
fn test_corrupt_architecture_in_checkpoint_is_an_error() {
    let data = SyntheticData::new(1, 0, 0, (8, 8, 8));
    let trainer = Trainer::<f32>::new(data.config.clone()).unwrap();
    let mut checkpoint = ModelCheckpoint::from_model(trainer.model(), 8);
    checkpoint.adap_pool = 1 << 22;
    checkpoint.save(&data.config.checkpoint_path).unwrap();

    match Trainer::<f32>::from_checkpoint(data.config.clone(), &data.config.checkpoint_path) {
        Err(BrainAgeError::Checkpoint(_)) => {}
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("restored a model from a corrupt checkpoint"),
    }
}
