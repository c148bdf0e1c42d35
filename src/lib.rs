//! # brainage
//!
//! Brain age regression from T1-weighted MRI volumes with a small 3D CNN,
//! trained on a CPU reverse-mode autodiff engine built on `ndarray`.
//!
//! ## Features
//!
//! - NIfTI loading, masked z-score normalization and anti-aliased resizing
//! - Metadata-driven datasets and batched loaders with optional worker threads
//! - Eager computation graph with 3D convolution, pooling and batch norm
//! - `BrainAgeCNN`, Adam/SGD optimizers and MSE/L1 losses
//! - Training loop with validation, checkpointing and inference
//!
pub mod backend;
pub mod config;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod imaging;
pub mod models;
pub mod nn;
pub mod ops;
pub mod telemetry;
pub mod training;

// Re-export commonly used types for convenience
pub use backend::{Float, Tensor};
pub use config::{BrainAgeConfig, Split};
pub use dataset::{get_image_dataloaders, BrainAgeImageDataset, DataLoader, DataLoaders, Dataset};
pub use error::{BrainAgeError, Result};
pub use graph::{Engine, NodeId};
pub use models::BrainAgeCNN;
pub use training::{EvalMetrics, ModelCheckpoint, Trainer};
