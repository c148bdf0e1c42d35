// src/nn/layers/mod.rs
// Neural network layers built on the graph engine.

pub mod activation;
pub mod conv;
pub mod dropout;
pub mod linear;
pub mod norm;
pub mod pooling;
pub mod utils;

// Re-export commonly used layers for convenience
pub use activation::{Flatten, ReLU};
pub use conv::{Conv3d, Padding};
pub use dropout::{Dropout, Dropout3d};
pub use linear::Linear;
pub use norm::{BatchNorm, BatchNorm1d, BatchNorm3d};
pub use pooling::{AdaptiveAvgPool3d, MaxPool3d};
