// src/models/mod.rs
pub mod brain_age_cnn;

pub use brain_age_cnn::{flat_features_for, BrainAgeCNN, HIDDEN_FEATURES};
