// Neural network building blocks on top of the automatic differentiation engine.

pub mod init;
pub mod layers;
pub mod losses;
pub mod module;
pub mod optim;
pub mod parameter;

// Re-export the main types and traits for convenience
pub use layers::{
    AdaptiveAvgPool3d, BatchNorm1d, BatchNorm3d, Conv3d, Dropout, Dropout3d, Flatten, Linear,
    MaxPool3d, Padding, ReLU,
};
pub use losses::{L1Loss, Loss, MSELoss, Reduction};
pub use module::Module;
pub use optim::{Adam, Optimizer, OptimizerError, OptimizerStateDict, SGD};
pub use parameter::Parameter;
