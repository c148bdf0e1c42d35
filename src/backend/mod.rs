pub mod conv;
pub mod number;
pub mod pooling;
pub mod tensor;

pub use number::Float;
pub use tensor::{broadcast_shape, Tensor};
