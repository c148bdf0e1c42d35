pub mod regression;

use crate::backend::Float;
use crate::graph::{Engine, NodeId};
pub use regression::{L1Loss, MSELoss};

/// Base trait for all loss functions
/// Mirrors PyTorch's loss interface, providing forward computation through computational graph
pub trait Loss<T>
where
    T: Float,
{
    /// Compute loss using computational graph for automatic differentiation
    /// predictions and targets must share a shape, e.g. [batch_size, 1]
    /// Returns: scalar loss node for backpropagation (unless reduction is None)
    fn forward(
        &self,
        graph: &mut Engine<T>,
        predictions: NodeId,
        targets: NodeId,
    ) -> Result<NodeId, String>;

    fn reduction(&self) -> Reduction {
        Reduction::Mean
    }
}

/// Loss reduction strategies - determines how batch losses are aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Average loss across batch (most common)
    Mean,
    /// Sum all losses in batch
    Sum,
    /// Return individual losses without reduction
    None,
}
