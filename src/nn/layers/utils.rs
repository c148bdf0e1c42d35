use crate::backend::Float;
use crate::graph::{Engine, NodeId};
use crate::ops::{BroadcastTo, Reshape};

// Utilities for implementing the layers go here.

/// Reshapes a per-channel vector `[C]` to `[1, C, 1, ...]` and broadcasts it
/// to the shape of `target` (any `[N, C, ...]` tensor). Inputs that are not
/// 1D are broadcast as they are.
pub fn reshape_and_broadcast<T>(
    input: NodeId,
    target: NodeId,
    graph: &mut Engine<T>,
) -> Result<NodeId, String>
where
    T: Float,
{
    let target_shape = graph
        .get_node_shape(target)
        .ok_or("Failed to get target shape for broadcasting")?
        .to_vec();

    let input_shape = graph
        .get_node_shape(input)
        .ok_or("Failed to get input shape for broadcasting")?
        .to_vec();

    let res = if input_shape.len() == 1 && target_shape.len() >= 2 {
        let mut new_shape = vec![1; target_shape.len()];
        new_shape[1] = input_shape[0];
        graph.apply_operation(Box::new(Reshape::new(new_shape)), vec![input])?
    } else {
        input
    };

    let res_shape = graph
        .get_node_shape(res)
        .ok_or("Failed to get reshaped shape for broadcasting")?;
    if res_shape != target_shape.as_slice() {
        graph.apply_operation(Box::new(BroadcastTo::new(target_shape)), vec![res])
    } else {
        Ok(res)
    }
}
