// src/nn/losses/regression.rs
// Regression losses built from graph operations.

use crate::backend::Float;
use crate::graph::{Engine, NodeId};
use crate::nn::losses::{Loss, Reduction};
use crate::ops::{Abs, Mean, Mul, Sub, Sum};
use std::marker::PhantomData;

fn check_same_shape<T: Float>(
    graph: &Engine<T>,
    predictions: NodeId,
    targets: NodeId,
    loss: &str,
) -> Result<(), String> {
    let pred_shape = graph
        .get_node_shape(predictions)
        .ok_or("Predictions not found in graph")?;
    let target_shape = graph
        .get_node_shape(targets)
        .ok_or("Targets not found in graph")?;
    if pred_shape != target_shape {
        return Err(format!(
            "{} shape mismatch: predictions {:?} vs targets {:?}",
            loss, pred_shape, target_shape
        ));
    }
    Ok(())
}

fn reduce<T: Float>(
    graph: &mut Engine<T>,
    losses: NodeId,
    reduction: Reduction,
    loss: &str,
) -> Result<NodeId, String> {
    match reduction {
        Reduction::Mean => graph
            .apply_operation(Box::new(Mean::new(false)), vec![losses])
            .map_err(|e| format!("{} mean reduction failed: {}", loss, e)),
        Reduction::Sum => graph
            .apply_operation(Box::new(Sum::new(false)), vec![losses])
            .map_err(|e| format!("{} sum reduction failed: {}", loss, e)),
        Reduction::None => Ok(losses),
    }
}

/// Mean Squared Error Loss: MSE = mean((predictions - targets)²)
/// Used for regression tasks where targets are continuous values
#[derive(Debug, Clone)]
pub struct MSELoss<T> {
    reduction: Reduction,
    _phantom: PhantomData<T>,
}

impl<T> MSELoss<T>
where
    T: Float,
{
    pub fn new(reduction: Reduction) -> Self {
        Self {
            reduction,
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for MSELoss<T>
where
    T: Float,
{
    fn default() -> Self {
        Self::new(Reduction::Mean)
    }
}

impl<T> Loss<T> for MSELoss<T>
where
    T: Float,
{
    fn forward(
        &self,
        graph: &mut Engine<T>,
        predictions: NodeId,
        targets: NodeId,
    ) -> Result<NodeId, String> {
        check_same_shape(graph, predictions, targets, "MSE")?;

        let diff = graph
            .apply_operation(Box::new(Sub), vec![predictions, targets])
            .map_err(|e| format!("MSE difference computation failed: {}", e))?;
        let squared_diff = graph
            .apply_operation(Box::new(Mul), vec![diff, diff])
            .map_err(|e| format!("MSE squaring failed: {}", e))?;

        reduce(graph, squared_diff, self.reduction, "MSE")
    }

    fn reduction(&self) -> Reduction {
        self.reduction
    }
}

/// L1 Loss (Mean Absolute Error): L1 = mean(|predictions - targets|)
#[derive(Debug, Clone)]
pub struct L1Loss<T> {
    reduction: Reduction,
    _phantom: PhantomData<T>,
}

impl<T> L1Loss<T>
where
    T: Float,
{
    pub fn new(reduction: Reduction) -> Self {
        Self {
            reduction,
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for L1Loss<T>
where
    T: Float,
{
    fn default() -> Self {
        Self::new(Reduction::Mean)
    }
}

impl<T> Loss<T> for L1Loss<T>
where
    T: Float,
{
    fn forward(
        &self,
        graph: &mut Engine<T>,
        predictions: NodeId,
        targets: NodeId,
    ) -> Result<NodeId, String> {
        check_same_shape(graph, predictions, targets, "L1")?;

        let diff = graph
            .apply_operation(Box::new(Sub), vec![predictions, targets])
            .map_err(|e| format!("L1 difference computation failed: {}", e))?;
        let abs_diff = graph
            .apply_operation(Box::new(Abs), vec![diff])
            .map_err(|e| format!("L1 absolute value computation failed: {}", e))?;

        reduce(graph, abs_diff, self.reduction, "L1")
    }

    fn reduction(&self) -> Reduction {
        self.reduction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Tensor;
    use approx::assert_abs_diff_eq;

    fn setup(graph: &mut Engine<f64>) -> (NodeId, NodeId) {
        let pred = graph.create_variable(
            Tensor::from_vec(vec![1.0, 2.0, 5.0], &[3, 1]).unwrap(),
            true,
        );
        let target = graph.create_variable(
            Tensor::from_vec(vec![2.0, 2.0, 3.0], &[3, 1]).unwrap(),
            false,
        );
        (pred, target)
    }

    #[test]
    fn test_mse_value_and_gradient() {
        let mut graph = Engine::new();
        let (pred, target) = setup(&mut graph);
        let loss = MSELoss::default().forward(&mut graph, pred, target).unwrap();
        assert_abs_diff_eq!(graph.get_tensor(loss).unwrap().first().unwrap(), 5.0 / 3.0, epsilon = 1e-12);

        graph.backward(loss).unwrap();
        // d/dp mean((p - t)²) = 2 (p - t) / n
        let grad = graph.get_gradient(pred).unwrap().to_vec();
        assert_abs_diff_eq!(grad[0], -2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[1], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[2], 4.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_l1_reductions() {
        let mut graph = Engine::new();
        let (pred, target) = setup(&mut graph);
        let mean = L1Loss::default().forward(&mut graph, pred, target).unwrap();
        assert_abs_diff_eq!(graph.get_tensor(mean).unwrap().first().unwrap(), 1.0);

        let sum = L1Loss::new(Reduction::Sum)
            .forward(&mut graph, pred, target)
            .unwrap();
        assert_abs_diff_eq!(graph.get_tensor(sum).unwrap().first().unwrap(), 3.0);

        let none = L1Loss::new(Reduction::None)
            .forward(&mut graph, pred, target)
            .unwrap();
        assert_eq!(graph.get_tensor(none).unwrap().to_vec(), vec![1.0, 0.0, 2.0]);
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let mut graph = Engine::<f32>::new();
        let pred = graph.create_variable(Tensor::zeros(&[4, 1]), true);
        let target = graph.create_variable(Tensor::zeros(&[4]), false);
        assert!(MSELoss::default().forward(&mut graph, pred, target).is_err());
    }
}
