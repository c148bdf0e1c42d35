// src/training/metrics.rs
use crate::backend::{Float, Tensor};
use std::fmt;

/// Regression error over one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalMetrics {
    pub mse: f64,
    pub mae: f64,
    pub num_samples: usize,
}

impl EvalMetrics {
    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }
}

impl fmt::Display for EvalMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mse {:.4} | mae {:.4} | n {}",
            self.mse, self.mae, self.num_samples
        )
    }
}

/// Accumulates squared and absolute errors batch by batch.
#[derive(Debug, Default, Clone)]
pub struct RunningMetrics {
    squared_error: f64,
    absolute_error: f64,
    count: usize,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update<T: Float>(
        &mut self,
        predictions: &Tensor<T>,
        targets: &Tensor<T>,
    ) -> Result<(), String> {
        if predictions.size() != targets.size() {
            return Err(format!(
                "Predictions {:?} and targets {:?} hold a different number of values",
                predictions.shape(),
                targets.shape()
            ));
        }
        for (p, t) in predictions.data().iter().zip(targets.data().iter()) {
            let diff = p.as_f64() - t.as_f64();
            self.squared_error += diff * diff;
            self.absolute_error += diff.abs();
        }
        self.count += predictions.size();
        Ok(())
    }

    /// Means over every value seen. Both are NaN when nothing was seen.
    pub fn finish(&self) -> EvalMetrics {
        let n = self.count as f64;
        EvalMetrics {
            mse: self.squared_error / n,
            mae: self.absolute_error / n,
            num_samples: self.count,
        }
    }
}
