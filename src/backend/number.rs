// src/backend/number.rs

use ndarray::{LinalgScalar, ScalarOperand};
use rand_distr::num_traits;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

/// Floating-point element type accepted by [`Tensor`](crate::backend::Tensor).
///
/// Extends `num_traits::Float` with everything ndarray needs for arithmetic
/// and matrix products, the thread-safety bounds required by the parallel
/// kernels, and serde so tensors can be checkpointed.
pub trait Float:
    num_traits::Float
    + Sum<Self>
    + for<'a> Sum<&'a Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Debug
    + Display
    + Default
    + LinalgScalar
    + ScalarOperand
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + 'static
{
    /// Lossy conversion from f64. Values outside the target range saturate.
    fn cast(value: f64) -> Self;

    /// Widening conversion to f64.
    fn as_f64(self) -> f64;

    /// Shorthand for the constant `value` in this type.
    fn from_usize(value: usize) -> Self {
        Self::cast(value as f64)
    }
}

impl Float for f32 {
    fn cast(value: f64) -> Self {
        value as f32
    }

    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl Float for f64 {
    fn cast(value: f64) -> Self {
        value
    }

    fn as_f64(self) -> f64 {
        self
    }
}
