use crate::backend::number::Float;
use ndarray::{ArrayD, ArrayViewD, Axis, Ix2, IxDyn, Zip};
use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// Owned n-dimensional array used by the graph engine.
///
/// The wrapped array is always kept in standard (row-major) layout so the
/// volumetric kernels can work directly on the flat slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T>
where
    T: Float,
{
    data: ArrayD<T>,
}

/// Shape that results from broadcasting `a` against `b` (NumPy rules).
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, String> {
    let ndim = a.len().max(b.len());
    let mut shape = vec![0; ndim];
    for i in 0..ndim {
        let da = if i < ndim - a.len() { 1 } else { a[i - (ndim - a.len())] };
        let db = if i < ndim - b.len() { 1 } else { b[i - (ndim - b.len())] };
        shape[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(format!(
                    "Shapes {:?} and {:?} cannot be broadcast together",
                    a, b
                ));
            }
        };
    }
    Ok(shape)
}

impl<T> Tensor<T>
where
    T: Float,
{
    pub fn new(data: ArrayD<T>) -> Self {
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        Self { data }
    }

    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self, String> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(format!(
                "Data length {} doesn't match shape {:?} (expected {} elements)",
                data.len(),
                shape,
                expected
            ));
        }
        ArrayD::from_shape_vec(IxDyn(shape), data)
            .map(Self::new)
            .map_err(|e| format!("Failed to create tensor from vec: {e}"))
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::new(ArrayD::zeros(IxDyn(shape)))
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::new(ArrayD::ones(IxDyn(shape)))
    }

    pub fn full(shape: &[usize], value: T) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(shape), value))
    }

    /// Zero-dimensional tensor holding a single value.
    pub fn scalar(value: T) -> Self {
        Self::new(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Samples every element from U(low, high).
    pub fn uniform<R: Rng + ?Sized>(
        shape: &[usize],
        low: f64,
        high: f64,
        rng: &mut R,
    ) -> Result<Self, String> {
        let dist = Uniform::new(low, high)
            .map_err(|e| format!("Invalid uniform range [{low}, {high}): {e}"))?;
        let size: usize = shape.iter().product();
        let data = (0..size).map(|_| T::cast(dist.sample(rng))).collect();
        Self::from_vec(data, shape)
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &ArrayD<T> {
        &self.data
    }

    /// In-place access to the elements. The shape stays fixed.
    pub fn data_mut(&mut self) -> ndarray::ArrayViewMutD<'_, T> {
        self.data.view_mut()
    }

    pub fn view(&self) -> ArrayViewD<'_, T> {
        self.data.view()
    }

    pub fn into_data(self) -> ArrayD<T> {
        self.data
    }

    pub fn as_slice(&self) -> Result<&[T], String> {
        self.data
            .as_slice()
            .ok_or_else(|| "Tensor data is not contiguous".to_string())
    }

    pub fn as_slice_mut(&mut self) -> Result<&mut [T], String> {
        self.data
            .as_slice_mut()
            .ok_or_else(|| "Tensor data is not contiguous".to_string())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.data.iter().copied().collect()
    }

    /// First element in logical order. Mostly used to read scalar losses.
    pub fn first(&self) -> Result<T, String> {
        self.data
            .iter()
            .next()
            .copied()
            .ok_or_else(|| "Cannot take first element of an empty tensor".to_string())
    }

    // ------------------------------------------------------------------
    // Element-wise arithmetic
    // ------------------------------------------------------------------

    fn zip_with<F>(&self, other: &Self, f: F) -> Result<Self, String>
    where
        F: Fn(T, T) -> T + Sync + Send,
    {
        if self.shape() == other.shape() {
            let out = Zip::from(&self.data)
                .and(&other.data)
                .map_collect(|&a, &b| f(a, b));
            return Ok(Self::new(out));
        }

        let shape = broadcast_shape(self.shape(), other.shape())?;
        let lhs = self
            .data
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| format!("Cannot broadcast {:?} to {:?}", self.shape(), shape))?;
        let rhs = other
            .data
            .broadcast(IxDyn(&shape))
            .ok_or_else(|| format!("Cannot broadcast {:?} to {:?}", other.shape(), shape))?;
        let out = Zip::from(&lhs).and(&rhs).map_collect(|&a, &b| f(a, b));
        Ok(Self::new(out))
    }

    pub fn add(&self, other: &Self) -> Result<Self, String> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Self) -> Result<Self, String> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn mul(&self, other: &Self) -> Result<Self, String> {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn div(&self, other: &Self) -> Result<Self, String> {
        self.zip_with(other, |a, b| a / b)
    }

    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(T) -> T,
    {
        Self::new(self.data.mapv(f))
    }

    pub fn add_scalar(&self, scalar: T) -> Self {
        self.map(|x| x + scalar)
    }

    pub fn sub_scalar(&self, scalar: T) -> Self {
        self.map(|x| x - scalar)
    }

    pub fn mul_scalar(&self, scalar: T) -> Self {
        self.map(|x| x * scalar)
    }

    pub fn div_scalar(&self, scalar: T) -> Self {
        self.map(|x| x / scalar)
    }

    pub fn relu(&self) -> Self {
        self.map(|x| if x > T::zero() { x } else { T::zero() })
    }

    /// 1 where the element is strictly positive, 0 elsewhere.
    pub fn relu_mask(&self) -> Self {
        self.map(|x| if x > T::zero() { T::one() } else { T::zero() })
    }

    pub fn sqrt(&self) -> Self {
        self.map(|x| x.sqrt())
    }

    pub fn abs(&self) -> Self {
        self.map(|x| x.abs())
    }

    /// Sign with sign(0) = 0, which is the subgradient used for |x|.
    pub fn sign(&self) -> Self {
        self.map(|x| {
            if x > T::zero() {
                T::one()
            } else if x < T::zero() {
                -T::one()
            } else {
                T::zero()
            }
        })
    }

    pub fn powi(&self, exp: i32) -> Self {
        self.map(|x| x.powi(exp))
    }

    // ------------------------------------------------------------------
    // Reductions
    // ------------------------------------------------------------------

    fn normalize_axes(&self, axes: &[usize]) -> Result<Vec<usize>, String> {
        let mut axes = axes.to_vec();
        axes.sort_unstable();
        axes.dedup();
        if let Some(&bad) = axes.iter().find(|&&ax| ax >= self.ndim()) {
            return Err(format!(
                "Axis {} out of bounds for tensor with {} dimensions",
                bad,
                self.ndim()
            ));
        }
        Ok(axes)
    }

    /// Sum over `axes` (all axes when `None`).
    pub fn sum(&self, axes: Option<&[usize]>, keep_dims: bool) -> Result<Self, String> {
        let axes = match axes {
            Some(axes) => self.normalize_axes(axes)?,
            None => (0..self.ndim()).collect(),
        };

        let mut result = self.data.clone();
        for &ax in axes.iter().rev() {
            result = result.sum_axis(Axis(ax));
        }
        if keep_dims {
            for &ax in &axes {
                result = result.insert_axis(Axis(ax));
            }
        }
        Ok(Self::new(result))
    }

    /// Mean over `axes` (all axes when `None`).
    pub fn mean(&self, axes: Option<&[usize]>, keep_dims: bool) -> Result<Self, String> {
        let count: usize = match axes {
            Some(axes) => self
                .normalize_axes(axes)?
                .iter()
                .map(|&ax| self.shape()[ax])
                .product(),
            None => self.size(),
        };
        if count == 0 {
            return Err("Cannot take the mean over an empty axis".to_string());
        }
        let summed = self.sum(axes, keep_dims)?;
        Ok(summed.div_scalar(T::from_usize(count)))
    }

    // ------------------------------------------------------------------
    // Shape manipulation
    // ------------------------------------------------------------------

    pub fn reshape(&self, new_shape: &[usize]) -> Result<Self, String> {
        let new_size: usize = new_shape.iter().product();
        if new_size != self.size() {
            return Err(format!(
                "Cannot reshape tensor of shape {:?} into {:?}",
                self.shape(),
                new_shape
            ));
        }
        self.data
            .clone()
            .into_shape_with_order(IxDyn(new_shape))
            .map(Self::new)
            .map_err(|e| format!("Reshape failed: {e}"))
    }

    pub fn broadcast_to(&self, target_shape: &[usize]) -> Result<Self, String> {
        self.data
            .broadcast(IxDyn(target_shape))
            .map(|view| Self::new(view.to_owned()))
            .ok_or_else(|| {
                format!(
                    "Cannot broadcast tensor of shape {:?} to {:?}",
                    self.shape(),
                    target_shape
                )
            })
    }

    /// Matrix transpose. Only defined for 2D tensors.
    pub fn transpose(&self) -> Result<Self, String> {
        if self.ndim() != 2 {
            return Err(format!(
                "Transpose requires a 2D tensor, got shape {:?}",
                self.shape()
            ));
        }
        Ok(Self::new(self.data.t().as_standard_layout().into_owned()))
    }

    pub fn matmul(&self, other: &Self) -> Result<Self, String> {
        let lhs = self
            .data
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| format!("MatMul lhs must be 2D, got {:?}", self.shape()))?;
        let rhs = other
            .data
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| format!("MatMul rhs must be 2D, got {:?}", other.shape()))?;
        if lhs.ncols() != rhs.nrows() {
            return Err(format!(
                "MatMul shape mismatch: {:?} x {:?}",
                self.shape(),
                other.shape()
            ));
        }
        Ok(Self::new(lhs.dot(&rhs).into_dyn()))
    }

    /// Stacks equally shaped tensors along a new leading axis.
    pub fn stack(tensors: &[Self]) -> Result<Self, String> {
        if tensors.is_empty() {
            return Err("Cannot stack an empty list of tensors".to_string());
        }
        let views: Vec<_> = tensors.iter().map(|t| t.data.view()).collect();
        ndarray::stack(Axis(0), &views)
            .map(Self::new)
            .map_err(|e| format!("Stack failed: {e}"))
    }

    /// Splits along axis 0. Inverse of [`Tensor::stack`].
    pub fn unstack(&self) -> Result<Vec<Self>, String> {
        if self.ndim() == 0 {
            return Err("Cannot unstack a scalar tensor".to_string());
        }
        Ok(self
            .data
            .outer_iter()
            .map(|view| Self::new(view.to_owned()))
            .collect())
    }
}

impl<T> From<ArrayD<T>> for Tensor<T>
where
    T: Float,
{
    fn from(data: ArrayD<T>) -> Self {
        Self::new(data)
    }
}
