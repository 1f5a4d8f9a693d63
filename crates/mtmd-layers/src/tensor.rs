//! Dense row-major `f32` tensor backed by `ndarray` kernels.
//!
//! [`Tensor`] stores `f32` values in row-major order together with their shape.
//! The numerical kernels (matrix products, reductions, concatenation) are
//! delegated to `ndarray` views over that storage.
//!
//! Shape-contract violations inside this module panic: they are programming
//! errors. Layers validate user-facing shapes up front and report
//! [`LayerError`](crate::error::LayerError) instead.

use ndarray::{
    concatenate, stack, Array3, ArrayD, ArrayView2, ArrayView3, ArrayViewD, Axis, Ix2, Ix3, IxDyn,
    Slice,
};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, Uniform};
use serde::{Deserialize, Serialize};

/// A multi-dimensional array of `f32` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// All-zeros tensor.
    ///
    /// # Example
    ///
    /// ```
    /// use mtmd_layers::tensor::Tensor;
    ///
    /// let t = Tensor::zeros(&[2, 3]);
    /// assert_eq!(t.shape(), &[2, 3]);
    /// assert_eq!(t.sum(), 0.0);
    /// ```
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// All-ones tensor.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Creates a new tensor with every element set to `value`.
    pub fn full(shape: &[usize], value: f32) -> Self {
        let numel: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![value; numel],
        }
    }

    /// Wraps row-major `data` as a tensor of `shape`.
    ///
    /// # Panics
    ///
    /// Panics when `data.len()` is not the product of `shape`.
    pub fn from_data(shape: &[usize], data: Vec<f32>) -> Self {
        let numel: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            numel,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            numel
        );
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Creates a tensor from an owned `ndarray` array, whatever its memory layout.
    pub fn from_array(array: ArrayD<f32>) -> Self {
        let shape = array.shape().to_vec();
        let data = array.iter().copied().collect();
        Self { shape, data }
    }

    /// Samples a tensor from `N(mean, std^2)` using the given generator.
    ///
    /// # Panics
    ///
    /// Panics if `std` is negative or not finite.
    pub fn randn_with<R: Rng + ?Sized>(shape: &[usize], mean: f32, std: f32, rng: &mut R) -> Self {
        assert!(
            std.is_finite() && std >= 0.0,
            "Standard deviation must be finite and non-negative, got {}",
            std
        );
        let numel: usize = shape.iter().product();
        let data = (0..numel)
            .map(|_| {
                let z: f32 = StandardNormal.sample(rng);
                mean + std * z
            })
            .collect();
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    /// Samples a tensor from `U[low, high)` using the given generator.
    ///
    /// A degenerate range (`high <= low`) fills the tensor with `low`.
    pub fn rand_uniform_with<R: Rng + ?Sized>(
        shape: &[usize],
        low: f32,
        high: f32,
        rng: &mut R,
    ) -> Self {
        if high <= low {
            return Self::full(shape, low);
        }
        let numel: usize = shape.iter().product();
        let dist = Uniform::new(low, high);
        let data = (0..numel).map(|_| dist.sample(rng)).collect();
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Rank.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Row-major storage.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Returns a dynamic-rank `ndarray` view of the tensor.
    pub fn view(&self) -> ArrayViewD<'_, f32> {
        ArrayViewD::from_shape(IxDyn(&self.shape), &self.data)
            .expect("tensor storage always matches its shape")
    }

    fn view2(&self) -> ArrayView2<'_, f32> {
        assert_eq!(self.ndim(), 2, "expected a 2D tensor, got {:?}", self.shape);
        self.view()
            .into_dimensionality::<Ix2>()
            .expect("rank checked above")
    }

    fn view3(&self) -> ArrayView3<'_, f32> {
        assert_eq!(self.ndim(), 3, "expected a 3D tensor, got {:?}", self.shape);
        self.view()
            .into_dimensionality::<Ix3>()
            .expect("rank checked above")
    }

    /// Matrix multiplication between two 2D tensors.
    ///
    /// # Panics
    ///
    /// Panics if either tensor is not 2D or the inner dimensions don't match
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        let a = self.view2();
        let b = other.view2();
        assert_eq!(
            a.ncols(),
            b.nrows(),
            "Inner dimensions must match for matmul: {:?} x {:?}",
            self.shape,
            other.shape
        );
        Tensor::from_array(a.dot(&b).into_dyn())
    }

    /// Batched matrix multiplication: `[b, m, k] x [b, k, n] -> [b, m, n]`.
    ///
    /// # Panics
    ///
    /// Panics if the tensors are not 3D, the batch sizes differ, or the inner
    /// dimensions don't match
    pub fn bmm(&self, other: &Tensor) -> Tensor {
        let a = self.view3();
        let b = other.view3();
        let (batch, m, k) = a.dim();
        let (batch_b, k_b, n) = b.dim();
        assert_eq!(batch, batch_b, "Batch sizes must match for bmm");
        assert_eq!(
            k, k_b,
            "Inner dimensions must match for bmm: {:?} x {:?}",
            self.shape, other.shape
        );

        let mut out = Array3::<f32>::zeros((batch, m, n));
        for i in 0..batch {
            let product = a.index_axis(Axis(0), i).dot(&b.index_axis(Axis(0), i));
            out.index_axis_mut(Axis(0), i).assign(&product);
        }
        Tensor::from_array(out.into_dyn())
    }

    /// `[m, n] -> [n, m]`.
    pub fn transpose(&self) -> Tensor {
        Tensor::from_array(self.view2().t().to_owned().into_dyn())
    }

    /// Swaps the last two axes of a 3D tensor.
    pub fn transpose_last2(&self) -> Tensor {
        Tensor::from_array(self.view3().permuted_axes([0, 2, 1]).to_owned().into_dyn())
    }

    fn zip_with<F>(&self, other: &Tensor, op: &str, f: F) -> Tensor
    where
        F: Fn(f32, f32) -> f32,
    {
        if self.shape == other.shape {
            let data = self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect();
            return Tensor::from_data(&self.shape, data);
        }

        let rhs = other.view();
        match rhs.broadcast(self.shape.as_slice()) {
            Some(broadcast) => {
                let data = self
                    .data
                    .iter()
                    .zip(broadcast.iter())
                    .map(|(&a, &b)| f(a, b))
                    .collect();
                Tensor::from_data(&self.shape, data)
            }
            None => panic!(
                "Cannot {} shapes {:?} and {:?}",
                op, self.shape, other.shape
            ),
        }
    }

    /// Element-wise addition; `other` is broadcast onto `self`'s shape.
    pub fn add(&self, other: &Tensor) -> Tensor {
        self.zip_with(other, "add", |a, b| a + b)
    }

    /// Element-wise subtraction; `other` is broadcast onto `self`'s shape.
    pub fn sub(&self, other: &Tensor) -> Tensor {
        self.zip_with(other, "subtract", |a, b| a - b)
    }

    /// Element-wise multiplication; `other` is broadcast onto `self`'s shape.
    pub fn mul(&self, other: &Tensor) -> Tensor {
        self.zip_with(other, "multiply", |a, b| a * b)
    }

    /// Element-wise division; `other` is broadcast onto `self`'s shape.
    pub fn div(&self, other: &Tensor) -> Tensor {
        self.zip_with(other, "divide", |a, b| a / b)
    }

    /// Multiplies every element by `s`.
    pub fn scale(&self, scalar: f32) -> Tensor {
        self.map(|x| x * scalar)
    }

    /// Element-wise square.
    pub fn sqr(&self) -> Tensor {
        self.map(|x| x * x)
    }

    /// Sum over every element.
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Sum along an axis, removing it.
    pub fn sum_axis(&self, axis: usize) -> Tensor {
        assert!(axis < self.ndim(), "Axis {} out of bounds for {:?}", axis, self.shape);
        Tensor::from_array(self.view().sum_axis(Axis(axis)))
    }

    /// Mean along an axis, removing it.
    pub fn mean_axis(&self, axis: usize) -> Tensor {
        let count = self.shape[axis].max(1) as f32;
        self.sum_axis(axis).scale(1.0 / count)
    }

    /// Softmax along the last axis.
    ///
    /// Each lane is shifted by its maximum before exponentiation.
    ///
    /// ```
    /// use mtmd_layers::tensor::Tensor;
    ///
    /// let t = Tensor::from_data(&[1, 3], vec![1.0, 2.0, 3.0]);
    /// let s = t.softmax();
    /// assert!((s.sum() - 1.0).abs() < 1e-6);
    /// ```
    pub fn softmax(&self) -> Tensor {
        assert!(self.ndim() >= 1, "softmax requires at least one axis");
        let last = Axis(self.ndim() - 1);
        let mut out = self.view().to_owned();
        for mut lane in out.lanes_mut(last) {
            let max = lane.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            lane.mapv_inplace(|x| (x - max).exp());
            let sum = lane.sum();
            lane.mapv_inplace(|x| x / sum);
        }
        Tensor::from_array(out)
    }

    /// Maps every element through `f`.
    pub fn map<F>(&self, f: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        let data: Vec<f32> = self.data.iter().map(|&x| f(x)).collect();
        Tensor::from_data(&self.shape, data)
    }

    /// Same data, new shape.
    ///
    /// # Panics
    ///
    /// Panics when the element count changes.
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_numel: usize = new_shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "Cannot reshape tensor of {} elements to shape {:?}",
            self.numel(),
            new_shape
        );
        Tensor::from_data(new_shape, self.data.clone())
    }

    /// Collapses every axis after the first: `[b, d1, d2, ...] -> [b, d1*d2*...]`.
    pub fn flatten_from_1(&self) -> Tensor {
        assert!(self.ndim() >= 1, "cannot flatten a scalar tensor");
        let rest = self.shape[1..].iter().product();
        self.reshape(&[self.shape[0], rest])
    }

    /// Concatenates tensors along an existing axis.
    ///
    /// # Panics
    ///
    /// Panics if `tensors` is empty or the shapes disagree off `axis`
    pub fn concat(tensors: &[&Tensor], axis: usize) -> Tensor {
        assert!(!tensors.is_empty(), "concat requires at least one tensor");
        if tensors.len() == 1 {
            return tensors[0].clone();
        }
        let views: Vec<ArrayViewD<'_, f32>> = tensors.iter().map(|t| t.view()).collect();
        match concatenate(Axis(axis), &views) {
            Ok(array) => Tensor::from_array(array),
            Err(err) => panic!(
                "Cannot concatenate shapes {:?} along axis {}: {}",
                tensors.iter().map(|t| t.shape().to_vec()).collect::<Vec<_>>(),
                axis,
                err
            ),
        }
    }

    /// Stacks same-shaped tensors along a new axis.
    ///
    /// # Panics
    ///
    /// Panics if `tensors` is empty or the shapes differ
    pub fn stack(tensors: &[&Tensor], axis: usize) -> Tensor {
        assert!(!tensors.is_empty(), "stack requires at least one tensor");
        let views: Vec<ArrayViewD<'_, f32>> = tensors.iter().map(|t| t.view()).collect();
        match stack(Axis(axis), &views) {
            Ok(array) => Tensor::from_array(array),
            Err(err) => panic!(
                "Cannot stack shapes {:?} along axis {}: {}",
                tensors.iter().map(|t| t.shape().to_vec()).collect::<Vec<_>>(),
                axis,
                err
            ),
        }
    }

    /// Returns `len` consecutive entries of `axis` starting at `start`.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Tensor {
        assert!(axis < self.ndim(), "Axis {} out of bounds for {:?}", axis, self.shape);
        assert!(
            start + len <= self.shape[axis],
            "Range {}..{} out of bounds for axis {} of {:?}",
            start,
            start + len,
            axis,
            self.shape
        );
        let view = self.view();
        let sliced = view.slice_axis(Axis(axis), Slice::from(start..start + len));
        Tensor::from_array(sliced.to_owned())
    }

    /// Returns column `j` of a 2D tensor as a `[rows]` tensor.
    pub fn column(&self, j: usize) -> Tensor {
        let view = self.view2();
        assert!(j < view.ncols(), "Column {} out of bounds for {:?}", j, self.shape);
        Tensor::from_array(view.column(j).to_owned().into_dyn())
    }
}

impl std::ops::Add for &Tensor {
    type Output = Tensor;

    fn add(self, other: &Tensor) -> Tensor {
        Tensor::add(self, other)
    }
}

impl std::ops::Mul for &Tensor {
    type Output = Tensor;

    fn mul(self, other: &Tensor) -> Tensor {
        Tensor::mul(self, other)
    }
}
