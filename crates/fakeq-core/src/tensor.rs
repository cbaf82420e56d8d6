use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::Backend;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::qparams::QuantParams;
use crate::rounding::RoundingMode;
use crate::shape::Shape;

// Tensor — handle over backend storage plus a layout
//
// MEMORY MODEL:
//
//   The storage sits behind Arc<RwLock<Storage>>. Cloning a Tensor is an
//   Arc increment; views (transpose, narrow, broadcast_as) share the storage
//   and only carry a different Layout. Writes (fake_quantize_into,
//   fake_quantize_inplace) go through the lock, so every view of the same
//   storage observes them.
//
// ALIASING:
//
//   A kernel reading and writing the same storage cannot hold a read and a
//   write lock at once. When the output of `fake_quantize_into` shares storage
//   with the input:
//     - same layout      → the in-place kernel (read then overwrite per element)
//     - different layout → the input view is copied out first
//
//   Guards on distinct storages are always taken in ascending address order,
//   so `a.fake_quantize_into(&b)` racing `b.fake_quantize_into(&a)` cannot
//   deadlock.

struct TensorInner<B: Backend> {
    storage: Arc<RwLock<B::Storage>>,
    layout: Layout,
    dtype: DType,
    device: B::Device,
}

/// An n-dimensional float array on a specific backend.
///
/// # Example
/// ```ignore
/// let x = Tensor::<CpuBackend>::from_f64_slice(&[3.2, 200.0], 2, DType::F32, &CpuDevice)?;
/// let params = QuantParams::new(0.5, 10, 0, 255);
/// let y = x.fake_quantize(&params, RoundingMode::NearestEven)?; // [3.0, 122.5]
/// ```
pub struct Tensor<B: Backend> {
    inner: Arc<TensorInner<B>>,
}

impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, device={:?})",
            self.inner.layout.shape(),
            self.inner.dtype,
            self.inner.device,
        )
    }
}

impl<B: Backend> Tensor<B> {
    // Internal constructors

    fn from_storage(storage: B::Storage, layout: Layout, dtype: DType, device: B::Device) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                storage: Arc::new(RwLock::new(storage)),
                layout,
                dtype,
                device,
            }),
        }
    }

    fn view_with_layout(&self, layout: Layout) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                storage: Arc::clone(&self.inner.storage),
                layout,
                dtype: self.inner.dtype,
                device: self.inner.device.clone(),
            }),
        }
    }

    // Accessors

    pub fn shape(&self) -> &Shape {
        self.inner.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.inner.layout.dims()
    }

    pub fn rank(&self) -> usize {
        self.inner.layout.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.inner.layout.elem_count()
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn device(&self) -> &B::Device {
        &self.inner.device
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    pub fn is_contiguous(&self) -> bool {
        self.inner.layout.is_contiguous()
    }

    /// Whether two tensors are views of the same storage.
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner.storage, &other.inner.storage)
    }

    /// Address of the shared storage, used to order lock acquisition.
    fn storage_addr(&self) -> usize {
        Arc::as_ptr(&self.inner.storage) as usize
    }

    fn read_storage(&self) -> Result<RwLockReadGuard<'_, B::Storage>> {
        self.inner
            .storage
            .read()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    fn write_storage(&self) -> Result<RwLockWriteGuard<'_, B::Storage>> {
        self.inner
            .storage
            .write()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    // Creation methods

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        let shape = shape.into();
        let storage = B::zeros(&shape, dtype, device)?;
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(shape),
            dtype,
            device.clone(),
        ))
    }

    /// Zeros with the shape, dtype and device of `other`.
    pub fn zeros_like(other: &Self) -> Result<Self> {
        Self::zeros(other.shape().clone(), other.dtype(), other.device())
    }

    /// Create a tensor from a flat slice of f64 values, converted to `dtype`.
    pub fn from_f64_slice(
        data: &[f64],
        shape: impl Into<Shape>,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: shape.clone(),
                expected: shape.elem_count(),
                got: data.len(),
            });
        }
        let storage = B::from_f64_slice(data, dtype, device)?;
        Ok(Self::from_storage(
            storage,
            Layout::contiguous(shape),
            dtype,
            device.clone(),
        ))
    }

    /// Elements in logical order, converted to f64.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let storage = self.read_storage()?;
        B::to_f64_vec(&storage, &self.inner.layout)
    }

    // Views (no data copy)

    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<Self> {
        let layout = self.inner.layout.transpose(dim0, dim1)?;
        Ok(self.view_with_layout(layout))
    }

    pub fn narrow(&self, dim: usize, start: usize, len: usize) -> Result<Self> {
        let layout = self.inner.layout.narrow(dim, start, len)?;
        Ok(self.view_with_layout(layout))
    }

    /// Stretch size-1 and missing leading dimensions to `shape` (stride 0).
    pub fn broadcast_as(&self, shape: impl Into<Shape>) -> Result<Self> {
        let layout = self.inner.layout.broadcast_as(&shape.into())?;
        Ok(self.view_with_layout(layout))
    }

    /// Dense copy of this view, or a cheap clone if it already is one.
    pub fn contiguous(&self) -> Result<Self> {
        if self.is_contiguous() {
            return Ok(self.clone());
        }
        let storage = self.read_storage()?;
        let dense = B::to_contiguous(&storage, &self.inner.layout)?;
        Ok(Self::from_storage(
            dense,
            Layout::contiguous(self.shape().clone()),
            self.inner.dtype,
            self.inner.device.clone(),
        ))
    }

    // Fake quantization

    /// Fake-quantize into a freshly allocated contiguous tensor.
    pub fn fake_quantize(&self, params: &QuantParams, mode: RoundingMode) -> Result<Self> {
        let out = Self::zeros_like(self)?;
        self.fake_quantize_into(&out, params, mode)?;
        Ok(out)
    }

    /// Fake-quantize into a caller-allocated output. `self` must broadcast to
    /// the shape of `out`; `out` may be any view, including one sharing
    /// storage with `self`.
    pub fn fake_quantize_into(
        &self,
        out: &Self,
        params: &QuantParams,
        mode: RoundingMode,
    ) -> Result<()> {
        if self.shares_storage(out) {
            if self.layout() == out.layout() {
                return out.fake_quantize_inplace(params, mode);
            }
            let snapshot = self.copy_out()?;
            return snapshot.fake_quantize_into(out, params, mode);
        }
        let (input, mut dst) = if self.storage_addr() < out.storage_addr() {
            let input = self.read_storage()?;
            (input, out.write_storage()?)
        } else {
            let dst = out.write_storage()?;
            (self.read_storage()?, dst)
        };
        B::fake_quantize(
            &mut dst,
            out.layout(),
            &input,
            self.layout(),
            params,
            mode,
        )
    }

    /// Overwrite every element of this view with its fake-quantized value.
    pub fn fake_quantize_inplace(&self, params: &QuantParams, mode: RoundingMode) -> Result<()> {
        let mut buf = self.write_storage()?;
        B::fake_quantize_inplace(&mut buf, self.layout(), params, mode)
    }

    /// Straight-through gradient with respect to `self` (the forward input).
    ///
    /// The result has the broadcast shape of `self` and `grad_output`.
    pub fn fake_quantize_backward(
        &self,
        grad_output: &Self,
        params: &QuantParams,
        mode: RoundingMode,
    ) -> Result<Self> {
        let shape = Shape::broadcast_shape(self.shape(), grad_output.shape())?;
        let grad_input = Self::zeros(shape, self.dtype(), self.device())?;
        self.fake_quantize_backward_into(grad_output, &grad_input, params, mode)?;
        Ok(grad_input)
    }

    /// Straight-through gradient written into a caller-allocated `grad_input`.
    pub fn fake_quantize_backward_into(
        &self,
        grad_output: &Self,
        grad_input: &Self,
        params: &QuantParams,
        mode: RoundingMode,
    ) -> Result<()> {
        if grad_input.shares_storage(self) {
            let snapshot = self.copy_out()?;
            return snapshot.fake_quantize_backward_into(grad_output, grad_input, params, mode);
        }
        if grad_input.shares_storage(grad_output) {
            let snapshot = grad_output.copy_out()?;
            return self.fake_quantize_backward_into(&snapshot, grad_input, params, mode);
        }
        // Guards are taken in storage address order. One read guard when
        // input and gradient are views of the same buffer.
        let shared_dy = self.shares_storage(grad_output);
        let mut order = [
            (self.storage_addr(), 0u8),
            (grad_output.storage_addr(), 1),
            (grad_input.storage_addr(), 2),
        ];
        order.sort_unstable();
        let (mut input, mut dy_guard, mut dx) = (None, None, None);
        for (_, which) in order {
            match which {
                0 => input = Some(self.read_storage()?),
                1 if !shared_dy => dy_guard = Some(grad_output.read_storage()?),
                1 => {}
                _ => dx = Some(grad_input.write_storage()?),
            }
        }
        let (Some(input), Some(mut dx)) = (input, dx) else {
            crate::bail!("storage guards not acquired");
        };
        let dy: &B::Storage = match &dy_guard {
            Some(guard) => &**guard,
            None => &*input,
        };
        B::fake_quantize_backward(
            &mut dx,
            grad_input.layout(),
            &input,
            self.layout(),
            dy,
            grad_output.layout(),
            params,
            mode,
        )
    }

    /// A dense copy that never shares storage with `self`.
    fn copy_out(&self) -> Result<Self> {
        let storage = self.read_storage()?;
        let dense = B::to_contiguous(&storage, &self.inner.layout)?;
        Ok(Self::from_storage(
            dense,
            Layout::contiguous(self.shape().clone()),
            self.inner.dtype,
            self.inner.device.clone(),
        ))
    }
}
