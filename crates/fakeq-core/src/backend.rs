use crate::dtype::DType;
use crate::error::Result;
use crate::layout::Layout;
use crate::qparams::QuantParams;
use crate::rounding::RoundingMode;
use crate::shape::Shape;
use std::fmt;

// Backend — Abstraction over compute devices
//
// Each backend provides its own storage type and the three fake-quantize
// kernels. Tensor<B> and the per-channel orchestration are written once
// against this trait.
//
// KERNEL CONTRACT:
//
// - Kernels take (storage, layout) pairs. Layouts may be strided and input
//   layouts may broadcast to the output shape; the backend walks them.
// - Output storage is allocated by the caller and written element by element.
//   Nothing is reallocated.
// - Numeric parameters are not validated: a kernel call with scale <= 0 or
//   quant_min > quant_max runs and writes defined-but-meaningless values.
// - Errors are only for structural problems: dtype mismatch between buffers,
//   an input shape that does not broadcast to the output, a layout that
//   reaches past the end of its storage.
// - The rounding mode is resolved once per call, never per element.

/// Identifies a compute device (e.g., "cpu").
pub trait BackendDevice: Clone + fmt::Debug + Send + Sync + 'static {
    /// A human-readable name for this device.
    fn name(&self) -> String;
}

/// A storage buffer that holds tensor data on a specific device.
pub trait BackendStorage: Clone + Send + Sync + 'static {
    /// The data type of the elements in this storage.
    fn dtype(&self) -> DType;

    /// Total number of elements in this storage.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A complete compute backend for fakeq.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    /// The device type for this backend.
    type Device: BackendDevice;
    /// The storage type for this backend.
    type Storage: BackendStorage;

    //  Creation

    /// Allocate storage filled with zeros.
    fn zeros(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Create storage from a flat f64 slice, converting to the target dtype.
    fn from_f64_slice(data: &[f64], dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    //  Data movement

    /// Make a contiguous copy of the storage following the given layout.
    fn to_contiguous(input: &Self::Storage, layout: &Layout) -> Result<Self::Storage>;

    /// Copy the elements of a view to a Vec<f64> in logical order.
    fn to_f64_vec(input: &Self::Storage, layout: &Layout) -> Result<Vec<f64>>;

    //  Fake quantization

    /// `out[i] = (clamp(round(input[i] / scale + zp), qmin, qmax) - zp) * scale`
    /// over the broadcast pairing of `out_layout` and `input_layout`.
    fn fake_quantize(
        out: &mut Self::Storage,
        out_layout: &Layout,
        input: &Self::Storage,
        input_layout: &Layout,
        params: &QuantParams,
        mode: RoundingMode,
    ) -> Result<()>;

    /// Same as [`Backend::fake_quantize`] with output and input being the same
    /// view; each element is read and then overwritten.
    fn fake_quantize_inplace(
        buf: &mut Self::Storage,
        layout: &Layout,
        params: &QuantParams,
        mode: RoundingMode,
    ) -> Result<()>;

    /// Straight-through gradient:
    /// `grad_input[i] = grad_output[i] * (qmin <= round(input[i] / scale + zp) <= qmax)`.
    #[allow(clippy::too_many_arguments)]
    fn fake_quantize_backward(
        grad_input: &mut Self::Storage,
        grad_input_layout: &Layout,
        input: &Self::Storage,
        input_layout: &Layout,
        grad_output: &Self::Storage,
        grad_output_layout: &Layout,
        params: &QuantParams,
        mode: RoundingMode,
    ) -> Result<()>;
}
