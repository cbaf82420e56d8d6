// CPU Backend — host-memory implementation of the fakeq Backend trait
//
// ARCHITECTURE:
// - CpuDevice is a unit handle; there is one host.
// - CpuStorage is an enum over Vec<T> for each supported float dtype.
// - Kernels never require contiguous data: the driver in `iter` walks any
//   strided or broadcast layout directly, and dense ranges take a zipped
//   (optionally rayon-parallel) fast path.
// - F16 and BF16 are stored natively and computed via promote-to-F32.
//
// USAGE:
//   let x = CpuTensor::from_f64_slice(&[3.2, 200.0], 2, DType::F32, &CpuDevice)?;
//   let y = x.fake_quantize(&QuantParams::new(0.5, 10, 0, 255), RoundingMode::NearestEven)?;

pub mod iter;
pub mod quant;

use half::{bf16, f16};
use std::fmt;

use fakeq_core::backend::{Backend, BackendDevice, BackendStorage};
use fakeq_core::dtype::{DType, WithDType};
use fakeq_core::error::Result;
use fakeq_core::layout::Layout;
use fakeq_core::qparams::QuantParams;
use fakeq_core::rounding::RoundingMode;
use fakeq_core::shape::Shape;
use fakeq_core::tensor::Tensor;

pub use iter::{Walk, PARALLEL_THRESHOLD};

/// The host CPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuDevice;

impl BackendDevice for CpuDevice {
    fn name(&self) -> String {
        "cpu".to_string()
    }
}

/// Host storage, one variant per element type.
#[derive(Clone)]
pub enum CpuStorage {
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl fmt::Debug for CpuStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuStorage::F16(v) => write!(f, "CpuStorage::F16(len={})", v.len()),
            CpuStorage::BF16(v) => write!(f, "CpuStorage::BF16(len={})", v.len()),
            CpuStorage::F32(v) => write!(f, "CpuStorage::F32(len={})", v.len()),
            CpuStorage::F64(v) => write!(f, "CpuStorage::F64(len={})", v.len()),
        }
    }
}

impl BackendStorage for CpuStorage {
    fn dtype(&self) -> DType {
        match self {
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::BF16(_) => DType::BF16,
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F64(_) => DType::F64,
        }
    }

    fn len(&self) -> usize {
        match self {
            CpuStorage::F16(v) => v.len(),
            CpuStorage::BF16(v) => v.len(),
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F64(v) => v.len(),
        }
    }
}

impl CpuStorage {
    /// Every element, in storage order, converted to f64.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        fn widen<T: WithDType>(v: &[T]) -> Vec<f64> {
            v.iter().map(|&x| x.to_f64()).collect()
        }
        match self {
            CpuStorage::F16(v) => widen(v),
            CpuStorage::BF16(v) => widen(v),
            CpuStorage::F32(v) => widen(v),
            CpuStorage::F64(v) => widen(v),
        }
    }
}

fn narrow_from<T: WithDType>(data: &[f64]) -> Vec<T> {
    data.iter().map(|&x| T::from_f64(x)).collect()
}

/// Marker type for the CPU backend.
#[derive(Debug, Clone, Copy)]
pub struct CpuBackend;

/// A tensor living in host memory.
pub type CpuTensor = Tensor<CpuBackend>;

impl Backend for CpuBackend {
    type Device = CpuDevice;
    type Storage = CpuStorage;

    fn zeros(shape: &Shape, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        let n = shape.elem_count();
        Ok(match dtype {
            DType::F16 => CpuStorage::F16(vec![f16::ZERO; n]),
            DType::BF16 => CpuStorage::BF16(vec![bf16::ZERO; n]),
            DType::F32 => CpuStorage::F32(vec![0.0; n]),
            DType::F64 => CpuStorage::F64(vec![0.0; n]),
        })
    }

    fn from_f64_slice(data: &[f64], dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        Ok(match dtype {
            DType::F16 => CpuStorage::F16(narrow_from(data)),
            DType::BF16 => CpuStorage::BF16(narrow_from(data)),
            DType::F32 => CpuStorage::F32(narrow_from(data)),
            DType::F64 => CpuStorage::F64(data.to_vec()),
        })
    }

    fn to_contiguous(input: &CpuStorage, layout: &Layout) -> Result<CpuStorage> {
        Ok(match input {
            CpuStorage::F16(v) => CpuStorage::F16(iter::gather(v, layout)?),
            CpuStorage::BF16(v) => CpuStorage::BF16(iter::gather(v, layout)?),
            CpuStorage::F32(v) => CpuStorage::F32(iter::gather(v, layout)?),
            CpuStorage::F64(v) => CpuStorage::F64(iter::gather(v, layout)?),
        })
    }

    fn to_f64_vec(input: &CpuStorage, layout: &Layout) -> Result<Vec<f64>> {
        Ok(Self::to_contiguous(input, layout)?.to_f64_vec())
    }

    fn fake_quantize(
        out: &mut CpuStorage,
        out_layout: &Layout,
        input: &CpuStorage,
        input_layout: &Layout,
        params: &QuantParams,
        mode: RoundingMode,
    ) -> Result<()> {
        quant::fake_quantize_slice(out, out_layout, input, input_layout, params, mode)
    }

    fn fake_quantize_inplace(
        buf: &mut CpuStorage,
        layout: &Layout,
        params: &QuantParams,
        mode: RoundingMode,
    ) -> Result<()> {
        quant::fake_quantize_slice_inplace(buf, layout, params, mode)
    }

    fn fake_quantize_backward(
        grad_input: &mut CpuStorage,
        grad_input_layout: &Layout,
        input: &CpuStorage,
        input_layout: &Layout,
        grad_output: &CpuStorage,
        grad_output_layout: &Layout,
        params: &QuantParams,
        mode: RoundingMode,
    ) -> Result<()> {
        quant::fake_quantize_grad_slice(
            grad_input,
            grad_input_layout,
            input,
            input_layout,
            grad_output,
            grad_output_layout,
            params,
            mode,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_name() {
        assert_eq!(CpuDevice.name(), "cpu");
    }

    #[test]
    fn test_zeros_and_conversion() {
        let s = CpuBackend::zeros(&Shape::from((2, 3)), DType::BF16, &CpuDevice).unwrap();
        assert_eq!(s.dtype(), DType::BF16);
        assert_eq!(s.len(), 6);

        let s = CpuBackend::from_f64_slice(&[0.1, 2.5], DType::F16, &CpuDevice).unwrap();
        assert_eq!(s.to_f64_vec(), vec![f16::from_f64(0.1).to_f64(), 2.5]);
    }

    #[test]
    fn test_to_contiguous_follows_layout() {
        let s = CpuBackend::from_f64_slice(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0], DType::F32, &CpuDevice)
            .unwrap();
        let layout = Layout::contiguous(Shape::from((2, 3))).transpose(0, 1).unwrap();
        let dense = CpuBackend::to_contiguous(&s, &layout).unwrap();
        assert_eq!(dense.to_f64_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_debug_format() {
        let s = CpuStorage::F64(vec![0.0; 3]);
        assert_eq!(format!("{s:?}"), "CpuStorage::F64(len=3)");
    }
}
