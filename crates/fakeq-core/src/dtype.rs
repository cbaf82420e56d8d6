use std::fmt;

// DType — Supported element data types
//
// Fake quantization only ever produces floating-point tensors (the integer
// tensor is never materialized), so only float dtypes exist here:
//
//   F16  — 16-bit IEEE half float
//   BF16 — 16-bit brain float
//   F32  — 32-bit float, the reference precision of the kernels
//   F64  — 64-bit float
//
// PRECISION OF THE QUANTIZATION INTERMEDIATE:
//
//   v = x * inv_scale + zero_point is evaluated in f32 for F32 and for the
//   half types (promoted to f32 first), and in f64 for F64. The rounded
//   value is then widened to f64, which is exact, and all later steps
//   (clamp, subtract zero point, multiply by scale) run in f64 and are
//   narrowed once to the element type.

/// Enum of all supported element data types.
///
/// Stored inside every tensor so kernels can dispatch to the typed
/// implementation at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

// WithDType — Trait that connects Rust types to DType enum

/// Trait implemented by Rust float types that can be stored in a tensor.
///
/// Besides the DType mapping and f64 conversions, it carries the one
/// precision-sensitive step of the quantizer: the affine map of an input
/// element onto the (unrounded) integer grid.
pub trait WithDType:
    Copy + Send + Sync + 'static + num_traits::Zero + PartialOrd + std::fmt::Debug
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64.
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64 (rounding to nearest).
    fn from_f64(v: f64) -> Self;

    /// `self * inv_scale + zero_point`, evaluated in this type's compute
    /// precision and widened to f64.
    fn affine_level(self, inv_scale: f32, zero_point: i64) -> f64;
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    #[inline(always)]
    fn affine_level(self, inv_scale: f32, zero_point: i64) -> f64 {
        (self * inv_scale + zero_point as f32) as f64
    }
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    #[inline(always)]
    fn affine_level(self, inv_scale: f32, zero_point: i64) -> f64 {
        self * inv_scale as f64 + zero_point as f64
    }
}

impl WithDType for half::f16 {
    const DTYPE: DType = DType::F16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
    #[inline(always)]
    fn affine_level(self, inv_scale: f32, zero_point: i64) -> f64 {
        self.to_f32().affine_level(inv_scale, zero_point)
    }
}

impl WithDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
    #[inline(always)]
    fn affine_level(self, inv_scale: f32, zero_point: i64) -> f64 {
        self.to_f32().affine_level(inv_scale, zero_point)
    }
}
