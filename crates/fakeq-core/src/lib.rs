//! # fakeq-core
//!
//! Core types and kernels for simulated ("fake") quantization.
//!
//! This crate provides:
//! - [`RoundingMode`] — the five rounding policies and their selector mapping
//! - [`QuantParams`] / [`PerChannelParams`] — affine quantization parameters
//! - [`FakeQuantKernel`] — the per-element forward and STE backward math
//! - [`Shape`] / [`Layout`] — shape, strides, broadcasting
//! - [`DType`] — element types (F16, BF16, F32, F64)
//! - [`Backend`] trait — abstraction over execution devices
//! - [`Tensor`] — storage handle with views and the fake-quantize operations
//! - [`simulate_quantize`] / [`simulate_quantize_backward`] — raw entry points

pub mod backend;
pub mod dtype;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod ops;
pub mod per_channel;
pub mod qparams;
pub mod rounding;
pub mod shape;
pub mod tensor;

pub use backend::{Backend, BackendDevice, BackendStorage};
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use kernel::FakeQuantKernel;
pub use layout::Layout;
pub use ops::{simulate_quantize, simulate_quantize_backward};
pub use qparams::{check_quant_range, int_range, PerChannelParams, QuantParams};
pub use rounding::RoundingMode;
pub use shape::Shape;
pub use tensor::Tensor;
