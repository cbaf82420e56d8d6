//! # fakeq
//!
//! Simulated ("fake") quantization with straight-through gradients.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use fakeq::prelude::*;
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `fakeq-core` | Rounding modes, quantization parameters, element kernel, Tensor, Backend trait |
//! | `fakeq-cpu` | CPU backend: broadcasting element-wise driver with rayon parallelism |
//!
//! ## Modules
//!
//! - [`config`] — `FakeQuantConfig`, loadable from JSON
//! - [`fake_quant`] — `FakeQuantize`, a calibrated fake-quantization site

/// Re-export core types.
pub use fakeq_core::{
    backend::{Backend, BackendDevice, BackendStorage},
    bail, check_quant_range, dispatch_rounding, int_range, simulate_quantize,
    simulate_quantize_backward, DType, Error, FakeQuantKernel, Layout, PerChannelParams,
    QuantParams, Result, RoundingMode, Shape, Tensor, WithDType,
};

/// Re-export CPU backend.
pub use fakeq_cpu::{CpuBackend, CpuDevice, CpuStorage, CpuTensor};

/// Fake-quantization config.
pub mod config;

/// Stateful fake-quantization site.
pub mod fake_quant;

pub use config::{FakeQuantConfig, Granularity};
pub use fake_quant::{FakeQuantize, SiteParams};

/// Convenience prelude: `use fakeq::prelude::*;`
pub mod prelude {
    pub use crate::{
        simulate_quantize, simulate_quantize_backward, CpuBackend, CpuDevice, CpuTensor, DType,
        FakeQuantConfig, FakeQuantize, Granularity, PerChannelParams, QuantParams, Result,
        RoundingMode, Shape, Tensor,
    };
}
