// Raw entry points
//
// The two call contracts used by per-tensor / per-channel quantization
// layers: scalar parameters as plain numbers and the rounding policy as an
// integer selector (0 nearest-even, 1 half-away-from-zero, 2 floor, 3 ceil,
// 4 truncate, anything else nearest-even). Both write into a caller-allocated
// tensor and return nothing but structural errors.

use crate::backend::Backend;
use crate::error::Result;
use crate::qparams::QuantParams;
use crate::rounding::RoundingMode;
use crate::tensor::Tensor;

/// Write the fake-quantized `input` into `output`.
pub fn simulate_quantize<B: Backend>(
    output: &Tensor<B>,
    input: &Tensor<B>,
    scale: f32,
    zero_point: i64,
    quant_min: i64,
    quant_max: i64,
    rounding_policy: i64,
) -> Result<()> {
    let params = QuantParams::new(scale, zero_point, quant_min, quant_max);
    input.fake_quantize_into(output, &params, RoundingMode::from_selector(rounding_policy))
}

/// Write the straight-through gradient of [`simulate_quantize`] into
/// `input_grad`.
#[allow(clippy::too_many_arguments)]
pub fn simulate_quantize_backward<B: Backend>(
    input_grad: &Tensor<B>,
    input: &Tensor<B>,
    output_grad: &Tensor<B>,
    scale: f32,
    zero_point: i64,
    quant_min: i64,
    quant_max: i64,
    rounding_policy: i64,
) -> Result<()> {
    let params = QuantParams::new(scale, zero_point, quant_min, quant_max);
    input.fake_quantize_backward_into(
        output_grad,
        input_grad,
        &params,
        RoundingMode::from_selector(rounding_policy),
    )
}
