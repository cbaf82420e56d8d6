// CPU fake-quantize kernels
//
// Each entry point resolves the rounding mode once with `dispatch_rounding!`,
// builds a FakeQuantKernel around that mode's rounding function, and only
// then dispatches on dtype and hands the element closure to the driver in
// `iter`. The mode tag is never looked at inside the element loop.

use fakeq_core::backend::BackendStorage;
use fakeq_core::dispatch_rounding;
use fakeq_core::error::{Error, Result};
use fakeq_core::kernel::FakeQuantKernel;
use fakeq_core::layout::Layout;
use fakeq_core::qparams::QuantParams;
use fakeq_core::rounding::RoundingMode;

use crate::iter::{binary_map, inplace_map, unary_map, Walk};
use crate::CpuStorage;

fn dtype_mismatch(expected: &CpuStorage, got: &CpuStorage) -> Error {
    Error::DTypeMismatch {
        expected: expected.dtype(),
        got: got.dtype(),
    }
}

fn forward_typed<R>(
    k: FakeQuantKernel<R>,
    out: &mut CpuStorage,
    out_layout: &Layout,
    input: &CpuStorage,
    input_layout: &Layout,
) -> Result<Walk>
where
    R: Fn(f64) -> f64 + Copy + Send + Sync,
{
    match (out, input) {
        (CpuStorage::F16(o), CpuStorage::F16(i)) => {
            unary_map(o, out_layout, i, input_layout, |x| k.forward(x))
        }
        (CpuStorage::BF16(o), CpuStorage::BF16(i)) => {
            unary_map(o, out_layout, i, input_layout, |x| k.forward(x))
        }
        (CpuStorage::F32(o), CpuStorage::F32(i)) => {
            unary_map(o, out_layout, i, input_layout, |x| k.forward(x))
        }
        (CpuStorage::F64(o), CpuStorage::F64(i)) => {
            unary_map(o, out_layout, i, input_layout, |x| k.forward(x))
        }
        (o, i) => Err(dtype_mismatch(o, i)),
    }
}

fn inplace_typed<R>(k: FakeQuantKernel<R>, buf: &mut CpuStorage, layout: &Layout) -> Result<Walk>
where
    R: Fn(f64) -> f64 + Copy + Send + Sync,
{
    match buf {
        CpuStorage::F16(b) => inplace_map(b, layout, |x| k.forward(x)),
        CpuStorage::BF16(b) => inplace_map(b, layout, |x| k.forward(x)),
        CpuStorage::F32(b) => inplace_map(b, layout, |x| k.forward(x)),
        CpuStorage::F64(b) => inplace_map(b, layout, |x| k.forward(x)),
    }
}

fn backward_typed<R>(
    k: FakeQuantKernel<R>,
    grad_input: &mut CpuStorage,
    grad_input_layout: &Layout,
    input: &CpuStorage,
    input_layout: &Layout,
    grad_output: &CpuStorage,
    grad_output_layout: &Layout,
) -> Result<Walk>
where
    R: Fn(f64) -> f64 + Copy + Send + Sync,
{
    if input.dtype() != grad_output.dtype() {
        return Err(dtype_mismatch(input, grad_output));
    }
    match (grad_input, input, grad_output) {
        (CpuStorage::F16(dx), CpuStorage::F16(x), CpuStorage::F16(dy)) => binary_map(
            dx,
            grad_input_layout,
            x,
            input_layout,
            dy,
            grad_output_layout,
            |x, dy| k.backward(x, dy),
        ),
        (CpuStorage::BF16(dx), CpuStorage::BF16(x), CpuStorage::BF16(dy)) => binary_map(
            dx,
            grad_input_layout,
            x,
            input_layout,
            dy,
            grad_output_layout,
            |x, dy| k.backward(x, dy),
        ),
        (CpuStorage::F32(dx), CpuStorage::F32(x), CpuStorage::F32(dy)) => binary_map(
            dx,
            grad_input_layout,
            x,
            input_layout,
            dy,
            grad_output_layout,
            |x, dy| k.backward(x, dy),
        ),
        (CpuStorage::F64(dx), CpuStorage::F64(x), CpuStorage::F64(dy)) => binary_map(
            dx,
            grad_input_layout,
            x,
            input_layout,
            dy,
            grad_output_layout,
            |x, dy| k.backward(x, dy),
        ),
        (dx, x, _) => Err(dtype_mismatch(x, dx)),
    }
}

/// Fake-quantize `input` into `out` (per-tensor parameters).
pub fn fake_quantize_slice(
    out: &mut CpuStorage,
    out_layout: &Layout,
    input: &CpuStorage,
    input_layout: &Layout,
    params: &QuantParams,
    mode: RoundingMode,
) -> Result<()> {
    let walk = dispatch_rounding!(mode, round => forward_typed(
        FakeQuantKernel::new(params, round),
        out,
        out_layout,
        input,
        input_layout,
    ))?;
    log::debug!(
        "fake_quantize: {} x {} ({mode}, scale={}, zp={}, range=[{}, {}]) via {walk:?}",
        out_layout.shape(),
        input.dtype(),
        params.scale,
        params.zero_point,
        params.quant_min,
        params.quant_max,
    );
    Ok(())
}

/// Fake-quantize one view in place.
pub fn fake_quantize_slice_inplace(
    buf: &mut CpuStorage,
    layout: &Layout,
    params: &QuantParams,
    mode: RoundingMode,
) -> Result<()> {
    let walk = dispatch_rounding!(mode, round => inplace_typed(
        FakeQuantKernel::new(params, round),
        buf,
        layout,
    ))?;
    log::debug!(
        "fake_quantize_inplace: {} x {} ({mode}) via {walk:?}",
        layout.shape(),
        buf.dtype(),
    );
    Ok(())
}

/// Straight-through gradient of [`fake_quantize_slice`].
#[allow(clippy::too_many_arguments)]
pub fn fake_quantize_grad_slice(
    grad_input: &mut CpuStorage,
    grad_input_layout: &Layout,
    input: &CpuStorage,
    input_layout: &Layout,
    grad_output: &CpuStorage,
    grad_output_layout: &Layout,
    params: &QuantParams,
    mode: RoundingMode,
) -> Result<()> {
    let walk = dispatch_rounding!(mode, round => backward_typed(
        FakeQuantKernel::new(params, round),
        grad_input,
        grad_input_layout,
        input,
        input_layout,
        grad_output,
        grad_output_layout,
    ))?;
    log::debug!(
        "fake_quantize_backward: {} x {} ({mode}) via {walk:?}",
        grad_input_layout.shape(),
        input.dtype(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fakeq_core::Shape;

    fn run(input: Vec<f32>, params: QuantParams, mode: RoundingMode) -> Vec<f32> {
        let layout = Layout::contiguous(Shape::from(input.len()));
        let mut out = CpuStorage::F32(vec![0.0; input.len()]);
        fake_quantize_slice(&mut out, &layout, &CpuStorage::F32(input), &layout, &params, mode)
            .unwrap();
        match out {
            CpuStorage::F32(v) => v,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_forward_slice() {
        let p = QuantParams::new(0.5, 10, 0, 255);
        let got = run(vec![3.2, 200.0, -100.0], p, RoundingMode::NearestEven);
        assert_eq!(got, vec![3.0, 122.5, -5.0]);
    }

    #[test]
    fn test_backward_slice() {
        let p = QuantParams::new(0.5, 10, 0, 255);
        let layout = Layout::contiguous(Shape::from(3));
        let x = CpuStorage::F32(vec![3.2, 200.0, -5.0]);
        let dy = CpuStorage::F32(vec![1.0, 1.0, 4.0]);
        let mut dx = CpuStorage::F32(vec![9.0; 3]);
        fake_quantize_grad_slice(
            &mut dx,
            &layout,
            &x,
            &layout,
            &dy,
            &layout,
            &p,
            RoundingMode::NearestEven,
        )
        .unwrap();
        // -5 / 0.5 + 10 = 0 is the lower boundary: gradient passes.
        assert_eq!(dx.to_f64_vec(), vec![1.0, 0.0, 4.0]);
    }

    #[test]
    fn test_dtype_mismatch() {
        let p = QuantParams::new(1.0, 0, -128, 127);
        let layout = Layout::contiguous(Shape::from(2));
        let mut out = CpuStorage::F64(vec![0.0; 2]);
        let err = fake_quantize_slice(
            &mut out,
            &layout,
            &CpuStorage::F32(vec![1.0, 2.0]),
            &layout,
            &p,
            RoundingMode::Floor,
        );
        assert!(matches!(err, Err(Error::DTypeMismatch { .. })));
    }

    #[test]
    fn test_inplace_slice() {
        let p = QuantParams::new(1.0, 0, -2, 2);
        let layout = Layout::contiguous(Shape::from(4));
        let mut buf = CpuStorage::F64(vec![-7.0, -0.6, 0.6, 2.5]);
        fake_quantize_slice_inplace(&mut buf, &layout, &p, RoundingMode::Truncate).unwrap();
        assert_eq!(buf.to_f64_vec(), vec![-2.0, 0.0, 0.0, 2.0]);
    }
}
