// Element kernels for fake quantization
//
// FORWARD (per element x):
//
//   raw   = round(x * inv_scale + zero_point)       // shared with backward
//   level = clamp(raw as i64, quant_min, quant_max)  // truncating cast, then clamp
//   y     = (level - zero_point) * scale
//
// BACKWARD (per element x, dy), straight-through estimator:
//
//   raw   = round(x * inv_scale + zero_point)       // same function as forward
//   dx    = dy * (quant_min <= raw <= quant_max)    // inclusive, no cast/clamp
//
// Both directions call `FakeQuantKernel::level`, so an element the forward
// pass clamps is exactly an element whose gradient the backward pass zeroes.
//
// NUMERICS:
//
// - inv_scale is `1.0f32 / scale`, computed once per kernel. Multiplying by it
//   differs in the last bit from dividing by scale for some inputs; results
//   must stay bit-compatible with that choice, so there is no division here.
// - `raw as i64` saturates: ±Inf and huge values clamp to the range ends.
// - NaN input gives NaN output in the forward pass and, since NaN fails the
//   range check, a zero (or NaN, if dy is non-finite) gradient backward.
// - Clamp and dequantization run in f64 and are narrowed once to T.

use crate::dtype::WithDType;
use crate::qparams::QuantParams;

/// Quantization parameters unpacked for the inner loop, plus the resolved
/// rounding function.
///
/// `R` is a concrete function item chosen by `dispatch_rounding!`, so calls to
/// it inline.
#[derive(Debug, Clone, Copy)]
pub struct FakeQuantKernel<R> {
    inv_scale: f32,
    scale: f64,
    zero_point: i64,
    zero_point_f: f64,
    quant_min: f64,
    quant_max: f64,
    round: R,
}

impl<R> FakeQuantKernel<R>
where
    R: Fn(f64) -> f64 + Copy + Send + Sync,
{
    pub fn new(params: &QuantParams, round: R) -> Self {
        Self {
            inv_scale: params.inv_scale(),
            scale: params.scale as f64,
            zero_point: params.zero_point,
            zero_point_f: params.zero_point as f64,
            quant_min: params.quant_min as f64,
            quant_max: params.quant_max as f64,
            round,
        }
    }

    /// Rounded but unclamped level of `x`.
    #[inline(always)]
    pub fn level<T: WithDType>(&self, x: T) -> f64 {
        (self.round)(x.affine_level(self.inv_scale, self.zero_point))
    }

    /// Whether a rounded level lies inside `[quant_min, quant_max]`.
    #[inline(always)]
    pub fn in_range(&self, level: f64) -> bool {
        level >= self.quant_min && level <= self.quant_max
    }

    /// Quantize-then-dequantize one element.
    #[inline(always)]
    pub fn forward<T: WithDType>(&self, x: T) -> T {
        let raw = self.level(x);
        if raw.is_nan() {
            return T::from_f64(f64::NAN);
        }
        let level = (raw as i64) as f64;
        let level = level.max(self.quant_min).min(self.quant_max);
        T::from_f64((level - self.zero_point_f) * self.scale)
    }

    /// Gate one gradient element.
    #[inline(always)]
    pub fn backward<T: WithDType>(&self, x: T, dy: T) -> T {
        let pass = if self.in_range(self.level(x)) { 1.0 } else { 0.0 };
        T::from_f64(dy.to_f64() * pass)
    }
}


#[cfg(test)]
mod props {
    use super::*;
    use crate::RoundingMode;
    use proptest::prelude::*;

    fn params() -> impl Strategy<Value = QuantParams> {
        (0.01f32..10.0, -50i64..50, -200i64..0, 1i64..300)
            .prop_map(|(scale, zp, qmin, qmax)| QuantParams::new(scale, zp, qmin, qmax))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_output_within_dequantized_range(
            x in -1.0e4f32..1.0e4,
            p in params(),
            m in 0usize..5,
        ) {
            let mode = RoundingMode::ALL[m];
            let y = crate::dispatch_rounding!(mode, round => FakeQuantKernel::new(&p, round).forward(x));
            let (lo, hi) = p.dequantized_range();
            prop_assert!(y >= lo as f32 && y <= hi as f32, "{y} outside [{lo}, {hi}]");
        }

        #[test]
        fn prop_gradient_gate_matches_clamp(
            x in -1.0e4f32..1.0e4,
            p in params(),
            m in 0usize..5,
        ) {
            let mode = RoundingMode::ALL[m];
            crate::dispatch_rounding!(mode, round => {
                let k = FakeQuantKernel::new(&p, round);
                let raw = k.level(x);
                let y = k.forward(x);
                let g = k.backward(x, 1.0f32);
                if k.in_range(raw) {
                    prop_assert_eq!(g, 1.0);
                    prop_assert_eq!(y, ((raw - p.zero_point as f64) * p.scale as f64) as f32);
                } else {
                    let (lo, hi) = p.dequantized_range();
                    prop_assert_eq!(g, 0.0);
                    prop_assert!(y == lo as f32 || y == hi as f32);
                }
            });
        }
    }
}
