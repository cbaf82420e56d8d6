// Quantization parameters
//
// An affine quantizer maps a real value onto an integer grid:
//
//   level = clamp(round(x / scale + zero_point), quant_min, quant_max)
//   x'    = (level - zero_point) * scale
//
// QuantParams carries one (scale, zero_point) pair and the inclusive integer
// range. PerChannelParams carries one pair per index along a channel axis
// (typically dim 0 of a weight), sharing the integer range.
//
// The kernels never validate these values: a non-positive scale or an empty
// range gives defined but meaningless numbers (Inf/NaN/sign flips), not an
// error. `validate()` is there for the layers that want to reject them.

use crate::error::{Error, Result};

/// Per-tensor affine quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i64,
    pub quant_min: i64,
    pub quant_max: i64,
}

impl QuantParams {
    /// Build parameters without checking them.
    pub fn new(scale: f32, zero_point: i64, quant_min: i64, quant_max: i64) -> Self {
        Self {
            scale,
            zero_point,
            quant_min,
            quant_max,
        }
    }

    /// Full integer range of a `bits`-wide type with scale 1 and zero point 0.
    ///
    /// signed:   [-2^(bits-1), 2^(bits-1) - 1]   (8 → [-128, 127])
    /// unsigned: [0, 2^bits - 1]                  (8 → [0, 255])
    pub fn from_bits(bits: u32, signed: bool) -> Result<Self> {
        let (quant_min, quant_max) = int_range(bits, signed)?;
        Ok(Self::new(1.0, 0, quant_min, quant_max))
    }

    /// Min/max calibration onto `[quant_min, quant_max]`.
    ///
    /// The observed range is widened to include 0 so that zero is exactly
    /// representable. Scale is floored at `f32::EPSILON`; the zero point is
    /// rounded and clamped into the integer range.
    pub fn from_min_max(min: f32, max: f32, quant_min: i64, quant_max: i64) -> Self {
        let min_neg = min.min(0.0);
        let max_pos = max.max(0.0);
        let levels = if quant_max > quant_min {
            quant_max.abs_diff(quant_min) as f32
        } else {
            1.0
        };
        let scale = ((max_pos - min_neg) / levels).max(f32::EPSILON);
        let zero_point = quant_min as f64 - (min_neg as f64 / scale as f64).round_ties_even();
        let zero_point = (zero_point as i64).clamp(quant_min, quant_max);
        Self::new(scale, zero_point, quant_min, quant_max)
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// `1 / scale` in f32. Kernels compute this once per call and multiply
    /// by it instead of dividing every element.
    pub fn inv_scale(&self) -> f32 {
        1.0f32 / self.scale
    }

    /// Number of integer levels in the range, saturating at `u64::MAX` for
    /// the full i64 range.
    pub fn num_levels(&self) -> u64 {
        self.quant_max.abs_diff(self.quant_min).saturating_add(1)
    }

    /// `[(quant_min - zero_point) * scale, (quant_max - zero_point) * scale]`
    pub fn dequantized_range(&self) -> (f64, f64) {
        let scale = self.scale as f64;
        let zp = self.zero_point as f64;
        (
            (self.quant_min as f64 - zp) * scale,
            (self.quant_max as f64 - zp) * scale,
        )
    }

    /// Reject a non-finite or non-positive scale and an empty integer range.
    pub fn validate(&self) -> Result<()> {
        check_quant_range(self.quant_min, self.quant_max)?;
        check_scale(self.scale)
    }
}

/// Per-channel affine quantization parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PerChannelParams {
    pub scales: Vec<f32>,
    pub zero_points: Vec<i64>,
    /// Dimension indexed by channel.
    pub axis: usize,
    pub quant_min: i64,
    pub quant_max: i64,
}

impl PerChannelParams {
    pub fn new(
        scales: Vec<f32>,
        zero_points: Vec<i64>,
        axis: usize,
        quant_min: i64,
        quant_max: i64,
    ) -> Self {
        Self {
            scales,
            zero_points,
            axis,
            quant_min,
            quant_max,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.scales.len()
    }

    /// Per-tensor parameters of channel `c`.
    ///
    /// Panics if `c` is out of range; callers check with
    /// [`PerChannelParams::check_channels`] first.
    pub fn channel(&self, c: usize) -> QuantParams {
        QuantParams::new(
            self.scales[c],
            self.zero_points[c],
            self.quant_min,
            self.quant_max,
        )
    }

    /// Both parameter vectors must have one entry per channel.
    pub fn check_channels(&self, dim_size: usize) -> Result<()> {
        if self.scales.len() != dim_size {
            return Err(Error::ChannelCountMismatch {
                axis: self.axis,
                expected: dim_size,
                got: self.scales.len(),
                what: "scales",
            });
        }
        if self.zero_points.len() != dim_size {
            return Err(Error::ChannelCountMismatch {
                axis: self.axis,
                expected: dim_size,
                got: self.zero_points.len(),
                what: "zero points",
            });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        check_quant_range(self.quant_min, self.quant_max)?;
        if self.scales.len() != self.zero_points.len() {
            return Err(Error::ChannelCountMismatch {
                axis: self.axis,
                expected: self.scales.len(),
                got: self.zero_points.len(),
                what: "zero points",
            });
        }
        self.scales.iter().try_for_each(|&s| check_scale(s))
    }
}

/// Inclusive integer range of a `bits`-wide signed or unsigned type.
pub fn int_range(bits: u32, signed: bool) -> Result<(i64, i64)> {
    if !(1..=32).contains(&bits) {
        crate::bail!("unsupported bit width {bits}: expected 1..=32");
    }
    if signed {
        let half = 1i64 << (bits - 1);
        Ok((-half, half - 1))
    } else {
        Ok((0, (1i64 << bits) - 1))
    }
}

fn check_scale(scale: f32) -> Result<()> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidScale { scale })
    }
}

/// `quant_min <= quant_max`, else [`Error::InvalidQuantRange`].
pub fn check_quant_range(quant_min: i64, quant_max: i64) -> Result<()> {
    if quant_min <= quant_max {
        Ok(())
    } else {
        Err(Error::InvalidQuantRange {
            quant_min,
            quant_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bits() {
        let s8 = QuantParams::from_bits(8, true).unwrap();
        assert_eq!((s8.quant_min, s8.quant_max), (-128, 127));
        assert_eq!(s8.num_levels(), 256);
        let u4 = QuantParams::from_bits(4, false).unwrap();
        assert_eq!((u4.quant_min, u4.quant_max), (0, 15));
        assert!(QuantParams::from_bits(0, true).is_err());
        assert!(QuantParams::from_bits(33, false).is_err());
    }

    #[test]
    fn test_from_min_max_asymmetric() {
        let p = QuantParams::from_min_max(-1.0, 3.0, 0, 255);
        assert!((p.scale - 4.0 / 255.0).abs() < 1e-7);
        // -(-1 / (4/255)) = 63.75 → 64
        assert_eq!(p.zero_point, 64);
    }

    #[test]
    fn test_from_min_max_includes_zero() {
        let p = QuantParams::from_min_max(2.0, 4.0, 0, 255);
        assert_eq!(p.zero_point, 0);
        assert!((p.scale - 4.0 / 255.0).abs() < 1e-7);
    }

    #[test]
    fn test_from_min_max_degenerate_range() {
        let p = QuantParams::from_min_max(0.0, 0.0, -128, 127);
        assert_eq!(p.scale, f32::EPSILON);
        assert_eq!(p.zero_point, -128);
    }

    #[test]
    fn test_full_i64_range_does_not_overflow() {
        let p = QuantParams::from_min_max(-1.0, 1.0, i64::MIN, i64::MAX);
        assert!(p.scale.is_finite() && p.scale > 0.0);
        assert!(p.zero_point >= p.quant_min && p.zero_point <= p.quant_max);
        assert_eq!(p.num_levels(), u64::MAX);

        let wide = (1i64 << 62) + 5;
        let p = QuantParams::from_min_max(-1.0, 1.0, -wide, wide);
        assert!(p.scale > 0.0);
        assert_eq!(p.num_levels(), 2 * wide as u64 + 1);
    }

    #[test]
    fn test_dequantized_range() {
        let p = QuantParams::new(0.5, 10, 0, 255);
        assert_eq!(p.dequantized_range(), (-5.0, 122.5));
    }

    #[test]
    fn test_validate() {
        assert!(QuantParams::new(0.1, 0, -128, 127).validate().is_ok());
        assert!(matches!(
            QuantParams::new(0.0, 0, -128, 127).validate(),
            Err(Error::InvalidScale { .. })
        ));
        assert!(matches!(
            QuantParams::new(f32::NAN, 0, -128, 127).validate(),
            Err(Error::InvalidScale { .. })
        ));
        assert!(matches!(
            QuantParams::new(1.0, 0, 5, 4).validate(),
            Err(Error::InvalidQuantRange { .. })
        ));
    }

    #[test]
    fn test_per_channel_checks() {
        let p = PerChannelParams::new(vec![0.1, 0.2], vec![0, 1], 0, -128, 127);
        assert!(p.validate().is_ok());
        assert!(p.check_channels(2).is_ok());
        assert!(matches!(
            p.check_channels(3),
            Err(Error::ChannelCountMismatch { expected: 3, got: 2, .. })
        ));
        assert_eq!(p.channel(1), QuantParams::new(0.2, 1, -128, 127));

        let bad = PerChannelParams::new(vec![0.1, -0.2], vec![0, 1], 0, -128, 127);
        assert!(bad.validate().is_err());
    }
}
