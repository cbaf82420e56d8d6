// Fake-quantization configuration
//
// A FakeQuantConfig describes one quantization site: the integer range, how
// values are rounded onto it, and whether parameters are shared by the whole
// tensor or kept per channel. Configs are built in code with the named
// constructors and builder methods, or loaded from JSON:
//
//   { "quant_min": -128, "quant_max": 127,
//     "rounding": "half-away-from-zero",
//     "granularity": { "per_channel": { "axis": 0 } } }
//
// Missing fields take the int8 per-tensor defaults.

use serde::{Deserialize, Serialize};

use fakeq_core::error::{Error, Result};
use fakeq_core::{check_quant_range, int_range, RoundingMode};

/// How many (scale, zero_point) pairs a tensor uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One pair for the whole tensor.
    #[default]
    PerTensor,
    /// One pair per index along `axis`.
    PerChannel { axis: usize },
}

/// Configuration of a [`crate::FakeQuantize`] site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FakeQuantConfig {
    pub quant_min: i64,
    pub quant_max: i64,
    pub rounding: RoundingMode,
    pub granularity: Granularity,
    /// Disabled sites pass values and gradients through untouched.
    pub enabled: bool,
}

impl Default for FakeQuantConfig {
    fn default() -> Self {
        Self {
            quant_min: -128,
            quant_max: 127,
            rounding: RoundingMode::NearestEven,
            granularity: Granularity::PerTensor,
            enabled: true,
        }
    }
}

impl FakeQuantConfig {
    /// Signed 8-bit, per-tensor, nearest-even.
    pub fn int8() -> Self {
        Self::default()
    }

    /// Unsigned 8-bit, per-tensor, nearest-even.
    pub fn uint8() -> Self {
        Self {
            quant_min: 0,
            quant_max: 255,
            ..Self::default()
        }
    }

    /// Full range of a `bits`-wide integer type.
    pub fn from_bits(bits: u32, signed: bool) -> Result<Self> {
        let (quant_min, quant_max) = int_range(bits, signed)?;
        Ok(Self {
            quant_min,
            quant_max,
            ..Self::default()
        })
    }

    pub fn with_rounding(mut self, rounding: RoundingMode) -> Self {
        self.rounding = rounding;
        self
    }

    /// Switch to per-channel parameters along `axis`.
    pub fn per_channel(mut self, axis: usize) -> Self {
        self.granularity = Granularity::PerChannel { axis };
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_quant_range(self.quant_min, self.quant_max)
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
