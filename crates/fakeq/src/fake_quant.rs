// FakeQuantize — a stateful fake-quantization site
//
// Holds a config, the current quantization parameters and an enabled flag.
// Training code calls `forward` on the way in and `backward` with the
// incoming gradient on the way out; `calibrate` refreshes the parameters
// from the observed min/max of a tensor.
//
// PARAMETERS:
//
//   Per-tensor sites start at scale 1, zero point 0 over the configured range.
//   Per-channel sites start with no channels and must be calibrated (or given
//   parameters with `set_per_channel_params`) before the first forward.

use std::marker::PhantomData;

use fakeq_core::backend::Backend;
use fakeq_core::error::{Error, Result};
use fakeq_core::tensor::Tensor;
use fakeq_core::{PerChannelParams, QuantParams, RoundingMode};

use crate::config::{FakeQuantConfig, Granularity};

/// Current parameters of a site.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteParams {
    PerTensor(QuantParams),
    PerChannel(PerChannelParams),
}

/// A fake-quantization site with straight-through gradients.
///
/// # Example
/// ```ignore
/// let mut fq = FakeQuantize::<CpuBackend>::new(FakeQuantConfig::uint8())?;
/// fq.calibrate(&activations)?;
/// let y = fq.forward(&activations)?;
/// let dx = fq.backward(&activations, &dy)?;
/// ```
pub struct FakeQuantize<B: Backend> {
    config: FakeQuantConfig,
    params: SiteParams,
    enabled: bool,
    _backend: PhantomData<B>,
}

impl<B: Backend> Clone for FakeQuantize<B> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            params: self.params.clone(),
            enabled: self.enabled,
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> std::fmt::Debug for FakeQuantize<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeQuantize")
            .field("range", &(self.config.quant_min, self.config.quant_max))
            .field("rounding", &self.config.rounding)
            .field("params", &self.params)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl<B: Backend> FakeQuantize<B> {
    pub fn new(config: FakeQuantConfig) -> Result<Self> {
        config.validate()?;
        let (qmin, qmax) = (config.quant_min, config.quant_max);
        let params = match config.granularity {
            Granularity::PerTensor => SiteParams::PerTensor(QuantParams::new(1.0, 0, qmin, qmax)),
            Granularity::PerChannel { axis } => {
                SiteParams::PerChannel(PerChannelParams::new(Vec::new(), Vec::new(), axis, qmin, qmax))
            }
        };
        Ok(Self {
            enabled: config.enabled,
            config,
            params,
            _backend: PhantomData,
        })
    }

    pub fn config(&self) -> &FakeQuantConfig {
        &self.config
    }

    pub fn params(&self) -> &SiteParams {
        &self.params
    }

    pub fn rounding(&self) -> RoundingMode {
        self.config.rounding
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Replace the parameters of a per-tensor site.
    pub fn set_params(&mut self, params: QuantParams) -> Result<()> {
        if let Granularity::PerChannel { .. } = self.config.granularity {
            return Err(Error::Config(
                "per-tensor parameters given to a per-channel site".to_string(),
            ));
        }
        params.validate()?;
        self.params = SiteParams::PerTensor(params);
        Ok(())
    }

    /// Replace the parameters of a per-channel site.
    pub fn set_per_channel_params(&mut self, params: PerChannelParams) -> Result<()> {
        match self.config.granularity {
            Granularity::PerChannel { axis } if axis == params.axis => {}
            Granularity::PerChannel { axis } => {
                return Err(Error::Config(format!(
                    "per-channel parameters on axis {}, site quantizes axis {axis}",
                    params.axis
                )))
            }
            Granularity::PerTensor => {
                return Err(Error::Config(
                    "per-channel parameters given to a per-tensor site".to_string(),
                ))
            }
        }
        params.validate()?;
        self.params = SiteParams::PerChannel(params);
        Ok(())
    }

    /// Fake-quantized copy of `x`, or `x` itself when disabled.
    pub fn forward(&self, x: &Tensor<B>) -> Result<Tensor<B>> {
        if !self.enabled {
            return Ok(x.clone());
        }
        match &self.params {
            SiteParams::PerTensor(p) => x.fake_quantize(p, self.config.rounding),
            SiteParams::PerChannel(p) => x.fake_quantize_per_channel(p, self.config.rounding),
        }
    }

    /// Gradient with respect to `x`, or `grad_output` itself when disabled.
    pub fn backward(&self, x: &Tensor<B>, grad_output: &Tensor<B>) -> Result<Tensor<B>> {
        if !self.enabled {
            return Ok(grad_output.clone());
        }
        match &self.params {
            SiteParams::PerTensor(p) => {
                x.fake_quantize_backward(grad_output, p, self.config.rounding)
            }
            SiteParams::PerChannel(p) => {
                x.fake_quantize_per_channel_backward(grad_output, p, self.config.rounding)
            }
        }
    }

    /// Set the parameters from the min/max of `x` (per slice for per-channel
    /// sites). Non-finite values are ignored. A tensor with no finite values
    /// leaves per-tensor parameters unchanged.
    pub fn calibrate(&mut self, x: &Tensor<B>) -> Result<()> {
        let (qmin, qmax) = (self.config.quant_min, self.config.quant_max);
        match self.config.granularity {
            Granularity::PerTensor => {
                let Some((min, max)) = finite_min_max(&x.to_f64_vec()?) else {
                    log::warn!("calibrate: no finite values in {x:?}, keeping current parameters");
                    return Ok(());
                };
                let p = QuantParams::from_min_max(min as f32, max as f32, qmin, qmax);
                log::debug!(
                    "calibrate: [{min}, {max}] -> scale={}, zp={} over {} levels",
                    p.scale,
                    p.zero_point,
                    p.num_levels()
                );
                self.params = SiteParams::PerTensor(p);
            }
            Granularity::PerChannel { axis } => {
                let channels = x.shape().dim(axis)?;
                let mut scales = Vec::with_capacity(channels);
                let mut zero_points = Vec::with_capacity(channels);
                for c in 0..channels {
                    let slice = x.narrow(axis, c, 1)?.to_f64_vec()?;
                    let (min, max) = finite_min_max(&slice).unwrap_or_else(|| {
                        log::warn!("calibrate: channel {c} has no finite values");
                        (0.0, 0.0)
                    });
                    let p = QuantParams::from_min_max(min as f32, max as f32, qmin, qmax);
                    log::trace!("calibrate: channel {c} [{min}, {max}] -> scale={}", p.scale);
                    scales.push(p.scale);
                    zero_points.push(p.zero_point);
                }
                log::debug!("calibrate: {channels} channels on axis {axis}");
                self.params = SiteParams::PerChannel(PerChannelParams::new(
                    scales,
                    zero_points,
                    axis,
                    qmin,
                    qmax,
                ));
            }
        }
        Ok(())
    }
}

fn finite_min_max(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}
