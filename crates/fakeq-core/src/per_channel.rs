// Per-channel fake quantization
//
// Weights are usually quantized with one (scale, zero_point) pair per output
// channel. This is orchestration only: for each index c along `axis`, narrow
// input, output (and gradients) to that slice and run the per-tensor kernel
// with the channel's parameters. The slice kernel sees a strided view (a
// dense range when axis == 0 on a contiguous tensor) and nothing else
// changes, so per-channel results are exactly per-tensor results per slice.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::qparams::PerChannelParams;
use crate::rounding::RoundingMode;
use crate::tensor::Tensor;

impl<B: Backend> Tensor<B> {
    /// Size of the channel axis, after checking `params` against it.
    fn channel_count(&self, params: &PerChannelParams) -> Result<usize> {
        let channels = self.shape().dim(params.axis)?;
        params.check_channels(channels)?;
        Ok(channels)
    }

    /// Fake-quantize with one parameter pair per index along `params.axis`.
    pub fn fake_quantize_per_channel(
        &self,
        params: &PerChannelParams,
        mode: RoundingMode,
    ) -> Result<Self> {
        let channels = self.channel_count(params)?;
        let out = Self::zeros_like(self)?;
        for c in 0..channels {
            let src = self.narrow(params.axis, c, 1)?;
            let dst = out.narrow(params.axis, c, 1)?;
            let p = params.channel(c);
            log::trace!("channel {c}/{channels}: scale={}, zp={}", p.scale, p.zero_point);
            src.fake_quantize_into(&dst, &p, mode)?;
        }
        Ok(out)
    }

    /// Per-channel variant of [`Tensor::fake_quantize_inplace`].
    pub fn fake_quantize_per_channel_inplace(
        &self,
        params: &PerChannelParams,
        mode: RoundingMode,
    ) -> Result<()> {
        let channels = self.channel_count(params)?;
        for c in 0..channels {
            let p = params.channel(c);
            log::trace!("channel {c}/{channels} in place: scale={}, zp={}", p.scale, p.zero_point);
            self.narrow(params.axis, c, 1)?.fake_quantize_inplace(&p, mode)?;
        }
        Ok(())
    }

    /// Straight-through gradient of [`Tensor::fake_quantize_per_channel`].
    ///
    /// `grad_output` must have the same shape as `self`; channel slices of a
    /// broadcast gradient would not line up with the channel parameters.
    pub fn fake_quantize_per_channel_backward(
        &self,
        grad_output: &Self,
        params: &PerChannelParams,
        mode: RoundingMode,
    ) -> Result<Self> {
        if grad_output.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: grad_output.shape().clone(),
            });
        }
        let channels = self.channel_count(params)?;
        let grad_input = Self::zeros_like(self)?;
        for c in 0..channels {
            let x = self.narrow(params.axis, c, 1)?;
            let dy = grad_output.narrow(params.axis, c, 1)?;
            let dx = grad_input.narrow(params.axis, c, 1)?;
            log::trace!("channel {c}/{channels} backward");
            x.fake_quantize_backward_into(&dy, &dx, &params.channel(c), mode)?;
        }
        Ok(grad_input)
    }
}
