//! Input conditioning: high-pass equalization followed by a hard limiter.
//!
//! Both stages work in normalized amplitude (`sample / 2^(bits-1)`) and write
//! back through `SampleFormat::denormalize`, which saturates rather than
//! wraps. The high-pass history persists across blocks for the lifetime of
//! the pipeline.

pub mod biquad;

use tracing::info;

use crate::{
    audio::AudioBlock,
    config::PipelineConfig,
    error::Result,
};

use biquad::{butterworth, Response, SosFilter};

/// Order of the equalization high-pass.
pub const HIGHPASS_ORDER: usize = 4;

/// Stateful high-pass + limiter applied in place to every block.
#[derive(Debug, Clone)]
pub struct FilterChain {
    highpass: Option<SosFilter>,
    /// Symmetric clip level in normalized amplitude.
    limiter: Option<f64>,
}

impl FilterChain {
    /// Build the chain for `config`.
    ///
    /// # Errors
    /// Returns a configuration error if the high-pass cannot be designed at
    /// the native rate.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let highpass = if config.highpass_enabled {
            let sections = butterworth(
                HIGHPASS_ORDER,
                Response::HighPass,
                config.highpass_cutoff_hz,
                config.native_sample_rate,
            )?;
            Some(SosFilter::new(sections, config.channels as usize))
        } else {
            None
        };
        let limiter = config.limiter_enabled.then_some(config.limiter_threshold);

        info!(
            highpass = config.highpass_enabled,
            cutoff_hz = config.highpass_cutoff_hz,
            limiter = config.limiter_enabled,
            threshold = config.limiter_threshold,
            "filter chain configured"
        );

        Ok(Self { highpass, limiter })
    }

    /// `true` when both stages are disabled and `apply` leaves blocks untouched.
    pub fn is_bypassed(&self) -> bool {
        self.highpass.is_none() && self.limiter.is_none()
    }

    /// Filter `block` in place. The block must already match the configured
    /// channel count (see `AudioBlock::check_shape`).
    pub fn apply(&mut self, block: &mut AudioBlock) {
        if self.is_bypassed() {
            return;
        }
        let channels = block.channels as usize;
        let format = block.format;

        for frame in block.samples.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let mut x = format.normalize(*sample);
                if let Some(hp) = self.highpass.as_mut() {
                    x = hp.process(ch, x);
                }
                if let Some(t) = self.limiter {
                    x = x.clamp(-t, t);
                }
                *sample = format.denormalize(x);
            }
        }
    }

    /// Clear high-pass history. Only valid on pipeline restart.
    pub fn reset(&mut self) {
        if let Some(hp) = self.highpass.as_mut() {
            hp.reset();
        }
    }
}
