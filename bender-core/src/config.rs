//! Pipeline configuration.
//!
//! Loaded once at startup and immutable for the lifetime of a pipeline
//! instance. Every field has a default matching the reference deployment
//! (stereo INMP441 on I²S, 48 kHz S32_LE, 1024-frame blocks) so a partial
//! config file only needs to name what differs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    audio::SampleFormat,
    error::{BenderError, Result},
    ipc::publisher::PublisherSink,
    vad::DetectorKind,
};

/// Target rates the voice detector accepts.
pub const SUPPORTED_TARGET_RATES: [u32; 4] = [8_000, 16_000, 32_000, 48_000];

/// Detector window durations in milliseconds.
pub const FRAME_WINDOWS_MS: [u32; 3] = [10, 20, 30];

/// Frame sizes (in samples) the detector accepts at `sample_rate`.
pub fn accepted_frame_lengths(sample_rate: u32) -> [usize; 3] {
    FRAME_WINDOWS_MS.map(|ms| (sample_rate as usize * ms as usize) / 1000)
}

/// Names of the message-bus channels and publication cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Where published messages go.
    pub sink: PublisherSink,
    /// Channel carrying one message per classified frame.
    pub decision_channel: String,
    /// Channel carrying periodic metrics snapshots.
    pub metrics_channel: String,
    /// Publish a metrics snapshot every this many processed blocks.
    pub metrics_every_blocks: u64,
    /// Log a pipeline summary every this many processed blocks.
    pub summary_every_blocks: u64,
    /// Whether per-frame decisions are forwarded to the publisher at all.
    pub publish_decisions: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            sink: PublisherSink::default(),
            decision_channel: "bender/vad/decision".into(),
            metrics_channel: "bender/sys/metrics".into(),
            metrics_every_blocks: 100,
            summary_every_blocks: 500,
            publish_decisions: true,
        }
    }
}

/// Configuration for the capture → filter → resample → frame → detect path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capture device name. `None` selects the system default input.
    pub device: Option<String>,
    /// Hardware capture rate (Hz).
    pub native_sample_rate: u32,
    /// Detector rate (Hz). Must divide `native_sample_rate` evenly.
    pub target_sample_rate: u32,
    /// Interleaved channel count delivered by the capture source.
    pub channels: u16,
    /// Integer sample width delivered by the capture source.
    pub sample_format: SampleFormat,
    /// Frames per channel in one capture block.
    pub block_length: usize,
    /// Mono samples per detector frame at `target_sample_rate`.
    pub frame_length: usize,
    /// Detector aggressiveness, 0 (least strict) ..= 3 (most strict).
    pub aggressiveness: u8,
    /// Detector backend.
    pub detector: DetectorKind,
    /// 4th-order Butterworth high-pass stage.
    pub highpass_enabled: bool,
    /// High-pass cutoff (Hz).
    pub highpass_cutoff_hz: f64,
    /// Hard-clip limiter stage.
    pub limiter_enabled: bool,
    /// Limiter threshold in normalized amplitude, (0, 1].
    pub limiter_threshold: f64,
    /// Capacity of the real-time → publisher decision queue.
    pub decision_queue_capacity: usize,
    pub publisher: PublisherConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device: None,
            native_sample_rate: 48_000,
            target_sample_rate: 16_000,
            channels: 2,
            sample_format: SampleFormat::S32,
            block_length: 1024,
            frame_length: 320,
            aggressiveness: 2,
            detector: DetectorKind::default(),
            highpass_enabled: true,
            highpass_cutoff_hz: 80.0,
            limiter_enabled: true,
            limiter_threshold: 0.8,
            decision_queue_capacity: 256,
            publisher: PublisherConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Check every startup invariant. Any error here is fatal: the pipeline
    /// must not start.
    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(BenderError::Config("channel count must be at least 1".into()));
        }
        if self.block_length == 0 {
            return Err(BenderError::Config("block length must be at least 1".into()));
        }
        if !SUPPORTED_TARGET_RATES.contains(&self.target_sample_rate) {
            return Err(BenderError::UnsupportedSampleRate(self.target_sample_rate));
        }
        self.decimation_ratio()?;
        if !accepted_frame_lengths(self.target_sample_rate).contains(&self.frame_length) {
            return Err(BenderError::UnsupportedFrameLength {
                frame_length: self.frame_length,
                sample_rate: self.target_sample_rate,
            });
        }
        if self.aggressiveness > 3 {
            return Err(BenderError::Config(format!(
                "aggressiveness {} is outside 0..=3",
                self.aggressiveness
            )));
        }
        if !(self.limiter_threshold > 0.0 && self.limiter_threshold <= 1.0) {
            return Err(BenderError::Config(format!(
                "limiter threshold {} is outside (0, 1]",
                self.limiter_threshold
            )));
        }
        let nyquist = self.native_sample_rate as f64 / 2.0;
        if !(self.highpass_cutoff_hz > 0.0 && self.highpass_cutoff_hz < nyquist) {
            return Err(BenderError::Config(format!(
                "high-pass cutoff {} Hz must lie in (0, {nyquist}) Hz",
                self.highpass_cutoff_hz
            )));
        }
        if self.decision_queue_capacity == 0 {
            return Err(BenderError::Config(
                "decision queue capacity must be at least 1".into(),
            ));
        }
        if cfg!(not(feature = "vad-earshot")) && self.detector == DetectorKind::Earshot {
            return Err(BenderError::Config(
                "earshot detector requested but compiled without `vad-earshot`".into(),
            ));
        }
        if self.detector == DetectorKind::Earshot && self.target_sample_rate != 16_000 {
            return Err(BenderError::UnsupportedSampleRate(self.target_sample_rate));
        }
        Ok(())
    }

    /// Integer decimation factor `native / target`.
    pub fn decimation_ratio(&self) -> Result<usize> {
        let (native, target) = (self.native_sample_rate, self.target_sample_rate);
        if target == 0 || native < target || native % target != 0 {
            return Err(BenderError::UnsupportedRatio { native, target });
        }
        Ok((native / target) as usize)
    }

    /// Upper bound on decimated samples one block can produce.
    pub fn max_decimated_block(&self) -> usize {
        let ratio = self.decimation_ratio().unwrap_or(1).max(1);
        self.block_length.div_ceil(ratio)
    }

    /// Wall-clock duration of one capture block at the native rate.
    pub fn block_duration(&self) -> Duration {
        nominal_duration(self.block_length as u64, self.native_sample_rate)
    }

    /// Wall-clock duration of one detector frame at the target rate.
    pub fn frame_duration(&self) -> Duration {
        nominal_duration(self.frame_length as u64, self.target_sample_rate)
    }
}

/// Duration of `samples` at `rate` Hz, exact to the nanosecond.
///
/// Whole seconds and the sub-second remainder are computed separately so the
/// nanosecond product stays below `rate * 1e9` for any sample count.
pub(crate) fn nominal_duration(samples: u64, rate: u32) -> Duration {
    let rate = u64::from(rate.max(1));
    Duration::from_secs(samples / rate)
        + Duration::from_nanos((samples % rate) * 1_000_000_000 / rate)
}
