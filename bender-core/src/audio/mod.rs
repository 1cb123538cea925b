//! Capture source: fixed-size interleaved blocks delivered to a handler.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority and
//! is the pipeline's real-time context. The whole per-block path runs inside
//! it, so the callback **must not**:
//! - Allocate heap memory after the first block
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! `BlockFramer` re-slices whatever buffer size the host hands us into blocks
//! of exactly `block_length` frames using a single pre-allocated `AudioBlock`
//! that is lent to the handler by `&mut` for one processing pass.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). `AudioCapture` must be created and dropped on the same thread.

pub mod device;
pub mod file;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleRate, Stream, StreamConfig,
};
use serde::{Deserialize, Serialize};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info};

use crate::{
    config::{nominal_duration, PipelineConfig},
    error::{BenderError, Result},
};

/// Integer sample width delivered by the capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit (S16_LE).
    S16,
    /// Signed 32-bit (S32_LE).
    S32,
}

impl SampleFormat {
    pub fn bits(self) -> u32 {
        match self {
            SampleFormat::S16 => 16,
            SampleFormat::S32 => 32,
        }
    }

    /// Magnitude of full scale: `2^(bits - 1)`.
    pub fn full_scale(self) -> f64 {
        (1u64 << (self.bits() - 1)) as f64
    }

    pub fn min_value(self) -> i32 {
        match self {
            SampleFormat::S16 => i16::MIN as i32,
            SampleFormat::S32 => i32::MIN,
        }
    }

    pub fn max_value(self) -> i32 {
        match self {
            SampleFormat::S16 => i16::MAX as i32,
            SampleFormat::S32 => i32::MAX,
        }
    }

    /// Integer sample → normalized amplitude.
    #[inline]
    pub fn normalize(self, sample: i32) -> f64 {
        sample as f64 / self.full_scale()
    }

    /// Normalized amplitude → integer sample, saturating at the representable
    /// range instead of wrapping.
    #[inline]
    pub fn denormalize(self, value: f64) -> i32 {
        let scaled = (value * self.full_scale()).round();
        scaled.clamp(self.min_value() as f64, self.max_value() as f64) as i32
    }
}

/// One delivery from the capture source: interleaved integer samples.
///
/// The values of an `S16` block always fit in `i16`; both widths share `i32`
/// storage so one block type serves every format.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    /// Interleaved samples, `frames() * channels` long.
    pub samples: Vec<i32>,
    pub channels: u16,
    pub sample_rate: u32,
    pub format: SampleFormat,
    /// When the last sample of the block arrived.
    pub captured_at: Instant,
}

impl AudioBlock {
    pub fn new(samples: Vec<i32>, channels: u16, sample_rate: u32, format: SampleFormat) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            format,
            captured_at: Instant::now(),
        }
    }

    /// An all-zero block of `frames` frames.
    pub fn silent(frames: usize, channels: u16, sample_rate: u32, format: SampleFormat) -> Self {
        Self::new(
            vec![0; frames * channels as usize],
            channels,
            sample_rate,
            format,
        )
    }

    /// An empty block with room for `frames` frames, for reuse across arrivals.
    pub fn with_capacity(
        frames: usize,
        channels: u16,
        sample_rate: u32,
        format: SampleFormat,
    ) -> Self {
        Self::new(
            Vec::with_capacity(frames * channels as usize),
            channels,
            sample_rate,
            format,
        )
    }

    /// Frames (samples per channel) in the block.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nominal duration of the block at its sample rate.
    pub fn duration(&self) -> Duration {
        nominal_duration(self.frames() as u64, self.sample_rate)
    }

    /// Verify the block matches the configured stream shape.
    ///
    /// # Errors
    /// Returns `BenderError::BlockShape` on a channel, rate, or format
    /// mismatch, a ragged interleave, or more than `block_length` frames.
    pub fn check_shape(&self, config: &PipelineConfig) -> Result<()> {
        if self.channels != config.channels {
            return Err(BenderError::BlockShape(format!(
                "expected {} channels, got {}",
                config.channels, self.channels
            )));
        }
        if self.sample_rate != config.native_sample_rate {
            return Err(BenderError::BlockShape(format!(
                "expected {} Hz, got {} Hz",
                config.native_sample_rate, self.sample_rate
            )));
        }
        if self.format != config.sample_format {
            return Err(BenderError::BlockShape(format!(
                "expected {:?} samples, got {:?}",
                config.sample_format, self.format
            )));
        }
        if self.samples.len() % self.channels as usize != 0 {
            return Err(BenderError::BlockShape(format!(
                "{} samples do not divide into {} channels",
                self.samples.len(),
                self.channels
            )));
        }
        if self.frames() > config.block_length {
            return Err(BenderError::BlockShape(format!(
                "{} frames exceed the block length of {}",
                self.frames(),
                config.block_length
            )));
        }
        Ok(())
    }
}

/// Requested capture stream parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureParams {
    /// Device name; `None` selects the default input.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub block_length: usize,
}

impl CaptureParams {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            device: config.device.clone(),
            sample_rate: config.native_sample_rate,
            channels: config.channels,
            format: config.sample_format,
            block_length: config.block_length,
        }
    }
}

/// Re-slices arbitrary interleaved host buffers into fixed-size blocks.
///
/// Holds one `AudioBlock` whose capacity is reserved up front; after each
/// delivery the block is cleared, never reallocated.
pub struct BlockFramer {
    block: AudioBlock,
    block_samples: usize,
}

impl BlockFramer {
    pub fn new(params: &CaptureParams) -> Self {
        Self {
            block: AudioBlock::with_capacity(
                params.block_length,
                params.channels,
                params.sample_rate,
                params.format,
            ),
            block_samples: params.block_length * params.channels as usize,
        }
    }

    /// Append interleaved host samples, invoking `handler` once per completed
    /// block. Returns the number of blocks delivered.
    pub fn push<T, H>(&mut self, data: &[T], handler: &mut H) -> usize
    where
        T: Copy + Into<i32>,
        H: FnMut(&mut AudioBlock),
    {
        let mut delivered = 0;
        let mut rest = data;
        while !rest.is_empty() {
            let room = self.block_samples - self.block.samples.len();
            let take = room.min(rest.len());
            self.block
                .samples
                .extend(rest[..take].iter().map(|&s| s.into()));
            rest = &rest[take..];

            if self.block.samples.len() == self.block_samples {
                self.deliver(handler);
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver whatever is buffered as a final short block (stream end).
    /// Returns `true` if a block was delivered.
    pub fn flush<H>(&mut self, handler: &mut H) -> bool
    where
        H: FnMut(&mut AudioBlock),
    {
        let channels = self.block.channels as usize;
        let whole = self.block.samples.len() - self.block.samples.len() % channels;
        self.block.samples.truncate(whole);
        if self.block.samples.is_empty() {
            return false;
        }
        self.deliver(handler);
        true
    }

    /// Samples buffered toward the next block.
    pub fn pending(&self) -> usize {
        self.block.samples.len()
    }

    fn deliver<H>(&mut self, handler: &mut H)
    where
        H: FnMut(&mut AudioBlock),
    {
        self.block.captured_at = Instant::now();
        handler(&mut self.block);
        self.block.samples.clear();
    }
}

/// Handle to an active capture stream.
///
/// **Not `Send`**: `cpal::Stream` is bound to its creation thread on
/// Windows/macOS. Create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Shared flag; set to `false` to make the callback discard input.
    running: Arc<AtomicBool>,
    pub params: CaptureParams,
}

impl AudioCapture {
    /// Stop: signal the callback to discard input on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stop and release the device. Returns once the host has torn the stream
    /// down, after which the handler is never invoked again.
    pub fn close(self) {
        self.stop();
        drop(self);
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioCapture {
    /// Open the requested device with exactly the requested rate, channel
    /// count and sample format, delivering blocks of `block_length` frames to
    /// `handler` on the audio thread.
    ///
    /// # Errors
    /// `BenderError::NoDefaultInputDevice` / `BenderError::AudioDevice` when the
    /// device is missing or cannot provide the requested configuration, and
    /// `BenderError::AudioStream` if cpal fails to build or start the stream.
    pub fn open<H>(params: CaptureParams, running: Arc<AtomicBool>, handler: H) -> Result<Self>
    where
        H: FnMut(&mut AudioBlock) + Send + 'static,
    {
        let device = device::resolve_input_device(params.device.as_deref())?;

        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate = params.sample_rate,
            channels = params.channels,
            format = ?params.format,
            block_length = params.block_length,
            "opening input device"
        );

        let wanted = match params.format {
            SampleFormat::S16 => cpal::SampleFormat::I16,
            SampleFormat::S32 => cpal::SampleFormat::I32,
        };
        let rate = SampleRate(params.sample_rate);
        let supported = device
            .supported_input_configs()
            .map_err(|e| BenderError::AudioDevice(e.to_string()))?
            .any(|range| {
                range.channels() == params.channels
                    && range.sample_format() == wanted
                    && range.min_sample_rate() <= rate
                    && range.max_sample_rate() >= rate
            });
        if !supported {
            return Err(BenderError::AudioDevice(format!(
                "device cannot capture {} ch {:?} at {} Hz",
                params.channels, params.format, params.sample_rate
            )));
        }

        let config = StreamConfig {
            channels: params.channels,
            sample_rate: rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let framer = BlockFramer::new(&params);
        let stream = match params.format {
            SampleFormat::S16 => {
                build_stream::<i16, H>(&device, &config, framer, Arc::clone(&running), handler)
            }
            SampleFormat::S32 => {
                build_stream::<i32, H>(&device, &config, framer, Arc::clone(&running), handler)
            }
        }?;

        stream
            .play()
            .map_err(|e| BenderError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            params,
        })
    }
}

#[cfg(feature = "audio-cpal")]
fn build_stream<T, H>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut framer: BlockFramer,
    running: Arc<AtomicBool>,
    mut handler: H,
) -> Result<Stream>
where
    T: cpal::SizedSample + Into<i32>,
    H: FnMut(&mut AudioBlock) + Send + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Acquire) {
                    return;
                }
                framer.push(data, &mut handler);
            },
            |err| error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| BenderError::AudioStream(e.to_string()))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl AudioCapture {
    pub fn open<H>(_params: CaptureParams, _running: Arc<AtomicBool>, _handler: H) -> Result<Self>
    where
        H: FnMut(&mut AudioBlock) + Send + 'static,
    {
        Err(BenderError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(block_length: usize, channels: u16) -> CaptureParams {
        CaptureParams {
            device: None,
            sample_rate: 48_000,
            channels,
            format: SampleFormat::S16,
            block_length,
        }
    }

    #[cfg(not(feature = "audio-cpal"))]
    #[test]
    fn open_without_cpal_is_a_stream_error() {
        let running = Arc::new(AtomicBool::new(true));
        let result = AudioCapture::open(params(1024, 2), Arc::clone(&running), |_| {});
        assert!(matches!(result, Err(BenderError::AudioStream(_))));
    }

    #[test]
    fn denormalize_saturates_instead_of_wrapping() {
        assert_eq!(SampleFormat::S16.denormalize(1.5), i16::MAX as i32);
        assert_eq!(SampleFormat::S16.denormalize(-1.5), i16::MIN as i32);
        assert_eq!(SampleFormat::S32.denormalize(1.0), i32::MAX);
        assert_eq!(SampleFormat::S32.denormalize(-1.0), i32::MIN);
    }

    #[test]
    fn normalize_round_trips_integers() {
        for s in [-32768, -1, 0, 1, 12345, 32767] {
            let f = SampleFormat::S16;
            assert_eq!(f.denormalize(f.normalize(s)), s);
        }
        for s in [i32::MIN, -7, 0, 7, i32::MAX] {
            let f = SampleFormat::S32;
            assert_eq!(f.denormalize(f.normalize(s)), s);
        }
    }

    #[test]
    fn framer_emits_fixed_blocks_from_ragged_host_buffers() {
        let mut framer = BlockFramer::new(&params(4, 2));
        let mut sizes = Vec::new();
        let mut firsts = Vec::new();
        let mut handler = |b: &mut AudioBlock| {
            sizes.push(b.frames());
            firsts.push(b.samples[0]);
        };

        let data: Vec<i16> = (0..20).collect();
        assert_eq!(framer.push(&data[..3], &mut handler), 0);
        assert_eq!(framer.push(&data[3..13], &mut handler), 1);
        assert_eq!(framer.push(&data[13..20], &mut handler), 1);
        assert_eq!(framer.pending(), 4);
        assert!(framer.flush(&mut handler));
        assert!(!framer.flush(&mut handler));

        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(firsts, vec![0, 8, 16]);
    }

    #[test]
    fn framer_reuses_block_allocation() {
        let mut framer = BlockFramer::new(&params(256, 1));
        let mut ptrs = Vec::new();
        let mut handler = |b: &mut AudioBlock| ptrs.push(b.samples.as_ptr() as usize);
        framer.push(&vec![1i32; 1024], &mut handler);
        assert_eq!(ptrs.len(), 4);
        assert!(ptrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn check_shape_rejects_mismatches() {
        let cfg = PipelineConfig::default();
        let ok = AudioBlock::silent(1024, 2, 48_000, SampleFormat::S32);
        assert!(ok.check_shape(&cfg).is_ok());

        let wrong_channels = AudioBlock::silent(1024, 1, 48_000, SampleFormat::S32);
        assert!(matches!(
            wrong_channels.check_shape(&cfg),
            Err(BenderError::BlockShape(_))
        ));

        let too_long = AudioBlock::silent(1025, 2, 48_000, SampleFormat::S32);
        assert!(too_long.check_shape(&cfg).is_err());

        let mut ragged = AudioBlock::silent(10, 2, 48_000, SampleFormat::S32);
        ragged.samples.push(0);
        assert!(ragged.check_shape(&cfg).is_err());

        let wrong_rate = AudioBlock::silent(1024, 2, 44_100, SampleFormat::S32);
        assert!(wrong_rate.check_shape(&cfg).is_err());
    }
}
