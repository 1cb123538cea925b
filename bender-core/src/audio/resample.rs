//! Anti-alias low-pass + integer decimation to the detector rate.
//!
//! ## Design
//!
//! Capture runs at the hardware's native rate (48 kHz on the I²S HAT); the
//! detector wants 8/16/32 kHz mono i16. `RateConverter` only supports integer
//! ratios, so conversion is: 6th-order Butterworth low-pass at the target
//! Nyquist on every channel, keep every `ratio`-th frame, average channels,
//! narrow to 16 bits with saturation.
//!
//! Every input frame runs through the low-pass, kept or not, and the
//! decimation phase is a counter mod `ratio` carried across calls. Splitting
//! a stream into blocks of any size therefore produces exactly the samples a
//! single call over the whole stream would.
//!
//! When native rate == target rate the converter is a passthrough: no filter
//! is designed and frames are only mixed down and narrowed.

use tracing::info;

use crate::{
    audio::{AudioBlock, SampleFormat},
    config::PipelineConfig,
    error::Result,
    filter::biquad::{butterworth, Response, SosFilter},
};

/// Order of the anti-alias low-pass.
pub const ANTIALIAS_ORDER: usize = 6;

/// Converts interleaved native-rate blocks to mono i16 at the target rate.
#[derive(Debug, Clone)]
pub struct RateConverter {
    /// `None` when native rate == target rate (passthrough mode).
    lowpass: Option<SosFilter>,
    ratio: usize,
    /// Position of the next input frame within the decimation period; the
    /// frame is kept when this is zero.
    phase: usize,
    channels: usize,
}

impl RateConverter {
    /// Create a converter for `config`.
    ///
    /// # Errors
    /// `BenderError::UnsupportedRatio` when the native rate is not an integer
    /// multiple of the target rate.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let ratio = config.decimation_ratio()?;
        let channels = config.channels as usize;

        if ratio == 1 {
            return Ok(Self {
                lowpass: None,
                ratio,
                phase: 0,
                channels,
            });
        }

        let sections = butterworth(
            ANTIALIAS_ORDER,
            Response::LowPass,
            config.target_sample_rate as f64 / 2.0,
            config.native_sample_rate,
        )?;

        info!(
            native_rate = config.native_sample_rate,
            target_rate = config.target_sample_rate,
            ratio,
            "resampling enabled from={} to={}",
            config.native_sample_rate,
            config.target_sample_rate
        );

        Ok(Self {
            lowpass: Some(SosFilter::new(sections, channels)),
            ratio,
            phase: 0,
            channels,
        })
    }

    /// Low-pass, decimate, mix down and narrow `block`, appending the output
    /// to `out`. Returns the number of samples appended.
    ///
    /// `out` should have spare capacity for `output_len(block.frames())`
    /// samples so the real-time path never reallocates.
    pub fn downsample_into(&mut self, block: &AudioBlock, out: &mut Vec<i16>) -> usize {
        let format = block.format;
        let before = out.len();
        let inv_channels = 1.0 / self.channels as f64;

        for frame in block.samples.chunks_exact(self.channels) {
            let keep = self.phase == 0;
            let mut sum = 0.0;
            for (ch, &sample) in frame.iter().enumerate() {
                let x = format.normalize(sample);
                let y = match self.lowpass.as_mut() {
                    Some(lp) => lp.process(ch, x),
                    None => x,
                };
                sum += y;
            }
            if keep {
                out.push(narrow(sum * inv_channels));
            }
            self.phase = (self.phase + 1) % self.ratio;
        }

        out.len() - before
    }

    /// Allocating convenience wrapper around `downsample_into`.
    pub fn downsample(&mut self, block: &AudioBlock) -> Vec<i16> {
        let mut out = Vec::with_capacity(self.output_len(block.frames()));
        self.downsample_into(block, &mut out);
        out
    }

    /// How many samples the next `frames` input frames will produce at the
    /// current phase.
    pub fn output_len(&self, frames: usize) -> usize {
        let first = (self.ratio - self.phase) % self.ratio;
        if first >= frames {
            0
        } else {
            (frames - 1 - first) / self.ratio + 1
        }
    }

    /// Advance the decimation phase over `frames` input frames without
    /// filtering them, for a dropped block. Returns the samples the block
    /// would have produced.
    pub fn skip(&mut self, frames: usize) -> usize {
        let produced = self.output_len(frames);
        self.phase = (self.phase + frames) % self.ratio;
        produced
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }

    pub fn phase(&self) -> usize {
        self.phase
    }

    /// Returns `true` when native rate == target rate (no filtering occurs).
    pub fn is_passthrough(&self) -> bool {
        self.lowpass.is_none()
    }

    /// Sum of squared low-pass history values.
    pub fn state_energy(&self) -> f64 {
        self.lowpass.as_ref().map_or(0.0, SosFilter::state_energy)
    }

    /// Clear filter history and phase. Only valid on pipeline restart.
    pub fn reset(&mut self) {
        if let Some(lp) = self.lowpass.as_mut() {
            lp.reset();
        }
        self.phase = 0;
    }
}

#[inline]
fn narrow(value: f64) -> i16 {
    SampleFormat::S16.denormalize(value) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(native: u32, target: u32, channels: u16) -> PipelineConfig {
        PipelineConfig {
            native_sample_rate: native,
            target_sample_rate: target,
            channels,
            ..PipelineConfig::default()
        }
    }

    fn tone_block(start: usize, frames: usize, freq: f64, amp: f64, channels: u16) -> AudioBlock {
        let samples = (start..start + frames)
            .flat_map(|n| {
                let v = amp * (2.0 * std::f64::consts::PI * freq * n as f64 / 48_000.0).sin();
                let s = SampleFormat::S32.denormalize(v);
                std::iter::repeat(s).take(channels as usize)
            })
            .collect();
        AudioBlock::new(samples, channels, 48_000, SampleFormat::S32)
    }

    #[test]
    fn silence_stays_silent_for_every_integer_ratio() {
        for target in [8_000, 16_000, 24_000, 48_000] {
            let mut rc = RateConverter::new(&config(48_000, target, 2)).unwrap();
            let ratio = rc.ratio();
            let mut total = 0;
            for _ in 0..5 {
                let out = rc.downsample(&AudioBlock::silent(1024, 2, 48_000, SampleFormat::S32));
                assert!(out.iter().all(|&s| s == 0), "ratio {ratio}");
                let lo = 1024 / ratio;
                assert!(out.len() == lo || out.len() == lo + 1, "ratio {ratio}: {}", out.len());
                total += out.len();
                assert_eq!(rc.state_energy(), 0.0);
            }
            assert_eq!(total, (5 * 1024usize).div_ceil(ratio));
        }
    }

    #[test]
    fn phase_carries_across_blocks() {
        let mut rc = RateConverter::new(&config(48_000, 16_000, 1)).unwrap();
        let block = AudioBlock::silent(1024, 1, 48_000, SampleFormat::S32);
        assert_eq!(rc.downsample(&block).len(), 342);
        assert_eq!(rc.phase(), 1);
        assert_eq!(rc.downsample(&block).len(), 341);
        assert_eq!(rc.phase(), 2);
        assert_eq!(rc.downsample(&block).len(), 341);
        assert_eq!(rc.phase(), 0);
    }

    #[test]
    fn block_split_matches_single_pass() {
        let whole = tone_block(0, 3000, 440.0, 0.5, 2);
        let mut single = RateConverter::new(&config(48_000, 16_000, 2)).unwrap();
        let expected = single.downsample(&whole);

        let mut split = RateConverter::new(&config(48_000, 16_000, 2)).unwrap();
        let mut got = Vec::new();
        let mut start = 0;
        for len in [1, 2, 1024, 7, 500, 1466] {
            let block = tone_block(start, len, 440.0, 0.5, 2);
            let before = split.output_len(len);
            let n = split.downsample_into(&block, &mut got);
            assert_eq!(n, before);
            start += len;
        }
        assert_eq!(start, 3000);
        assert_eq!(got, expected);
    }

    #[test]
    fn passband_tone_survives_and_mixdown_averages() {
        let mut rc = RateConverter::new(&config(48_000, 16_000, 2)).unwrap();
        // Left carries a 500 Hz tone, right is silent → mono is half amplitude.
        let samples = (0..9600)
            .flat_map(|n| {
                let v = 0.8 * (2.0 * std::f64::consts::PI * 500.0 * n as f64 / 48_000.0).sin();
                [SampleFormat::S32.denormalize(v), 0]
            })
            .collect();
        let out = rc.downsample(&AudioBlock::new(samples, 2, 48_000, SampleFormat::S32));
        let peak = out[1600..].iter().map(|s| s.unsigned_abs()).max().unwrap() as f64;
        let expected = 0.4 * 32_768.0;
        assert!((peak / expected - 1.0).abs() < 0.02, "peak={peak}");
    }

    #[test]
    fn tone_above_target_nyquist_is_suppressed() {
        let mut rc = RateConverter::new(&config(48_000, 16_000, 1)).unwrap();
        // 15 kHz would alias to 1 kHz without the low-pass.
        let out = rc.downsample(&tone_block(0, 9600, 15_000.0, 0.9, 1));
        let peak = out[1600..].iter().map(|s| s.unsigned_abs()).max().unwrap() as f64;
        assert!(peak < 0.02 * 32_768.0, "aliased peak={peak}");
    }

    #[test]
    fn narrowing_saturates() {
        let cfg = PipelineConfig {
            native_sample_rate: 16_000,
            target_sample_rate: 16_000,
            channels: 1,
            ..PipelineConfig::default()
        };
        let mut rc = RateConverter::new(&cfg).unwrap();
        assert!(rc.is_passthrough());
        let block = AudioBlock::new(vec![i32::MAX, i32::MIN, 1 << 16], 1, 16_000, SampleFormat::S32);
        assert_eq!(rc.downsample(&block), vec![i16::MAX, i16::MIN, 1]);
    }

    #[test]
    fn skip_advances_phase_like_processing() {
        let mut a = RateConverter::new(&config(48_000, 16_000, 1)).unwrap();
        let mut b = a.clone();
        let block = AudioBlock::silent(1000, 1, 48_000, SampleFormat::S32);
        let produced = a.downsample(&block).len();
        assert_eq!(b.skip(1000), produced);
        assert_eq!(a.phase(), b.phase());
    }

    #[test]
    fn rejects_non_integer_ratio() {
        assert!(RateConverter::new(&config(44_100, 16_000, 2)).is_err());
    }
}
