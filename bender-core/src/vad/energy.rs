//! Energy-based VAD: frame RMS in dBFS against a per-aggressiveness floor.
//!
//! Stateless. Each frame is judged on its own, so the same input always
//! yields the same decisions regardless of what came before it.

use super::{check_frame, Aggressiveness, VadDecision, VoiceActivityDetector};
use crate::{
    buffering::Frame,
    config::accepted_frame_lengths,
    error::{BenderError, Result},
};

/// Speech floor in dBFS for each aggressiveness level.
const THRESHOLDS_DBFS: [f64; 4] = [-55.0, -48.0, -42.0, -36.0];

#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold_dbfs: f64,
    sample_rate: u32,
    frame_length: usize,
}

impl EnergyVad {
    /// # Errors
    /// `BenderError::UnsupportedFrameLength` if `frame_length` is not a 10, 20
    /// or 30 ms window at `sample_rate`.
    pub fn new(level: Aggressiveness, sample_rate: u32, frame_length: usize) -> Result<Self> {
        if !accepted_frame_lengths(sample_rate).contains(&frame_length) {
            return Err(BenderError::UnsupportedFrameLength {
                frame_length,
                sample_rate,
            });
        }
        Ok(Self {
            threshold_dbfs: THRESHOLDS_DBFS[level.level() as usize],
            sample_rate,
            frame_length,
        })
    }

    pub fn threshold_dbfs(&self) -> f64 {
        self.threshold_dbfs
    }

    /// RMS level of `samples` relative to i16 full scale. Silence is `-inf`.
    pub fn level_dbfs(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return f64::NEG_INFINITY;
        }
        let sum_sq: f64 = samples
            .iter()
            .map(|&s| {
                let x = s as f64 / 32_768.0;
                x * x
            })
            .sum();
        let rms = (sum_sq / samples.len() as f64).sqrt();
        20.0 * rms.log10()
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, frame: &Frame) -> Result<VadDecision> {
        check_frame(frame, self.sample_rate, self.frame_length)?;
        if Self::level_dbfs(&frame.samples) >= self.threshold_dbfs {
            Ok(VadDecision::Speech)
        } else {
            Ok(VadDecision::Silence)
        }
    }

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "energy_vad"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(len: usize, period: usize, amp: i16) -> Frame {
        let samples = (0..len)
            .map(|n| if (n / (period / 2)) % 2 == 0 { amp } else { -amp })
            .collect();
        Frame::new(samples, 0, 16_000)
    }

    #[test]
    fn silence_is_non_speech_at_every_level() {
        for level in Aggressiveness::ALL {
            let mut vad = EnergyVad::new(level, 16_000, 320).unwrap();
            assert_eq!(
                vad.classify(&Frame::zeroed(320, 16_000)).unwrap(),
                VadDecision::Silence,
                "{level:?}"
            );
        }
    }

    #[test]
    fn loud_square_wave_is_speech() {
        // ~300 Hz at 16 kHz.
        let frame = square(320, 54, i16::MAX);
        let mut vad = EnergyVad::new(Aggressiveness::Quality, 16_000, 320).unwrap();
        assert_eq!(vad.classify(&frame).unwrap(), VadDecision::Speech);
        let mut strict = EnergyVad::new(Aggressiveness::VeryAggressive, 16_000, 320).unwrap();
        assert_eq!(strict.classify(&frame).unwrap(), VadDecision::Speech);
    }

    #[test]
    fn quiet_frame_only_passes_lenient_levels() {
        // Square at amplitude 100 sits near -50 dBFS.
        let frame = square(320, 54, 100);
        let level = EnergyVad::level_dbfs(&frame.samples);
        assert!((level - (-50.3)).abs() < 0.1, "level={level}");
        let mut lenient = EnergyVad::new(Aggressiveness::Quality, 16_000, 320).unwrap();
        let mut strict = EnergyVad::new(Aggressiveness::Aggressive, 16_000, 320).unwrap();
        assert!(lenient.classify(&frame).unwrap().is_speech());
        assert!(!strict.classify(&frame).unwrap().is_speech());
    }

    #[test]
    fn repeated_input_gives_repeated_decisions() {
        let mut vad = EnergyVad::new(Aggressiveness::Aggressive, 16_000, 320).unwrap();
        let loud = square(320, 54, 20_000);
        let quiet = Frame::zeroed(320, 16_000);
        let first: Vec<_> = [&loud, &quiet, &loud]
            .iter()
            .map(|f| vad.classify(f).unwrap())
            .collect();
        let second: Vec<_> = [&loud, &quiet, &loud]
            .iter()
            .map(|f| vad.classify(f).unwrap())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn wrong_frame_length_is_rejected() {
        let mut vad = EnergyVad::new(Aggressiveness::Quality, 16_000, 320).unwrap();
        let err = vad.classify(&Frame::zeroed(160, 16_000)).unwrap_err();
        assert!(matches!(err, BenderError::FrameLength { expected: 320, actual: 160 }));
        assert!(EnergyVad::new(Aggressiveness::Quality, 16_000, 321).is_err());
    }
}
