//! `earshot` adapter: WebRTC-compatible GMM voice detection at 16 kHz.

use earshot::{VoiceActivityDetector as GmmDetector, VoiceActivityProfile};

use super::{check_frame, Aggressiveness, VadDecision, VoiceActivityDetector};
use crate::{
    buffering::Frame,
    config::accepted_frame_lengths,
    error::{BenderError, Result},
};

/// The only rate `earshot` classifies at.
pub const EARSHOT_SAMPLE_RATE: u32 = 16_000;

pub struct EarshotVad {
    detector: GmmDetector,
    frame_length: usize,
}

impl EarshotVad {
    /// # Errors
    /// `BenderError::UnsupportedSampleRate` for any rate but 16 kHz and
    /// `BenderError::UnsupportedFrameLength` for anything but 160/320/480.
    pub fn new(level: Aggressiveness, sample_rate: u32, frame_length: usize) -> Result<Self> {
        if sample_rate != EARSHOT_SAMPLE_RATE {
            return Err(BenderError::UnsupportedSampleRate(sample_rate));
        }
        if !accepted_frame_lengths(sample_rate).contains(&frame_length) {
            return Err(BenderError::UnsupportedFrameLength {
                frame_length,
                sample_rate,
            });
        }
        let profile = match level {
            Aggressiveness::Quality => VoiceActivityProfile::QUALITY,
            Aggressiveness::LowBitrate => VoiceActivityProfile::LBR,
            Aggressiveness::Aggressive => VoiceActivityProfile::AGGRESSIVE,
            Aggressiveness::VeryAggressive => VoiceActivityProfile::VERY_AGGRESSIVE,
        };
        Ok(Self {
            detector: GmmDetector::new(profile),
            frame_length,
        })
    }
}

impl VoiceActivityDetector for EarshotVad {
    fn classify(&mut self, frame: &Frame) -> Result<VadDecision> {
        check_frame(frame, EARSHOT_SAMPLE_RATE, self.frame_length)?;
        match self.detector.predict_16khz(&frame.samples) {
            Ok(true) => Ok(VadDecision::Speech),
            Ok(false) => Ok(VadDecision::Silence),
            Err(e) => Err(BenderError::Detector(format!("earshot: {e:?}"))),
        }
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "earshot_vad"
    }
}
