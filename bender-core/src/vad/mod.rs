//! Voice Activity Detection (VAD).
//!
//! The `VoiceActivityDetector` trait is the seam between frame assembly and
//! classification. The pipeline is generic over it, and the configured
//! backend is picked through the closed `Detector` enum, so the real-time
//! path never goes through a vtable.

pub mod energy;

#[cfg(feature = "vad-earshot")]
pub mod earshot;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    buffering::Frame,
    config::{accepted_frame_lengths, PipelineConfig},
    error::{BenderError, Result},
};

pub use energy::EnergyVad;

#[cfg(feature = "vad-earshot")]
pub use self::earshot::EarshotVad;

/// Whether a given audio frame contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadDecision {
    /// The frame contains speech.
    Speech,
    /// The frame is silent or non-speech noise.
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Per-frame decision forwarded to the metrics and the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub vad: VadDecision,
    /// Stream position of the frame, starting at 0.
    pub frame_index: u64,
    /// Nominal start of the frame relative to pipeline start.
    pub timestamp: Duration,
    /// `true` when the frame was never classified because its source block
    /// was dropped; such frames are always `Silence`.
    pub assumed: bool,
}

impl Decision {
    pub fn classified(vad: VadDecision, frame: &Frame) -> Self {
        Self {
            vad,
            frame_index: frame.index,
            timestamp: frame.timestamp(),
            assumed: false,
        }
    }

    /// Non-speech stand-in for a frame whose block faulted.
    pub fn assumed_silence(frame: &Frame) -> Self {
        Self {
            vad: VadDecision::Silence,
            frame_index: frame.index,
            timestamp: frame.timestamp(),
            assumed: true,
        }
    }

    pub fn is_speech(&self) -> bool {
        self.vad.is_speech()
    }
}

/// Ordinal strictness knob: higher levels miss more quiet speech but raise
/// fewer false triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Aggressiveness {
    Quality = 0,
    LowBitrate = 1,
    Aggressive = 2,
    VeryAggressive = 3,
}

impl Aggressiveness {
    pub const ALL: [Aggressiveness; 4] = [
        Aggressiveness::Quality,
        Aggressiveness::LowBitrate,
        Aggressiveness::Aggressive,
        Aggressiveness::VeryAggressive,
    ];

    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Aggressiveness {
    type Error = BenderError;

    fn try_from(level: u8) -> Result<Self> {
        Aggressiveness::ALL
            .get(level as usize)
            .copied()
            .ok_or_else(|| BenderError::Config(format!("aggressiveness {level} is outside 0..=3")))
    }
}

/// Which classifier backs the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// WebRTC-compatible GMM detector (`earshot`), 16 kHz only.
    Earshot,
    /// Frame energy in dBFS against a per-aggressiveness floor.
    Energy,
}

impl Default for DetectorKind {
    fn default() -> Self {
        if cfg!(feature = "vad-earshot") {
            DetectorKind::Earshot
        } else {
            DetectorKind::Energy
        }
    }
}

/// Trait for all VAD implementations.
pub trait VoiceActivityDetector: Send + 'static {
    /// Classify one frame.
    ///
    /// # Errors
    /// `BenderError::FrameLength` when the frame is not one of the accepted
    /// window sizes (an assembler contract violation), or
    /// `BenderError::Detector` if the backend itself fails.
    fn classify(&mut self, frame: &Frame) -> Result<VadDecision>;

    /// Reset any internal state. Only called on pipeline restart.
    fn reset(&mut self);

    fn name(&self) -> &'static str;
}

/// Reject frames whose rate or length the detector was not built for.
pub(crate) fn check_frame(frame: &Frame, sample_rate: u32, expected: usize) -> Result<()> {
    if frame.sample_rate != sample_rate
        || frame.len() != expected
        || !accepted_frame_lengths(sample_rate).contains(&frame.len())
    {
        return Err(BenderError::FrameLength {
            expected,
            actual: frame.len(),
        });
    }
    Ok(())
}

/// The configured detector backend.
pub enum Detector {
    #[cfg(feature = "vad-earshot")]
    Earshot(EarshotVad),
    Energy(EnergyVad),
}

impl Detector {
    /// Build the backend named by `config.detector`.
    ///
    /// # Errors
    /// Configuration errors for an unsupported rate, frame length or level.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let level = Aggressiveness::try_from(config.aggressiveness)?;
        match config.detector {
            #[cfg(feature = "vad-earshot")]
            DetectorKind::Earshot => Ok(Detector::Earshot(EarshotVad::new(
                level,
                config.target_sample_rate,
                config.frame_length,
            )?)),
            #[cfg(not(feature = "vad-earshot"))]
            DetectorKind::Earshot => Err(BenderError::Config(
                "earshot detector requested but compiled without `vad-earshot`".into(),
            )),
            DetectorKind::Energy => Ok(Detector::Energy(EnergyVad::new(
                level,
                config.target_sample_rate,
                config.frame_length,
            )?)),
        }
    }
}

impl VoiceActivityDetector for Detector {
    fn classify(&mut self, frame: &Frame) -> Result<VadDecision> {
        match self {
            #[cfg(feature = "vad-earshot")]
            Detector::Earshot(vad) => vad.classify(frame),
            Detector::Energy(vad) => vad.classify(frame),
        }
    }

    fn reset(&mut self) {
        match self {
            #[cfg(feature = "vad-earshot")]
            Detector::Earshot(vad) => vad.reset(),
            Detector::Energy(vad) => vad.reset(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "vad-earshot")]
            Detector::Earshot(vad) => vad.name(),
            Detector::Energy(vad) => vad.name(),
        }
    }
}
