use thiserror::Error;

/// All errors produced by bender-core.
#[derive(Debug, Error)]
pub enum BenderError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("native rate {native} Hz is not an integer multiple of target rate {target} Hz")]
    UnsupportedRatio { native: u32, target: u32 },

    #[error("frame length {frame_length} is not a 10/20/30 ms window at {sample_rate} Hz")]
    UnsupportedFrameLength {
        frame_length: usize,
        sample_rate: u32,
    },

    #[error("target sample rate {0} Hz is not supported by the voice detector")]
    UnsupportedSampleRate(u32),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("malformed audio block: {0}")]
    BlockShape(String),

    #[error("frame buffer overflow: pushing {pushed} samples exceeds the per-block bound of {bound}")]
    FrameOverflow { pushed: usize, bound: usize },

    #[error("frame of {actual} samples does not match the detector window of {expected}")]
    FrameLength { expected: usize, actual: usize },

    #[error("voice detector error: {0}")]
    Detector(String),

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline is not running")]
    NotRunning,

    #[error("publish error: {0}")]
    Publish(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BenderError {
    /// Configuration-class errors (including device open failures) that must
    /// stop the pipeline from starting.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            BenderError::Config(_)
                | BenderError::UnsupportedRatio { .. }
                | BenderError::UnsupportedFrameLength { .. }
                | BenderError::UnsupportedSampleRate(_)
                | BenderError::AudioDevice(_)
                | BenderError::AudioStream(_)
                | BenderError::NoDefaultInputDevice
        )
    }
}

pub type Result<T> = std::result::Result<T, BenderError>;
