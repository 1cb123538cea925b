//! Fixed-duration detector frame handed from the assembler to the detector.

use std::time::Duration;

use crate::config::nominal_duration;

/// Exactly `frame_length` mono i16 samples at the target rate.
///
/// The assembler owns a single `Frame` and refills it for every emission, so
/// no allocation happens per frame on the real-time path.
#[derive(Debug, Clone)]
pub struct Frame {
    pub samples: Vec<i16>,
    /// Position of this frame in the stream, starting at 0.
    pub index: u64,
    /// Sample rate in Hz (e.g. 16000).
    pub sample_rate: u32,
    /// `true` only for the zero-padded final frame emitted at shutdown.
    pub padded: bool,
}

impl Frame {
    pub fn new(samples: Vec<i16>, index: u64, sample_rate: u32) -> Self {
        Self {
            samples,
            index,
            sample_rate,
            padded: false,
        }
    }

    /// All-zero frame of `len` samples.
    pub fn zeroed(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0; len], 0, sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nominal start of this frame relative to the start of the stream.
    pub fn timestamp(&self) -> Duration {
        let offset = (self.samples.len() as u64).saturating_mul(self.index);
        nominal_duration(offset, self.sample_rate)
    }

    /// Returns the duration of this frame.
    pub fn duration(&self) -> Duration {
        nominal_duration(self.samples.len() as u64, self.sample_rate)
    }
}
