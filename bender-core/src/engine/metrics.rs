//! Running pipeline counters shared between the capture callback and the
//! publisher thread.
//!
//! The callback writes through `record*`; everyone else reads a copy through
//! `snapshot()`. The mutex is only ever held for a handful of field updates,
//! so the callback never waits on a reader for longer than a struct copy.

use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Weight of the newest sample in the smoothed latency.
pub const LATENCY_SMOOTHING: f64 = 0.1;

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Blocks that made it through every stage.
    pub blocks_processed: u64,
    /// Frames decided, including non-speech stand-ins for dropped blocks.
    pub frames_total: u64,
    pub frames_speech: u64,
    /// Exponentially smoothed per-block processing time.
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Blocks discarded after a transient fault.
    pub blocks_dropped: u64,
    /// Blocks whose processing took longer than their own duration.
    pub overruns: u64,
    /// Decisions lost because the publisher queue was full.
    pub decisions_dropped: u64,
}

impl Metrics {
    /// Share of decided frames flagged as speech, in percent.
    pub fn voice_ratio(&self) -> f64 {
        if self.frames_total == 0 {
            0.0
        } else {
            self.frames_speech as f64 / self.frames_total as f64 * 100.0
        }
    }

    /// The first block seeds the smoothed latency; later blocks, processed or
    /// dropped, blend in at `LATENCY_SMOOTHING`.
    fn observe_latency(&mut self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.avg_latency_ms = if self.blocks_processed + self.blocks_dropped == 0 {
            ms
        } else {
            self.avg_latency_ms * (1.0 - LATENCY_SMOOTHING) + ms * LATENCY_SMOOTHING
        };
        self.max_latency_ms = self.max_latency_ms.max(ms);
    }
}

#[derive(Debug, Default)]
pub struct MetricsAggregator {
    inner: Mutex<Metrics>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one fully processed block.
    pub fn record(&self, elapsed: Duration, frames: u64, speech_frames: u64) {
        let mut m = self.inner.lock();
        m.observe_latency(elapsed);
        m.blocks_processed += 1;
        m.frames_total += frames;
        m.frames_speech += speech_frames;
    }

    /// Account for a block dropped after a fault. `frames` includes the
    /// non-speech stand-ins; `speech_frames` only counts decisions already
    /// made before the fault. The time spent on it still feeds the latency
    /// figures.
    pub fn record_dropped_block(&self, elapsed: Duration, frames: u64, speech_frames: u64) {
        let mut m = self.inner.lock();
        m.observe_latency(elapsed);
        m.blocks_dropped += 1;
        m.frames_total += frames;
        m.frames_speech += speech_frames;
    }

    /// Account for the padded frame decided at shutdown.
    pub fn record_residual(&self, speech: bool) {
        let mut m = self.inner.lock();
        m.frames_total += 1;
        m.frames_speech += u64::from(speech);
    }

    pub fn record_overrun(&self) {
        self.inner.lock().overruns += 1;
    }

    pub fn record_dropped_decisions(&self, count: u64) {
        if count > 0 {
            self.inner.lock().decisions_dropped += count;
        }
    }

    /// Copy of the current counters. Safe to call from any thread.
    pub fn snapshot(&self) -> Metrics {
        *self.inner.lock()
    }

    /// Zero every counter. Only called when a pipeline is (re)started.
    pub fn reset(&self) {
        *self.inner.lock() = Metrics::default();
    }
}
