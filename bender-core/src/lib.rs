//! # bender-core
//!
//! Real-time voice activity pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture (cpal callback, fixed blocks)
//!                  │
//!                  ▼  everything below runs inside the callback
//!            FilterChain (high-pass + limiter)
//!                  │
//!            RateConverter (anti-alias low-pass + decimation → mono i16)
//!                  │
//!            FrameAssembler (ring buffer → 10/20/30 ms frames)
//!                  │
//!            Detector::classify → Decision ──try_send──► PublisherWorker
//!                  │                                        (own thread)
//!            MetricsAggregator ◄──────── snapshot() ─────────────┘
//! ```
//!
//! The callback does not allocate after the first block, never blocks on a
//! lock held by another thread, and never panics.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod ipc;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{file::WavSource, AudioBlock, SampleFormat};
pub use config::{PipelineConfig, PublisherConfig};
pub use engine::{
    metrics::{Metrics, MetricsAggregator},
    pipeline::{BlockOutcome, Pipeline},
    Engine,
};
pub use error::{BenderError, Result};
pub use ipc::events::{DecisionEvent, EngineStatus, EngineStatusEvent, MetricsEvent};
pub use vad::{Aggressiveness, Decision, Detector, DetectorKind, VadDecision, VoiceActivityDetector};
