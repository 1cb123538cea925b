//! Per-block processing context, driven from the capture callback.
//!
//! ## Stages (per block, fixed order)
//!
//! ```text
//! 1. Shape check against the pipeline config
//! 2. FilterChain::apply            (high-pass + limiter, in place)
//! 3. RateConverter::downsample_into (anti-alias + decimate + mixdown)
//! 4. FrameAssembler::push          (0..n complete frames)
//! 5. Detector::classify per frame  → Decision → try_send to the publisher
//! 6. MetricsAggregator::record     (+ overrun check against block duration)
//! ```
//!
//! Everything here runs on the real-time thread. The only allocations are
//! done in `new`; the mono scratch buffer and the assembler's frame are
//! reused for every block.
//!
//! A block that faults is dropped without stopping the stream. Its frames
//! are still accounted for: the resampler phase is advanced as if the block
//! had been processed and zeros are fed to the assembler, so every frame the
//! block would have completed gets a non-speech decision and later frames
//! keep their stream position.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::{
    audio::{resample::RateConverter, AudioBlock},
    buffering::FrameAssembler,
    config::PipelineConfig,
    engine::metrics::MetricsAggregator,
    error::{BenderError, Result},
    filter::FilterChain,
    vad::{Decision, Detector, VoiceActivityDetector},
};

/// Result of one `process_block` call.
#[derive(Debug)]
pub struct BlockOutcome {
    /// Frames decided for this block, stand-ins included.
    pub frames: u64,
    pub speech_frames: u64,
    pub elapsed: Duration,
    /// Processing took longer than the block's own duration.
    pub overrun: bool,
    /// The fault that caused this block to be dropped.
    pub fault: Option<BenderError>,
}

impl BlockOutcome {
    pub fn is_dropped(&self) -> bool {
        self.fault.is_some()
    }
}

/// Decisions made while handling one block.
#[derive(Debug, Default)]
struct Tally {
    frames: u64,
    speech: u64,
    unsent: u64,
}

impl Tally {
    fn add(&mut self, decision: Decision, tx: Option<&Sender<Decision>>) {
        self.frames += 1;
        if decision.is_speech() {
            self.speech += 1;
        }
        if let Some(tx) = tx {
            if tx.try_send(decision).is_err() {
                self.unsent += 1;
            }
        }
    }
}

/// Owns every stage's state for the lifetime of one pipeline run.
pub struct Pipeline<D = Detector> {
    config: PipelineConfig,
    filters: FilterChain,
    resampler: RateConverter,
    assembler: FrameAssembler,
    detector: D,
    /// Decimated mono scratch, sized for the largest block.
    mono: Vec<i16>,
    metrics: Arc<MetricsAggregator>,
    decisions: Option<Sender<Decision>>,
}

impl Pipeline<Detector> {
    /// Build the pipeline with the detector named in `config`.
    pub fn from_config(
        config: PipelineConfig,
        metrics: Arc<MetricsAggregator>,
        decisions: Option<Sender<Decision>>,
    ) -> Result<Self> {
        let detector = Detector::from_config(&config)?;
        Self::new(config, detector, metrics, decisions)
    }
}

impl<D: VoiceActivityDetector> Pipeline<D> {
    /// Validate `config` and build every stage.
    ///
    /// # Errors
    /// Any configuration error; the pipeline must not start in that case.
    pub fn new(
        config: PipelineConfig,
        detector: D,
        metrics: Arc<MetricsAggregator>,
        decisions: Option<Sender<Decision>>,
    ) -> Result<Self> {
        config.validate()?;
        let filters = FilterChain::new(&config)?;
        let resampler = RateConverter::new(&config)?;
        let assembler = FrameAssembler::from_config(&config)?;
        let mono = Vec::with_capacity(config.max_decimated_block());

        debug!(
            detector = detector.name(),
            ratio = resampler.ratio(),
            frame_length = config.frame_length,
            buffer_capacity = assembler.capacity(),
            "pipeline built"
        );

        Ok(Self {
            config,
            filters,
            resampler,
            assembler,
            detector,
            mono,
            metrics,
            decisions,
        })
    }

    /// Run one capture block through every stage.
    ///
    /// Never panics and never fails: faults are logged, the block is dropped
    /// and reported in the outcome.
    pub fn process_block(&mut self, block: &mut AudioBlock) -> BlockOutcome {
        let started = Instant::now();
        let mut tally = Tally::default();

        let result = match block.check_shape(&self.config) {
            Ok(()) => self.run_stages(block, &mut tally),
            Err(e) => {
                let frames = block.frames().min(self.config.block_length);
                self.fill_dropped(frames, &mut tally);
                Err(e)
            }
        };

        let elapsed = started.elapsed();
        // An empty block has no real-time budget to exceed.
        let overrun = block.frames() > 0 && elapsed > block.duration();

        let fault = match result {
            Ok(()) => {
                self.metrics.record(elapsed, tally.frames, tally.speech);
                None
            }
            Err(e) => {
                warn!(error = %e, frames = tally.frames, "dropping audio block");
                self.metrics.record_dropped_block(elapsed, tally.frames, tally.speech);
                Some(e)
            }
        };
        if overrun {
            self.metrics.record_overrun();
        }
        self.metrics.record_dropped_decisions(tally.unsent);

        BlockOutcome {
            frames: tally.frames,
            speech_frames: tally.speech,
            elapsed,
            overrun,
            fault,
        }
    }

    /// Classify the zero-padded residual, if any. Called once, after the
    /// capture source has stopped delivering blocks.
    pub fn finish(&mut self) -> Option<Decision> {
        let frame = self.assembler.finish()?;
        let decision = match self.detector.classify(frame) {
            Ok(vad) => Decision::classified(vad, frame),
            Err(e) => {
                warn!(error = %e, "residual frame not classified");
                Decision::assumed_silence(frame)
            }
        };
        self.metrics.record_residual(decision.is_speech());
        if let Some(tx) = &self.decisions {
            if tx.try_send(decision).is_err() {
                self.metrics.record_dropped_decisions(1);
            }
        }
        Some(decision)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Frames emitted so far.
    pub fn frames_emitted(&self) -> u64 {
        self.assembler.frames_emitted()
    }

    fn run_stages(&mut self, block: &mut AudioBlock, tally: &mut Tally) -> Result<()> {
        self.filters.apply(block);
        self.mono.clear();
        self.resampler.downsample_into(block, &mut self.mono);

        let Self {
            assembler,
            detector,
            mono,
            decisions,
            ..
        } = self;

        // After the first detector fault the rest of the block is assumed
        // silent; decisions already sent stand.
        let mut fault = None;
        assembler.push(mono, |frame| {
            let decision = if fault.is_some() {
                Decision::assumed_silence(frame)
            } else {
                match detector.classify(frame) {
                    Ok(vad) => Decision::classified(vad, frame),
                    Err(e) => {
                        fault = Some(e);
                        Decision::assumed_silence(frame)
                    }
                }
            };
            tally.add(decision, decisions.as_ref());
        })?;

        fault.map_or(Ok(()), Err)
    }

    /// Stand-in path for a block rejected before resampling.
    fn fill_dropped(&mut self, frames: usize, tally: &mut Tally) {
        let produced = self.resampler.skip(frames);
        let Self {
            assembler,
            decisions,
            ..
        } = self;
        if let Err(e) = assembler.push_silence(produced, |frame| {
            tally.add(Decision::assumed_silence(frame), decisions.as_ref());
        }) {
            warn!(error = %e, "could not account for dropped block");
        }
    }
}
