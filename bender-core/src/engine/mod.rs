//! `Engine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Engine::new(config)      → config validated, status = Idle
//!     └─► start()          → pipeline built, publisher spawned, capture open,
//!         │                  status = Listening
//!         └─► stop()       → running=false, stream closed, residual drained,
//!                            publisher joined, status = Stopped
//! ```
//!
//! `run_offline()` drives the same pipeline from a WAV file on the calling
//! thread instead of a capture device.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). `AudioCapture` is therefore opened *and* closed on a dedicated
//! `bender-capture` thread; a channel carries the open result back to
//! `start()`. The pipeline itself lives behind a mutex that the audio callback
//! only ever `try_lock`s: the lock is contended solely while `stop()` takes
//! the pipeline back to drain it.

pub mod metrics;
pub mod pipeline;

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::{file::WavSource, AudioBlock, AudioCapture, CaptureParams},
    config::PipelineConfig,
    error::{BenderError, Result},
    ipc::{
        events::{EngineStatus, EngineStatusEvent},
        publisher::{build_publisher, PublisherWorker},
    },
    vad::Decision,
};

use metrics::{Metrics, MetricsAggregator};
use pipeline::Pipeline;

/// Status events buffered for slow subscribers.
const STATUS_BROADCAST_CAP: usize = 16;

type SharedPipeline = Arc<Mutex<Option<Pipeline>>>;

/// Everything `stop()` has to tear down.
struct Session {
    pipeline: SharedPipeline,
    worker: PublisherWorker,
    decision_tx: Sender<Decision>,
    capture_stop: mpsc::Sender<()>,
    capture_thread: JoinHandle<()>,
}

/// The top-level engine handle.
///
/// `Engine` is `Send + Sync`; all fields use interior mutability.
pub struct Engine {
    config: PipelineConfig,
    /// `true` while capture is delivering blocks.
    running: Arc<AtomicBool>,
    status: Mutex<EngineStatus>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    metrics: Arc<MetricsAggregator>,
    session: Mutex<Option<Session>>,
}

impl Engine {
    /// Create an engine. Does not open any device.
    ///
    /// # Errors
    /// Any configuration error from `PipelineConfig::validate`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let (status_tx, _) = broadcast::channel(STATUS_BROADCAST_CAP);
        Ok(Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            status: Mutex::new(EngineStatus::Idle),
            status_tx,
            metrics: Arc::new(MetricsAggregator::new()),
            session: Mutex::new(None),
        })
    }

    /// Build the pipeline, start the publisher and open the capture device.
    ///
    /// Blocks until the device is confirmed open (or fails).
    ///
    /// # Errors
    /// - `BenderError::AlreadyRunning` if already started.
    /// - Configuration and device errors; nothing is left running.
    pub fn start(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.is_some() || self.running.load(Ordering::SeqCst) {
            return Err(BenderError::AlreadyRunning);
        }

        match self.open_session() {
            Ok(s) => {
                *session = Some(s);
                self.set_status(EngineStatus::Listening, None);
                info!(
                    native_rate = self.config.native_sample_rate,
                    target_rate = self.config.target_sample_rate,
                    channels = self.config.channels,
                    "engine started, listening"
                );
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Two-phase shutdown: stop accepting blocks, then drain the assembler's
    /// residual and the publisher queue. Returns the final metrics.
    ///
    /// # Errors
    /// `BenderError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<Metrics> {
        let session = self.session.lock().take().ok_or(BenderError::NotRunning)?;
        info!("engine stop requested");

        // Phase 1: no more blocks.
        self.running.store(false, Ordering::SeqCst);
        let _ = session.capture_stop.send(());
        if session.capture_thread.join().is_err() {
            warn!("capture thread panicked");
        }

        // Phase 2: drain and release.
        let pipeline = session.pipeline.lock().take();
        if let Some(mut pipeline) = pipeline {
            if let Some(last) = pipeline.finish() {
                info!(frame = last.frame_index, speech = last.is_speech(), "residual frame drained");
            }
        }
        drop(session.decision_tx);
        let metrics = session.worker.join()?;

        self.set_status(EngineStatus::Stopped, None);
        Ok(metrics)
    }

    /// Run a WAV file through the pipeline on the calling thread.
    ///
    /// The file's rate, channel count and sample format replace the
    /// configured capture fields; everything else comes from the engine's
    /// config. Returns the final metrics.
    ///
    /// # Errors
    /// `BenderError::AlreadyRunning` while live capture is active, file and
    /// configuration errors, or a decode error part-way through the file.
    pub fn run_offline(&self, path: impl AsRef<Path>) -> Result<Metrics> {
        let session = self.session.lock();
        if session.is_some() {
            return Err(BenderError::AlreadyRunning);
        }

        let source = WavSource::open(path, self.config.block_length)?;
        let config = source.configure(self.config.clone());
        config.validate()?;

        self.metrics.reset();
        let (decision_tx, decision_rx) = bounded(config.decision_queue_capacity);
        let rt_tx = config.publisher.publish_decisions.then(|| decision_tx.clone());
        let mut pipeline =
            Pipeline::from_config(config.clone(), Arc::clone(&self.metrics), rt_tx)?;
        let worker = PublisherWorker::spawn(
            build_publisher(&config.publisher),
            config.publisher.clone(),
            decision_rx,
            Arc::clone(&self.metrics),
            config.block_duration(),
        )?;

        self.set_status(EngineStatus::Listening, None);
        let delivered = source.run(|block: &mut AudioBlock| {
            pipeline.process_block(block);
        });
        pipeline.finish();
        drop(pipeline);
        drop(decision_tx);
        let metrics = worker.join()?;
        self.set_status(EngineStatus::Stopped, None);

        let blocks = delivered?;
        info!(blocks, "offline run complete");
        Ok(metrics)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the pipeline counters.
    pub fn metrics(&self) -> Metrics {
        self.metrics.snapshot()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Subscribe to lifecycle transitions.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn open_session(&self) -> Result<Session> {
        self.metrics.reset();
        let config = &self.config;
        let (decision_tx, decision_rx) = bounded(config.decision_queue_capacity);
        let rt_tx = config.publisher.publish_decisions.then(|| decision_tx.clone());

        let pipeline: SharedPipeline = Arc::new(Mutex::new(Some(Pipeline::from_config(
            config.clone(),
            Arc::clone(&self.metrics),
            rt_tx,
        )?)));
        let worker = PublisherWorker::spawn(
            build_publisher(&config.publisher),
            config.publisher.clone(),
            decision_rx,
            Arc::clone(&self.metrics),
            config.block_duration(),
        )?;

        let (open_tx, open_rx) = mpsc::channel::<Result<()>>();
        let (capture_stop, stop_rx) = mpsc::channel::<()>();
        let params = CaptureParams::from_config(config);
        let running = Arc::clone(&self.running);
        let rt_pipeline = Arc::clone(&pipeline);
        self.running.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("bender-capture".into())
            .spawn(move || {
                let handler = move |block: &mut AudioBlock| {
                    // Only contended while stop() takes the pipeline back.
                    if let Some(mut guard) = rt_pipeline.try_lock() {
                        if let Some(pipeline) = guard.as_mut() {
                            pipeline.process_block(block);
                        }
                    }
                };
                match AudioCapture::open(params, running, handler) {
                    Ok(capture) => {
                        let _ = open_tx.send(Ok(()));
                        let _ = stop_rx.recv();
                        capture.close();
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                    }
                }
            });

        let opened = match spawned {
            Ok(handle) => match open_rx.recv() {
                Ok(Ok(())) => Ok(handle),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(BenderError::Other(anyhow::anyhow!(
                    "capture thread died before opening the device"
                ))),
            },
            Err(e) => Err(BenderError::Io(e)),
        };

        match opened {
            Ok(capture_thread) => Ok(Session {
                pipeline,
                worker,
                decision_tx,
                capture_stop,
                capture_thread,
            }),
            Err(e) => {
                // Release the pipeline's sender so the worker can exit.
                pipeline.lock().take();
                drop(decision_tx);
                if let Err(join_err) = worker.join() {
                    warn!(error = %join_err, "publisher did not shut down cleanly");
                }
                Err(e)
            }
        }
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.session.get_mut().is_some() {
            if let Err(e) = self.stop() {
                warn!(error = %e, "engine did not stop cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ipc::PublisherSink, vad::DetectorKind};

    fn quiet_config() -> PipelineConfig {
        let mut config = PipelineConfig {
            detector: DetectorKind::Energy,
            ..PipelineConfig::default()
        };
        config.publisher.sink = PublisherSink::Log;
        config
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = PipelineConfig {
            native_sample_rate: 44_100,
            ..quiet_config()
        };
        assert!(Engine::new(config).err().unwrap().is_config());
    }

    #[test]
    fn fresh_engine_is_idle_and_cannot_stop() {
        let engine = Engine::new(quiet_config()).unwrap();
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert!(!engine.is_running());
        assert!(matches!(engine.stop(), Err(BenderError::NotRunning)));
        assert_eq!(engine.metrics(), Metrics::default());
    }

    #[test]
    fn offline_run_reports_status_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..(1024 * 4 * 2) {
            writer.write_sample(0i32).unwrap();
        }
        writer.finalize().unwrap();

        let engine = Engine::new(quiet_config()).unwrap();
        let mut status = engine.subscribe_status();
        let metrics = engine.run_offline(&path).unwrap();

        assert_eq!(metrics.blocks_processed, 4);
        // 4 * 1024 / 3 = 1366 samples: 4 whole frames + padded residual.
        assert_eq!(metrics.frames_total, 5);
        assert_eq!(metrics.frames_speech, 0);
        assert_eq!(engine.metrics(), metrics);
        assert_eq!(status.try_recv().unwrap().status, EngineStatus::Listening);
        assert_eq!(status.try_recv().unwrap().status, EngineStatus::Stopped);
    }

    #[cfg(not(feature = "audio-cpal"))]
    #[test]
    fn start_without_cpal_fails_and_releases_the_session() {
        let engine = Engine::new(quiet_config()).unwrap();
        assert!(matches!(engine.start(), Err(BenderError::AudioStream(_))));
        assert_eq!(engine.status(), EngineStatus::Error);
        assert!(!engine.is_running());
        assert!(matches!(engine.stop(), Err(BenderError::NotRunning)));
    }

    #[test]
    fn offline_run_of_missing_file_fails_cleanly() {
        let engine = Engine::new(quiet_config()).unwrap();
        assert!(engine.run_offline("/nonexistent/input.wav").is_err());
        assert_eq!(engine.status(), EngineStatus::Idle);
    }
}
