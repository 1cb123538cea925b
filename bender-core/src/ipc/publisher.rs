//! Publisher backends and the worker thread that feeds them.
//!
//! ## Worker loop
//!
//! ```text
//! select! {
//!     decision queue → publish_decision (if enabled)
//!     tick           → snapshot metrics
//!                      ├─ warn on new overruns / dropped decisions
//!                      ├─ publish_metrics every `metrics_every_blocks`
//!                      └─ info summary every `summary_every_blocks`
//! }
//! queue disconnected → publish final metrics, log final summary, exit
//! ```
//!
//! Publication is best-effort: a failing backend is logged and skipped,
//! never retried, and never stops the pipeline.

use std::{
    io::{self, Write},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{select, tick, Receiver};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::PublisherConfig,
    engine::metrics::{Metrics, MetricsAggregator},
    error::{BenderError, Result},
    ipc::events::{BusMessage, DecisionEvent, MetricsEvent},
    vad::Decision,
};

/// Sink for serialized bus messages.
pub trait Publisher: Send {
    fn publish_decision(&mut self, decision: &DecisionEvent) -> Result<()>;
    fn publish_metrics(&mut self, metrics: &MetricsEvent) -> Result<()>;
}

/// Configured publisher backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherSink {
    /// JSON lines on stdout.
    #[default]
    Stdout,
    /// `tracing` events only.
    Log,
}

/// Build the backend selected by `config.sink`.
pub fn build_publisher(config: &PublisherConfig) -> Box<dyn Publisher> {
    match config.sink {
        PublisherSink::Stdout => Box::new(JsonLinesPublisher::stdout(config)),
        PublisherSink::Log => Box::new(LogPublisher::new(config)),
    }
}

/// Writes one `{"channel": .., "payload": ..}` JSON object per line.
pub struct JsonLinesPublisher<W> {
    writer: W,
    decision_channel: String,
    metrics_channel: String,
}

impl JsonLinesPublisher<io::Stdout> {
    pub fn stdout(config: &PublisherConfig) -> Self {
        Self::new(io::stdout(), config)
    }
}

impl<W: Write + Send> JsonLinesPublisher<W> {
    pub fn new(writer: W, config: &PublisherConfig) -> Self {
        Self {
            writer,
            decision_channel: config.decision_channel.clone(),
            metrics_channel: config.metrics_channel.clone(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn send<T: Serialize>(writer: &mut W, channel: &str, payload: &T) -> Result<()> {
        let msg = BusMessage {
            channel: channel.to_owned(),
            payload,
        };
        serde_json::to_writer(&mut *writer, &msg).map_err(|e| BenderError::Publish(e.to_string()))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> Publisher for JsonLinesPublisher<W> {
    fn publish_decision(&mut self, decision: &DecisionEvent) -> Result<()> {
        Self::send(&mut self.writer, &self.decision_channel, decision)
    }

    fn publish_metrics(&mut self, metrics: &MetricsEvent) -> Result<()> {
        Self::send(&mut self.writer, &self.metrics_channel, metrics)
    }
}

/// Emits messages as `tracing` events: decisions at debug, metrics at info.
pub struct LogPublisher {
    decision_channel: String,
    metrics_channel: String,
}

impl LogPublisher {
    pub fn new(config: &PublisherConfig) -> Self {
        Self {
            decision_channel: config.decision_channel.clone(),
            metrics_channel: config.metrics_channel.clone(),
        }
    }
}

impl Publisher for LogPublisher {
    fn publish_decision(&mut self, decision: &DecisionEvent) -> Result<()> {
        debug!(
            channel = %self.decision_channel,
            frame = decision.frame_index,
            timestamp_ms = decision.timestamp_ms,
            speech = decision.is_speech,
            assumed = decision.assumed,
            "decision"
        );
        Ok(())
    }

    fn publish_metrics(&mut self, event: &MetricsEvent) -> Result<()> {
        let payload =
            serde_json::to_string(event).map_err(|e| BenderError::Publish(e.to_string()))?;
        info!(channel = %self.metrics_channel, %payload, "metrics");
        Ok(())
    }
}

/// Handle to the publisher thread.
pub struct PublisherWorker {
    handle: JoinHandle<Metrics>,
}

impl PublisherWorker {
    /// Start the worker. It runs until every sender of `decisions` has been
    /// dropped, then publishes a final snapshot and exits.
    ///
    /// `poll_every` is how often metrics are checked for cadence and watchdog
    /// reporting.
    pub fn spawn(
        publisher: Box<dyn Publisher>,
        config: PublisherConfig,
        decisions: Receiver<Decision>,
        metrics: Arc<MetricsAggregator>,
        poll_every: Duration,
    ) -> Result<Self> {
        let worker = WorkerLoop::new(publisher, config, metrics);
        let handle = thread::Builder::new()
            .name("bender-publisher".into())
            .spawn(move || worker.run(decisions, poll_every))?;
        Ok(Self { handle })
    }

    /// Wait for the worker to drain and exit. Returns the final snapshot.
    pub fn join(self) -> Result<Metrics> {
        self.handle
            .join()
            .map_err(|_| BenderError::Other(anyhow::anyhow!("publisher thread panicked")))
    }
}

struct WorkerLoop {
    publisher: Box<dyn Publisher>,
    config: PublisherConfig,
    metrics: Arc<MetricsAggregator>,
    next_metrics: u64,
    next_summary: u64,
    seen_overruns: u64,
    seen_dropped_decisions: u64,
}

impl WorkerLoop {
    fn new(
        publisher: Box<dyn Publisher>,
        config: PublisherConfig,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            next_metrics: config.metrics_every_blocks,
            next_summary: config.summary_every_blocks,
            publisher,
            config,
            metrics,
            seen_overruns: 0,
            seen_dropped_decisions: 0,
        }
    }

    fn run(mut self, decisions: Receiver<Decision>, poll_every: Duration) -> Metrics {
        let ticker = tick(poll_every);
        loop {
            select! {
                recv(decisions) -> msg => match msg {
                    Ok(decision) => self.on_decision(&decision),
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.on_tick(),
            }
        }

        let last = self.metrics.snapshot();
        self.report_watchdog(&last);
        self.publish_metrics(last);
        info!(
            blocks = last.blocks_processed,
            frames = last.frames_total,
            speech_frames = last.frames_speech,
            voice_ratio = format_args!("{:.1}%", last.voice_ratio()),
            avg_latency_ms = format_args!("{:.3}", last.avg_latency_ms),
            max_latency_ms = format_args!("{:.3}", last.max_latency_ms),
            dropped_blocks = last.blocks_dropped,
            overruns = last.overruns,
            "pipeline stopped, final metrics"
        );
        last
    }

    fn on_decision(&mut self, decision: &Decision) {
        if !self.config.publish_decisions {
            return;
        }
        if let Err(e) = self.publisher.publish_decision(&DecisionEvent::from(decision)) {
            warn!(error = %e, frame = decision.frame_index, "decision not published");
        }
    }

    fn on_tick(&mut self) {
        let snapshot = self.metrics.snapshot();
        self.report_watchdog(&snapshot);

        let blocks = snapshot.blocks_processed;
        if crossed(&mut self.next_metrics, self.config.metrics_every_blocks, blocks) {
            self.publish_metrics(snapshot);
        }
        if crossed(&mut self.next_summary, self.config.summary_every_blocks, blocks) {
            info!(
                blocks,
                voice_ratio = format_args!("{:.1}%", snapshot.voice_ratio()),
                avg_latency_ms = format_args!("{:.1}", snapshot.avg_latency_ms),
                "pipeline summary"
            );
        }
    }

    fn report_watchdog(&mut self, m: &Metrics) {
        if m.overruns > self.seen_overruns {
            warn!(
                new = m.overruns - self.seen_overruns,
                total = m.overruns,
                max_latency_ms = m.max_latency_ms,
                "block processing exceeded the block duration"
            );
            self.seen_overruns = m.overruns;
        }
        if m.decisions_dropped > self.seen_dropped_decisions {
            warn!(
                new = m.decisions_dropped - self.seen_dropped_decisions,
                total = m.decisions_dropped,
                "decision queue full, decisions dropped"
            );
            self.seen_dropped_decisions = m.decisions_dropped;
        }
    }

    fn publish_metrics(&mut self, metrics: Metrics) {
        if let Err(e) = self.publisher.publish_metrics(&MetricsEvent::now(metrics)) {
            warn!(error = %e, "metrics not published");
        }
    }
}

/// `true` once per `every` blocks; `next` holds the following threshold.
fn crossed(next: &mut u64, every: u64, count: u64) -> bool {
    if every == 0 || count < *next {
        return false;
    }
    *next = (count / every + 1) * every;
    true
}
