//! Message payloads published on the bus.
//!
//! ## Channels
//!
//! | Payload | Default channel |
//! |---------|-----------------|
//! | `DecisionEvent` | `"bender/vad/decision"` |
//! | `MetricsEvent` | `"bender/sys/metrics"` |
//!
//! Every message goes out wrapped in a `BusMessage` envelope. Keys are
//! snake_case so dashboards reading the metrics channel see the same field
//! names as `Metrics`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{engine::metrics::Metrics, vad::Decision};

/// Envelope for one published message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage<T> {
    pub channel: String,
    pub payload: T,
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// One frame's voice-activity verdict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub frame_index: u64,
    /// Nominal frame start, milliseconds since pipeline start.
    pub timestamp_ms: f64,
    pub is_speech: bool,
    /// Frame was not classified (its block faulted) and is reported as
    /// non-speech.
    pub assumed: bool,
}

impl From<&Decision> for DecisionEvent {
    fn from(d: &Decision) -> Self {
        Self {
            frame_index: d.frame_index,
            timestamp_ms: d.timestamp.as_micros() as f64 / 1000.0,
            is_speech: d.is_speech(),
            assumed: d.assumed,
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Metrics snapshot stamped with the time it was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEvent {
    #[serde(flatten)]
    pub metrics: Metrics,
    pub last_update: DateTime<Utc>,
}

impl MetricsEvent {
    pub fn now(metrics: Metrics) -> Self {
        Self {
            metrics,
            last_update: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Broadcast by the engine on every lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Capture open, blocks flowing through the pipeline.
    Listening,
    /// Capture stopped and residual drained; engine may be restarted.
    Stopped,
    /// Start failed; see the event detail.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::vad::VadDecision;

    #[test]
    fn decision_event_carries_millisecond_timestamp() {
        let decision = Decision {
            vad: VadDecision::Speech,
            frame_index: 75,
            timestamp: Duration::from_millis(1500),
            assumed: false,
        };
        let msg = BusMessage {
            channel: "bender/vad/decision".to_string(),
            payload: DecisionEvent::from(&decision),
        };

        let json = serde_json::to_value(&msg).expect("serialize decision");
        assert_eq!(json["channel"], "bender/vad/decision");
        assert_eq!(json["payload"]["frame_index"], 75);
        assert_eq!(json["payload"]["is_speech"], true);
        assert_eq!(json["payload"]["assumed"], false);
        let ts = json["payload"]["timestamp_ms"].as_f64().expect("number");
        assert!((ts - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_event_flattens_counters() {
        let metrics = Metrics {
            blocks_processed: 500,
            frames_total: 533,
            frames_speech: 120,
            avg_latency_ms: 1.25,
            max_latency_ms: 4.0,
            ..Metrics::default()
        };
        let event = MetricsEvent::now(metrics);
        let json = serde_json::to_value(&event).expect("serialize metrics");
        assert_eq!(json["blocks_processed"], 500);
        assert_eq!(json["frames_speech"], 120);
        assert_eq!(json["overruns"], 0);
        let stamp = json["last_update"].as_str().expect("rfc3339 string");
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok(), "{stamp}");

        let back: MetricsEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.metrics, metrics);
    }

    #[test]
    fn engine_status_serializes_lowercase() {
        let event = EngineStatusEvent {
            status: EngineStatus::Listening,
            detail: None,
        };
        let json = serde_json::to_value(&event).expect("serialize status");
        assert_eq!(json["status"], "listening");
        assert!(json["detail"].is_null());
        assert!(serde_json::from_str::<EngineStatus>(r#""Stopped""#).is_err());
    }
}
