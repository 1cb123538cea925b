//! Off-thread publication of decisions and metrics.
//!
//! The real-time path only ever touches the decision queue (`try_send`) and
//! the metrics mutex. Everything that may block (serialization, writers,
//! logging of summaries) happens on the worker thread in `publisher`.

pub mod events;
pub mod publisher;

pub use publisher::{
    build_publisher, JsonLinesPublisher, LogPublisher, Publisher, PublisherSink, PublisherWorker,
};
