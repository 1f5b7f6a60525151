//! Reliable buffering for an asynchronous message producer.
//!
//! Callers enqueue messages synchronously and cheaply with
//! `BufferedProducer::add_message`, then block on `flush`, which returns only
//! once the broker has acknowledged every buffered message. Local queue
//! backpressure and broker-reported delivery failures are retried
//! transparently; the caller never handles correlation or acknowledgments.
//!
//! # Architecture
//!
//! The producer sits above a `Transport`, an asynchronous publish/acknowledge
//! client that reports delivery outcomes from inside its `poll` call:
//!
//! 1. **Buffer** - `add_message` resolves the topic once per name and stores
//!    the message under a fresh `CorrelationToken`
//! 2. **Submit** - `flush` hands every entry to the transport, polling and
//!    retrying whenever the local queue is full
//! 3. **Correlate** - delivery reports carry the token back; successes remove
//!    the entry and failures queue it for resubmission
//! 4. **Drain** - `flush` polls and resubmits until nothing is pending
//!
//! Everything runs on the calling thread. Delivery reports arrive
//! reentrantly during `poll`, so the pending store is only ever iterated
//! through token snapshots.
//!
//! # Example
//!
//! ```
//! use spool_core::{transport::mock::ScriptedTransport, BufferedProducer};
//!
//! let mut transport = ScriptedTransport::new();
//! transport.queue_full_next(1).fail_next_deliveries(1, "leader not available");
//!
//! let mut producer = BufferedProducer::new(transport);
//! for payload in ["a", "b", "c"] {
//!     producer.add_message(producer.make_builder("events").payload(payload))?;
//! }
//!
//! producer.flush()?;
//! assert_eq!(producer.pending(), 0);
//! assert_eq!(producer.stats().acknowledged, 3);
//! # Ok::<(), spool_core::BufferError>(())
//! ```
//!
//! With the `kafka` feature, `kafka::KafkaTransport` drives a librdkafka
//! producer and `BufferedProducer::from_config` builds the whole stack from a
//! `ProducerConfig`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

pub mod config;
pub mod correlator;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod message;
pub mod producer;
pub mod retry;
pub mod store;
pub mod submit;
pub mod time;
pub mod token;
pub mod topic;
pub mod transport;

pub use config::ProducerConfig;
pub use error::{BufferError, DeliveryFailure, ErrorCategory, Result, SubmitError};
pub use message::{BufferedMessage, MessageBuilder, Partition};
pub use producer::{BufferedProducer, ProducerStats};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::AbandonedMessage;
pub use time::{Clock, SystemClock, TestClock};
pub use token::CorrelationToken;
pub use transport::{DeliveryReport, ReportSink, Transport};

/// Default timeout of each transport poll.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
