//! Buffered producer: cheap synchronous enqueue, blocking drain.
//!
//! # Architecture
//!
//! ```text
//! add_message ──▶ TopicCache ──▶ PendingStore (via DeliveryCorrelator)
//!                                      ▲
//! flush ──▶ SubmissionLoop ──▶ Transport::submit
//!   │                              │
//!   └──▶ Transport::poll ──reports──┘
//! ```
//!
//! `flush` submits every entry not already in flight, then keeps polling the
//! transport and resubmitting failed entries until the store is empty. With
//! the default retry policy it returns only once the broker has accepted
//! every buffered message.

use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    config::ProducerConfig,
    correlator::DeliveryCorrelator,
    error::{BufferError, Result},
    message::MessageBuilder,
    retry::RetryPolicy,
    store::AbandonedMessage,
    submit::SubmissionLoop,
    time::{Clock, SystemClock},
    token::CorrelationToken,
    topic::TopicCache,
    transport::Transport,
};

/// Counters for producer monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    /// Submissions accepted by the transport, resubmissions included.
    pub submissions: u64,
    /// Times the transport refused a submission with a full local queue.
    pub backpressure_events: u64,
    /// Messages acknowledged by the broker.
    pub acknowledged: u64,
    /// Broker-reported delivery failures.
    pub delivery_failures: u64,
    /// Reports for tokens that were not buffered.
    pub ignored_reports: u64,
    /// Messages abandoned by a bounded retry policy.
    pub abandoned: u64,
}

/// Producer that buffers messages and drains them reliably on `flush`.
///
/// ```
/// use spool_core::{transport::mock::ScriptedTransport, BufferedProducer};
///
/// let mut producer = BufferedProducer::new(ScriptedTransport::new());
/// let builder = producer.make_builder("orders").key("user-1").payload("created");
/// producer.add_message(builder)?;
///
/// producer.flush()?;
/// assert_eq!(producer.pending(), 0);
/// # Ok::<(), spool_core::BufferError>(())
/// ```
#[derive(Debug)]
pub struct BufferedProducer<T: Transport> {
    transport: T,
    correlator: DeliveryCorrelator<T::Topic>,
    topics: TopicCache<T::Topic>,
    submitter: SubmissionLoop,
}

impl<T: Transport> BufferedProducer<T> {
    /// Creates a producer with unbounded immediate retries.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            correlator: DeliveryCorrelator::new(RetryPolicy::default(), Arc::new(SystemClock)),
            topics: TopicCache::new(),
            submitter: SubmissionLoop::default(),
        }
    }

    /// Creates a producer using the polling and retry settings of `config`.
    pub fn with_config(transport: T, config: &ProducerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(transport)
            .with_policy(config.to_retry_policy())
            .with_poll_timeout(config.poll_timeout()))
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.correlator.set_policy(policy);
        self
    }

    /// Replaces the clock used for retry backoff.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.correlator.set_clock(clock);
        self
    }

    /// Sets the timeout of every transport poll.
    #[must_use]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.submitter = SubmissionLoop::new(poll_timeout);
        self
    }

    /// Starts a message addressed to `topic`.
    pub fn make_builder(&self, topic: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(topic)
    }

    /// Buffers a message and returns its correlation token.
    ///
    /// Performs no submission. The only possible failure is resolution of a
    /// topic name seen for the first time.
    pub fn add_message(&mut self, builder: MessageBuilder) -> Result<CorrelationToken> {
        let transport = &mut self.transport;
        let topic = self.topics.resolve(builder.topic(), |name| transport.resolve_topic(name))?;

        let token = self.correlator.store_mut().add(builder.bind(topic));
        debug!(token = %token, pending = self.correlator.store().len(), "message buffered");
        Ok(token)
    }

    /// Blocks until every buffered message has been acknowledged.
    ///
    /// Backpressure and delivery failures are retried internally. A
    /// submission the transport refuses outright aborts the flush with
    /// `BufferError::Submission`; the entry stays buffered for the next
    /// call. Under a bounded retry policy, messages abandoned during this
    /// call are reported as `BufferError::RetriesExhausted` once everything
    /// else has drained, and handed back by `take_abandoned`.
    pub fn flush(&mut self) -> Result<()> {
        let abandoned_before = self.correlator.stats().abandoned;
        let wave = self.correlator.store_mut().flush_wave();
        if wave.is_empty() && self.correlator.store().is_empty() {
            return Ok(());
        }

        info!(
            pending = self.correlator.store().len(),
            submitting = wave.len(),
            "flushing buffered messages"
        );

        for token in wave {
            self.submitter.submit(&mut self.transport, &mut self.correlator, token)?;
        }

        while !self.correlator.store().is_empty() {
            self.transport.poll(self.submitter.poll_timeout(), &mut self.correlator);
            self.resubmit_due_retries()?;
            self.wait_for_backoff();
        }

        let abandoned = self.correlator.stats().abandoned - abandoned_before;
        if abandoned > 0 {
            warn!(abandoned, "flush finished with abandoned messages");
            return Err(BufferError::retries_exhausted(
                usize::try_from(abandoned).unwrap_or(usize::MAX),
            ));
        }

        info!(acknowledged = self.correlator.stats().acknowledged, "flush complete");
        Ok(())
    }

    fn resubmit_due_retries(&mut self) -> Result<()> {
        let now = self.correlator.clock().now();
        let due = self.correlator.store_mut().take_due_retries(now);
        if !due.is_empty() {
            debug!(count = due.len(), "resubmitting failed messages");
        }

        for token in due {
            self.submitter.submit(&mut self.transport, &mut self.correlator, token)?;
        }
        Ok(())
    }

    /// Sleeps until the next retry is due when nothing is in flight.
    fn wait_for_backoff(&self) {
        let store = self.correlator.store();
        if store.in_flight() > 0 {
            return;
        }
        let Some(due) = store.next_retry_due() else {
            return;
        };

        let clock = self.correlator.clock();
        let delay = due.saturating_duration_since(clock.now());
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis(), "waiting for retry backoff");
            clock.sleep(delay);
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Counters accumulated since construction.
    pub fn stats(&self) -> ProducerStats {
        *self.correlator.stats()
    }

    /// Messages buffered and not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.correlator.store().len()
    }

    /// Messages accepted by the transport and awaiting a report.
    pub fn in_flight(&self) -> usize {
        self.correlator.store().in_flight()
    }

    /// Messages waiting to be resubmitted.
    pub fn retry_queued(&self) -> usize {
        self.correlator.store().retry_queued()
    }

    /// Number of distinct topics resolved so far.
    pub fn cached_topics(&self) -> usize {
        self.topics.len()
    }

    /// Hands back every message abandoned by a bounded retry policy.
    pub fn take_abandoned(&mut self) -> Vec<AbandonedMessage<T::Topic>> {
        self.correlator.store_mut().take_abandoned()
    }
}
