//! Reconciliation of delivery reports against the pending store.
//!
//! The correlator is the only `ReportSink` the producer ever hands to
//! `Transport::poll`. It owns the pending store, so a report arriving in the
//! middle of a submission or drain iteration mutates the store through the
//! same exclusive borrow the drain loop holds and never aliases it.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::{
    error::DeliveryFailure,
    producer::ProducerStats,
    retry::{RetryDecision, RetryPolicy},
    store::PendingStore,
    time::Clock,
    token::CorrelationToken,
    transport::{DeliveryReport, ReportSink},
};

/// Applies delivery reports to the pending store.
#[derive(Debug)]
pub struct DeliveryCorrelator<H> {
    store: PendingStore<H>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    stats: ProducerStats,
}

impl<H> DeliveryCorrelator<H> {
    /// Creates a correlator over an empty store.
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self::with_store(PendingStore::new(), policy, clock)
    }

    /// Creates a correlator over an existing store.
    pub fn with_store(store: PendingStore<H>, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { store, policy, clock, stats: ProducerStats::default() }
    }

    /// The pending store.
    pub fn store(&self) -> &PendingStore<H> {
        &self.store
    }

    /// Mutable access to the pending store.
    pub fn store_mut(&mut self) -> &mut PendingStore<H> {
        &mut self.store
    }

    /// Retry policy consulted on delivery errors.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Replaces the retry policy.
    pub fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// Clock used for retry scheduling.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Replaces the clock.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    /// Counters accumulated since construction.
    pub fn stats(&self) -> &ProducerStats {
        &self.stats
    }

    /// Records that the transport accepted `token`.
    pub(crate) fn record_submission(&mut self, token: CorrelationToken) {
        if self.store.mark_in_flight(token) {
            self.stats.submissions += 1;
        }
    }

    /// Records one local queue-full refusal.
    pub(crate) fn record_backpressure(&mut self) {
        self.stats.backpressure_events += 1;
    }

    fn record_failure(&mut self, token: CorrelationToken, failure: DeliveryFailure) {
        self.stats.delivery_failures += 1;

        let attempts = self.store.entry(token).map_or(0, |entry| entry.attempts());
        match self.policy.decide(attempts, self.clock.now()) {
            RetryDecision::Retry { not_before } => {
                let reason = failure.message.clone();
                if self.store.queue_retry(token, not_before, failure) {
                    debug!(
                        token = %token,
                        attempts,
                        error = %reason,
                        "delivery failed, message queued for resubmission"
                    );
                } else {
                    trace!(token = %token, "duplicate failure report, retry already queued");
                }
            },
            RetryDecision::GiveUp { reason } => {
                warn!(
                    token = %token,
                    attempts,
                    reason = %reason,
                    error = %failure.message,
                    "delivery permanently failed, abandoning message"
                );
                if self.store.abandon(token, failure) {
                    self.stats.abandoned += 1;
                }
            },
        }
    }
}

impl<H> ReportSink for DeliveryCorrelator<H> {
    fn on_report(&mut self, report: DeliveryReport) {
        let DeliveryReport { token, error } = report;

        if !self.store.contains(token) {
            self.stats.ignored_reports += 1;
            trace!(token = %token, "ignoring report for untracked message");
            return;
        }

        match error {
            None => {
                self.store.remove(token);
                self.stats.acknowledged += 1;
                trace!(token = %token, "delivery acknowledged");
            },
            Some(failure) => self.record_failure(token, failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::{
        message::BufferedMessage, retry::BackoffStrategy, store::EntryState, time::TestClock,
    };

    fn correlator(policy: RetryPolicy) -> (DeliveryCorrelator<&'static str>, TestClock) {
        let clock = TestClock::new();
        (DeliveryCorrelator::new(policy, Arc::new(clock.clone())), clock)
    }

    fn buffer(correlator: &mut DeliveryCorrelator<&'static str>) -> CorrelationToken {
        let message = BufferedMessage::new("t", None, Bytes::new(), Bytes::from_static(b"p"));
        let token = correlator.store_mut().add(message);
        correlator.record_submission(token);
        token
    }

    #[test]
    fn success_removes_entry() {
        let (mut correlator, _clock) = correlator(RetryPolicy::default());
        let token = buffer(&mut correlator);

        correlator.on_report(DeliveryReport::delivered(token));

        assert!(correlator.store().is_empty());
        assert_eq!(correlator.stats().acknowledged, 1);
    }

    #[test]
    fn failure_keeps_entry_and_queues_retry() {
        let (mut correlator, _clock) = correlator(RetryPolicy::default());
        let token = buffer(&mut correlator);

        correlator.on_report(DeliveryReport::failed(token, DeliveryFailure::new("timed out")));

        let entry = correlator.store().entry(token).unwrap();
        assert_eq!(entry.state(), EntryState::RetryQueued);
        assert_eq!(entry.last_error(), Some(&DeliveryFailure::new("timed out")));
        assert_eq!(correlator.store().retry_queued(), 1);
        assert_eq!(correlator.stats().delivery_failures, 1);
    }

    #[test]
    fn unknown_token_ignored() {
        let (mut correlator, _clock) = correlator(RetryPolicy::default());
        let token = buffer(&mut correlator);
        let foreign = CorrelationToken::from_raw(token.into_raw() + 100);

        correlator.on_report(DeliveryReport::delivered(foreign));
        correlator.on_report(DeliveryReport::failed(foreign, DeliveryFailure::new("x")));

        assert_eq!(correlator.store().len(), 1);
        assert_eq!(correlator.store().retry_queued(), 0);
        assert_eq!(correlator.stats().ignored_reports, 2);
    }

    #[test]
    fn bounded_policy_abandons_after_last_attempt() {
        let (mut correlator, _clock) = correlator(RetryPolicy::bounded(1));
        let token = buffer(&mut correlator);

        correlator.on_report(DeliveryReport::failed(token, DeliveryFailure::new("rejected")));

        assert!(correlator.store().is_empty());
        assert_eq!(correlator.stats().abandoned, 1);
        let abandoned = correlator.store_mut().take_abandoned();
        assert_eq!(abandoned[0].token, token);
        assert_eq!(abandoned[0].last_error.message, "rejected");
    }

    #[test]
    fn backoff_deadline_follows_clock() {
        let policy = RetryPolicy {
            backoff_strategy: BackoffStrategy::Fixed,
            base_delay: Duration::from_secs(2),
            ..RetryPolicy::default()
        };
        let (mut correlator, clock) = correlator(policy);
        let token = buffer(&mut correlator);
        clock.advance(Duration::from_secs(1));

        correlator.on_report(DeliveryReport::failed(token, DeliveryFailure::new("x")));

        assert_eq!(
            correlator.store().next_retry_due(),
            Some(clock.now() + Duration::from_secs(2))
        );
    }
}
