//! Backpressure-aware submission of one buffered entry.

use std::time::Duration;

use tracing::{debug, error};

use crate::{
    correlator::DeliveryCorrelator,
    error::{BufferError, ErrorCategory, Result, SubmitError},
    token::CorrelationToken,
    transport::Transport,
};

/// Result of handing one entry to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// The transport accepted the message and will report its delivery.
    Accepted,
    /// The entry left the store before it could be submitted, for example
    /// because a report for it arrived while waiting out backpressure.
    AlreadySettled,
}

/// Submits entries, absorbing local queue-full backpressure.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionLoop {
    poll_timeout: Duration,
}

impl SubmissionLoop {
    /// Creates a loop that polls for `poll_timeout` whenever the transport's
    /// local queue is full.
    pub fn new(poll_timeout: Duration) -> Self {
        Self { poll_timeout }
    }

    /// Timeout passed to every `Transport::poll` call.
    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Hands the entry buffered under `token` to `transport`.
    ///
    /// On `QueueFull` the transport is polled once, which may settle other
    /// entries through `correlator`, and the identical submission is tried
    /// again until accepted. Any other refusal is returned as
    /// `BufferError::Submission` and the entry stays buffered.
    pub fn submit<T: Transport>(
        &self,
        transport: &mut T,
        correlator: &mut DeliveryCorrelator<T::Topic>,
        token: CorrelationToken,
    ) -> Result<Submitted> {
        // Owned copy; the store may change while the transport is polled.
        let Some(message) = correlator.store().get(token).cloned() else {
            return Ok(Submitted::AlreadySettled);
        };

        loop {
            match transport.submit(&message, token) {
                Ok(()) => {
                    correlator.record_submission(token);
                    debug!(token = %token, partition = ?message.partition(), "message submitted");
                    return Ok(Submitted::Accepted);
                },
                Err(SubmitError::QueueFull) => {
                    correlator.record_backpressure();
                    debug!(token = %token, "local queue full, polling before resubmitting");
                    transport.poll(self.poll_timeout, &mut *correlator);

                    if !correlator.store().contains(token) {
                        return Ok(Submitted::AlreadySettled);
                    }
                },
                Err(SubmitError::Rejected { message: reason }) => {
                    let error = BufferError::submission(token, reason);
                    error!(
                        token = %token,
                        category = %ErrorCategory::from(&error),
                        error = %error,
                        "transport rejected message"
                    );
                    return Err(error);
                },
            }
        }
    }
}

impl Default for SubmissionLoop {
    fn default() -> Self {
        Self::new(crate::DEFAULT_POLL_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        message::MessageBuilder,
        retry::RetryPolicy,
        store::EntryState,
        time::SystemClock,
        transport::{
            mock::{MockTopic, ScriptedTransport},
            DeliveryReport,
        },
    };

    type Correlator = DeliveryCorrelator<MockTopic>;

    fn setup(payload: &'static str) -> (ScriptedTransport, Correlator, CorrelationToken) {
        let mut transport = ScriptedTransport::new();
        let mut correlator =
            DeliveryCorrelator::new(RetryPolicy::default(), Arc::new(SystemClock));
        let topic = transport.resolve_topic("events").unwrap();
        let message = MessageBuilder::new("events").payload(payload).bind(topic);
        let token = correlator.store_mut().add(message);
        (transport, correlator, token)
    }

    #[test]
    fn accepted_submission_marks_entry_in_flight() {
        let (mut transport, mut correlator, token) = setup("a");

        let outcome = SubmissionLoop::default().submit(&mut transport, &mut correlator, token);

        assert_eq!(outcome, Ok(Submitted::Accepted));
        assert_eq!(correlator.store().entry(token).unwrap().state(), EntryState::InFlight);
        assert_eq!(correlator.stats().submissions, 1);
    }

    #[test]
    fn queue_full_polls_then_retries_same_message() {
        let (mut transport, mut correlator, token) = setup("a");
        transport.queue_full_next(3);

        let outcome = SubmissionLoop::default().submit(&mut transport, &mut correlator, token);

        assert_eq!(outcome, Ok(Submitted::Accepted));
        assert_eq!(transport.submit_calls(), 4);
        assert_eq!(transport.poll_count(), 3);
        assert_eq!(transport.submissions_for(token).len(), 1);
        assert_eq!(correlator.stats().backpressure_events, 3);
    }

    #[test]
    fn rejection_propagates_and_leaves_entry_buffered() {
        let (mut transport, mut correlator, token) = setup("a");
        transport.reject_next("message too large");

        let outcome = SubmissionLoop::default().submit(&mut transport, &mut correlator, token);

        assert_eq!(outcome, Err(BufferError::submission(token, "message too large")));
        assert_eq!(correlator.store().entry(token).unwrap().state(), EntryState::Buffered);
        assert_eq!(transport.poll_count(), 0);
    }

    #[test]
    fn entry_settled_during_backpressure_poll_is_not_resubmitted() {
        let (mut transport, mut correlator, token) = setup("a");
        transport.queue_full_next(1).inject_report(DeliveryReport::delivered(token));

        let outcome = SubmissionLoop::default().submit(&mut transport, &mut correlator, token);

        assert_eq!(outcome, Ok(Submitted::AlreadySettled));
        assert_eq!(transport.submit_calls(), 1);
        assert!(correlator.store().is_empty());
    }

    #[test]
    fn unknown_token_skipped() {
        let (mut transport, mut correlator, token) = setup("a");
        correlator.store_mut().remove(token);

        let outcome = SubmissionLoop::default().submit(&mut transport, &mut correlator, token);

        assert_eq!(outcome, Ok(Submitted::AlreadySettled));
        assert_eq!(transport.submit_calls(), 0);
    }
}
