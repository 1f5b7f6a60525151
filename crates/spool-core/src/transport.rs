//! Transport abstraction consumed by the buffered producer.
//!
//! The producer never talks to a broker itself. It hands messages to a
//! `Transport`, which queues them for asynchronous delivery and later reports
//! the outcome of each one from inside `poll`. This keeps the buffering and
//! retry logic testable against the in-memory `mock::ScriptedTransport`,
//! while the Kafka implementation lives behind the `kafka` feature.
//!
//! # Delivery reports
//!
//! A transport must report every accepted submission exactly once per
//! attempt, carrying back the `CorrelationToken` it was given, and must only
//! do so synchronously from within `poll`. Reports for tokens the producer no
//! longer tracks are tolerated and ignored.

use std::{fmt, time::Duration};

use crate::{
    error::{DeliveryFailure, Result, SubmitError},
    message::BufferedMessage,
    token::CorrelationToken,
};

/// Outcome of one delivery attempt, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Token attached to the submission this report answers.
    pub token: CorrelationToken,
    /// Broker-reported failure, `None` on successful delivery.
    pub error: Option<DeliveryFailure>,
}

impl DeliveryReport {
    /// Report of a successful delivery.
    pub fn delivered(token: CorrelationToken) -> Self {
        Self { token, error: None }
    }

    /// Report of a failed delivery.
    pub fn failed(token: CorrelationToken, failure: DeliveryFailure) -> Self {
        Self { token, error: Some(failure) }
    }

    /// Returns `true` if the message was delivered.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Receiver of delivery reports during `Transport::poll`.
pub trait ReportSink {
    /// Handles one delivery report.
    fn on_report(&mut self, report: DeliveryReport);
}

impl<F> ReportSink for F
where
    F: FnMut(DeliveryReport),
{
    fn on_report(&mut self, report: DeliveryReport) {
        self(report);
    }
}

/// Asynchronous publish/acknowledge transport.
///
/// Implementations are driven from a single thread: the producer calls
/// `submit` and `poll` in turn and expects delivery reports only as a side
/// effect of `poll`.
pub trait Transport {
    /// Resolved topic handle stored with every buffered message.
    type Topic: Clone + fmt::Debug;

    /// Resolves a topic name to a handle.
    ///
    /// The producer caches the result, so this runs once per distinct name.
    fn resolve_topic(&mut self, name: &str) -> Result<Self::Topic>;

    /// Queues `message` for delivery, tagged with `token`.
    ///
    /// Acceptance does not imply delivery; the outcome arrives later as a
    /// `DeliveryReport` carrying the same token. `SubmitError::QueueFull`
    /// signals local backpressure and is retried by the caller after polling.
    fn submit(
        &mut self,
        message: &BufferedMessage<Self::Topic>,
        token: CorrelationToken,
    ) -> std::result::Result<(), SubmitError>;

    /// Serves transport events for up to `timeout`, handing any delivery
    /// reports to `reports` before returning.
    ///
    /// Returns the number of reports delivered.
    fn poll(&mut self, timeout: Duration, reports: &mut dyn ReportSink) -> usize;
}

pub mod mock {
    //! Scripted in-memory transport for testing.
    //!
    //! Accepts submissions into an in-memory queue and acknowledges them on
    //! `poll`. Backpressure, rejections, delivery failures and unresolvable
    //! topics can be scripted ahead of time, and every submission is recorded
    //! for verification.

    use std::{
        collections::{HashMap, HashSet, VecDeque},
        sync::Arc,
        time::Duration,
    };

    use bytes::Bytes;

    use super::{DeliveryReport, ReportSink, Transport};
    use crate::{
        error::{BufferError, DeliveryFailure, Result, SubmitError},
        message::{BufferedMessage, Partition},
        token::CorrelationToken,
    };

    /// Topic handle issued by `ScriptedTransport`.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct MockTopic {
        name: Arc<str>,
        id: usize,
    }

    impl MockTopic {
        /// Topic name.
        pub fn name(&self) -> &str {
            &self.name
        }

        /// Sequence number of the resolution that produced this handle.
        pub fn id(&self) -> usize {
            self.id
        }
    }

    /// A submission accepted by `ScriptedTransport`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SubmittedRecord {
        /// Token attached to the submission.
        pub token: CorrelationToken,
        /// Topic name.
        pub topic: String,
        /// Partition, if pinned.
        pub partition: Option<Partition>,
        /// Key bytes.
        pub key: Bytes,
        /// Payload bytes.
        pub payload: Bytes,
    }

    /// Transport double with scriptable failures.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        submit_script: VecDeque<SubmitError>,
        failing_deliveries: VecDeque<DeliveryFailure>,
        failing_topics: HashMap<String, DeliveryFailure>,
        unresolvable_topics: HashSet<String>,
        queue_capacity: Option<usize>,
        reports_per_poll: Option<usize>,
        outstanding: VecDeque<DeliveryReport>,
        submissions: Vec<SubmittedRecord>,
        submit_calls: usize,
        poll_count: usize,
        resolutions: usize,
        resolve_calls: HashMap<String, usize>,
    }

    impl ScriptedTransport {
        /// Creates a transport that accepts and acknowledges everything.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next `count` submit calls fail with `QueueFull`.
        pub fn queue_full_next(&mut self, count: usize) -> &mut Self {
            self.submit_script.extend(std::iter::repeat(SubmitError::QueueFull).take(count));
            self
        }

        /// Makes the next scripted submit call fail with `Rejected`.
        pub fn reject_next(&mut self, reason: impl Into<String>) -> &mut Self {
            self.submit_script.push_back(SubmitError::rejected(reason));
            self
        }

        /// Makes the next `count` accepted submissions report a delivery error.
        pub fn fail_next_deliveries(&mut self, count: usize, reason: &str) -> &mut Self {
            let failure = DeliveryFailure::new(reason);
            self.failing_deliveries.extend(std::iter::repeat(failure).take(count));
            self
        }

        /// Makes every delivery to `topic` fail until `recover_topic`.
        pub fn fail_topic(&mut self, topic: &str, reason: &str) -> &mut Self {
            self.failing_topics.insert(topic.to_string(), DeliveryFailure::new(reason));
            self
        }

        /// Lets deliveries to `topic` succeed again.
        pub fn recover_topic(&mut self, topic: &str) -> &mut Self {
            self.failing_topics.remove(topic);
            self
        }

        /// Makes resolution of `topic` fail.
        pub fn fail_resolution(&mut self, topic: &str) -> &mut Self {
            self.unresolvable_topics.insert(topic.to_string());
            self
        }

        /// Reports `QueueFull` while `capacity` reports are outstanding.
        pub fn with_queue_capacity(&mut self, capacity: usize) -> &mut Self {
            self.queue_capacity = Some(capacity);
            self
        }

        /// Limits how many reports a single `poll` delivers.
        pub fn with_reports_per_poll(&mut self, limit: usize) -> &mut Self {
            self.reports_per_poll = Some(limit.max(1));
            self
        }

        /// Queues a report for the next `poll`, e.g. a stale or foreign one.
        pub fn inject_report(&mut self, report: DeliveryReport) -> &mut Self {
            self.outstanding.push_back(report);
            self
        }

        /// Every accepted submission, in order.
        pub fn submissions(&self) -> &[SubmittedRecord] {
            &self.submissions
        }

        /// Accepted submissions carrying `token`.
        pub fn submissions_for(&self, token: CorrelationToken) -> Vec<&SubmittedRecord> {
            self.submissions.iter().filter(|record| record.token == token).collect()
        }

        /// Total submit calls, including refused ones.
        pub fn submit_calls(&self) -> usize {
            self.submit_calls
        }

        /// Number of `poll` calls.
        pub fn poll_count(&self) -> usize {
            self.poll_count
        }

        /// Number of times `topic` was resolved.
        pub fn resolve_calls(&self, topic: &str) -> usize {
            self.resolve_calls.get(topic).copied().unwrap_or(0)
        }

        /// Reports accepted but not yet delivered through `poll`.
        pub fn outstanding_reports(&self) -> usize {
            self.outstanding.len()
        }

        fn outcome_for(&mut self, topic: &str) -> Option<DeliveryFailure> {
            if let Some(failure) = self.failing_topics.get(topic) {
                return Some(failure.clone());
            }
            self.failing_deliveries.pop_front()
        }
    }

    impl Transport for ScriptedTransport {
        type Topic = MockTopic;

        fn resolve_topic(&mut self, name: &str) -> Result<MockTopic> {
            *self.resolve_calls.entry(name.to_string()).or_default() += 1;
            if self.unresolvable_topics.contains(name) {
                return Err(BufferError::topic_resolution(name, "unknown topic"));
            }
            self.resolutions += 1;
            Ok(MockTopic { name: Arc::from(name), id: self.resolutions })
        }

        fn submit(
            &mut self,
            message: &BufferedMessage<MockTopic>,
            token: CorrelationToken,
        ) -> std::result::Result<(), SubmitError> {
            self.submit_calls += 1;
            if let Some(error) = self.submit_script.pop_front() {
                return Err(error);
            }
            if self.queue_capacity.is_some_and(|capacity| self.outstanding.len() >= capacity) {
                return Err(SubmitError::QueueFull);
            }

            self.submissions.push(SubmittedRecord {
                token,
                topic: message.topic().name().to_string(),
                partition: message.partition(),
                key: message.key().clone(),
                payload: message.payload().clone(),
            });
            let report = match self.outcome_for(message.topic().name()) {
                Some(failure) => DeliveryReport::failed(token, failure),
                None => DeliveryReport::delivered(token),
            };
            self.outstanding.push_back(report);
            Ok(())
        }

        fn poll(&mut self, _timeout: Duration, reports: &mut dyn ReportSink) -> usize {
            self.poll_count += 1;
            let limit = self.reports_per_poll.unwrap_or(usize::MAX).min(self.outstanding.len());
            let batch: Vec<_> = self.outstanding.drain(..limit).collect();
            for report in batch {
                reports.on_report(report);
            }
            limit
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn message(topic: MockTopic) -> BufferedMessage<MockTopic> {
            BufferedMessage::new(topic, None, Bytes::new(), Bytes::from_static(b"p"))
        }

        #[test]
        fn accepted_submissions_acknowledged_on_poll() {
            let mut transport = ScriptedTransport::new();
            let topic = transport.resolve_topic("t").unwrap();
            let token = CorrelationToken::from_raw(1);

            transport.submit(&message(topic), token).unwrap();
            let mut received = Vec::new();
            let served = transport
                .poll(Duration::ZERO, &mut |report: DeliveryReport| received.push(report));

            assert_eq!(served, 1);
            assert_eq!(received, vec![DeliveryReport::delivered(token)]);
        }

        #[test]
        fn scripted_errors_consumed_in_order() {
            let mut transport = ScriptedTransport::new();
            transport.queue_full_next(1).reject_next("too large");
            let topic = transport.resolve_topic("t").unwrap();
            let token = CorrelationToken::from_raw(1);

            assert_eq!(
                transport.submit(&message(topic.clone()), token),
                Err(SubmitError::QueueFull)
            );
            assert!(matches!(
                transport.submit(&message(topic.clone()), token),
                Err(SubmitError::Rejected { .. })
            ));
            assert!(transport.submit(&message(topic), token).is_ok());
            assert_eq!(transport.submit_calls(), 3);
            assert_eq!(transport.submissions().len(), 1);
        }

        #[test]
        fn capacity_limits_outstanding_reports() {
            let mut transport = ScriptedTransport::new();
            transport.with_queue_capacity(1);
            let topic = transport.resolve_topic("t").unwrap();

            transport.submit(&message(topic.clone()), CorrelationToken::from_raw(1)).unwrap();
            assert_eq!(
                transport.submit(&message(topic.clone()), CorrelationToken::from_raw(2)),
                Err(SubmitError::QueueFull)
            );

            transport.poll(Duration::ZERO, &mut |_report: DeliveryReport| {});
            assert!(transport.submit(&message(topic), CorrelationToken::from_raw(2)).is_ok());
        }
    }
}
