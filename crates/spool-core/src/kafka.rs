//! Kafka transport over librdkafka's polling producer.
//!
//! The correlation token travels as the record's delivery opaque. librdkafka
//! hands it back to `CorrelatingContext::delivery` from inside
//! `BaseProducer::poll`, where the outcome is recorded and then forwarded to
//! the producer's report sink before `poll` returns.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rdkafka::{
    config::ClientConfig,
    error::{KafkaError, RDKafkaErrorCode},
    producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext},
    ClientContext,
};
use tracing::info;

use crate::{
    config::ProducerConfig,
    error::{BufferError, DeliveryFailure, Result, SubmitError},
    message::BufferedMessage,
    producer::BufferedProducer,
    token::CorrelationToken,
    transport::{DeliveryReport, ReportSink, Transport},
};

/// Longest topic name Kafka accepts.
const MAX_TOPIC_NAME_LEN: usize = 249;

/// Resolved Kafka topic: a validated topic name.
pub type KafkaTopic = Arc<str>;

/// Producer context that records delivery outcomes by correlation token.
#[derive(Debug, Default)]
pub struct CorrelatingContext {
    reports: Mutex<Vec<DeliveryReport>>,
}

impl CorrelatingContext {
    /// Takes every report recorded since the last call.
    fn drain(&self) -> Vec<DeliveryReport> {
        let mut reports = self.reports.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *reports)
    }

    fn record(&self, report: DeliveryReport) {
        self.reports.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(report);
    }
}

impl ClientContext for CorrelatingContext {}

impl ProducerContext for CorrelatingContext {
    type DeliveryOpaque = usize;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, delivery_opaque: usize) {
        let token = CorrelationToken::from_raw(delivery_opaque);
        let report = match delivery_result {
            Ok(_) => DeliveryReport::delivered(token),
            Err((error, _)) => {
                DeliveryReport::failed(token, DeliveryFailure::new(error.to_string()))
            },
        };
        self.record(report);
    }
}

/// `Transport` backed by an rdkafka `BaseProducer`.
pub struct KafkaTransport {
    producer: BaseProducer<CorrelatingContext>,
}

impl KafkaTransport {
    /// Creates a transport for `brokers` with extra client `properties`.
    ///
    /// Properties are passed to librdkafka verbatim; invalid names or values
    /// fail construction with `BufferError::Configuration`.
    pub fn new<I, K, V>(brokers: &str, properties: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", brokers);
        for (key, value) in properties {
            client_config.set(key, value);
        }

        let producer = client_config
            .create_with_context(CorrelatingContext::default())
            .map_err(|e| BufferError::configuration(format!("failed to create producer: {e}")))?;

        info!(brokers, "kafka transport initialized");
        Ok(Self { producer })
    }

    /// Creates a transport from the broker list and client properties of
    /// `config`.
    pub fn from_config(config: &ProducerConfig) -> Result<Self> {
        Self::new(&config.brokers, config.client_properties.clone())
    }

    /// The underlying rdkafka producer.
    pub fn producer(&self) -> &BaseProducer<CorrelatingContext> {
        &self.producer
    }
}

impl std::fmt::Debug for KafkaTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaTransport")
            .field("in_flight", &self.producer.in_flight_count())
            .finish_non_exhaustive()
    }
}

impl Transport for KafkaTransport {
    type Topic = KafkaTopic;

    fn resolve_topic(&mut self, name: &str) -> Result<KafkaTopic> {
        validate_topic_name(name)?;
        Ok(Arc::from(name))
    }

    fn submit(
        &mut self,
        message: &BufferedMessage<KafkaTopic>,
        token: CorrelationToken,
    ) -> std::result::Result<(), SubmitError> {
        let mut record =
            BaseRecord::<'_, [u8], [u8], usize>::with_opaque_to(message.topic(), token.into_raw());
        if !message.key().is_empty() {
            record = record.key(&message.key()[..]);
        }
        if !message.payload().is_empty() {
            record = record.payload(&message.payload()[..]);
        }
        if let Some(partition) = message.partition() {
            record = record.partition(partition);
        }

        self.producer.send(record).map_err(|(error, _)| classify_send_error(&error))
    }

    fn poll(&mut self, timeout: Duration, reports: &mut dyn ReportSink) -> usize {
        self.producer.poll(timeout);

        let delivered = self.producer.context().drain();
        let count = delivered.len();
        for report in delivered {
            reports.on_report(report);
        }
        count
    }
}

impl BufferedProducer<KafkaTransport> {
    /// Builds a Kafka-backed producer from `config`.
    pub fn from_config(config: &ProducerConfig) -> Result<Self> {
        config.validate()?;
        let transport = KafkaTransport::from_config(config)?;
        Self::with_config(transport, config)
    }
}

fn classify_send_error(error: &KafkaError) -> SubmitError {
    match error {
        KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull) => SubmitError::QueueFull,
        other => SubmitError::rejected(other.to_string()),
    }
}

/// Checks `name` against Kafka's topic naming rules.
fn validate_topic_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BufferError::topic_resolution(name, "topic name is empty"));
    }
    if name == "." || name == ".." {
        return Err(BufferError::topic_resolution(name, "topic name cannot be '.' or '..'"));
    }
    if name.len() > MAX_TOPIC_NAME_LEN {
        return Err(BufferError::topic_resolution(
            name,
            format!("topic name longer than {MAX_TOPIC_NAME_LEN} characters"),
        ));
    }
    if let Some(invalid) =
        name.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(BufferError::topic_resolution(
            name,
            format!("invalid character {invalid:?} in topic name"),
        ));
    }
    Ok(())
}
