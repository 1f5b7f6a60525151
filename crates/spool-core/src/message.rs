//! Message descriptions accepted and buffered by the producer.

use bytes::Bytes;

/// Partition number as understood by the transport.
pub type Partition = i32;

/// Description of a message to buffer, addressed by topic name.
///
/// Built with `BufferedProducer::make_builder` or `MessageBuilder::new` and
/// handed to `BufferedProducer::add_message`, which resolves the topic name
/// to a transport handle.
///
/// ```
/// use spool_core::MessageBuilder;
///
/// let message = MessageBuilder::new("orders").partition(3).key("user-1").payload("created");
///
/// assert_eq!(message.topic(), "orders");
/// assert_eq!(message.partition_id(), Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBuilder {
    topic: String,
    partition: Option<Partition>,
    key: Bytes,
    payload: Bytes,
}

impl MessageBuilder {
    /// Starts a message for the given topic with no partition, key or payload.
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), partition: None, key: Bytes::new(), payload: Bytes::new() }
    }

    /// Pins the message to a partition. Unset lets the transport choose.
    #[must_use]
    pub fn partition(mut self, partition: Partition) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Sets the message key.
    #[must_use]
    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = key.into();
        self
    }

    /// Sets the message payload.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Topic name this message is addressed to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partition, if pinned.
    pub fn partition_id(&self) -> Option<Partition> {
        self.partition
    }

    /// Key bytes, empty when unset.
    pub fn key_bytes(&self) -> &Bytes {
        &self.key
    }

    /// Payload bytes, empty when unset.
    pub fn payload_bytes(&self) -> &Bytes {
        &self.payload
    }

    /// Binds the description to a resolved topic handle.
    pub(crate) fn bind<H>(self, topic: H) -> BufferedMessage<H> {
        BufferedMessage { topic, partition: self.partition, key: self.key, payload: self.payload }
    }
}

/// A message held in the buffer, bound to a resolved topic handle `H`.
///
/// Content never changes after buffering; every resubmission sends the same
/// bytes. Cloning shares the underlying key and payload buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage<H> {
    topic: H,
    partition: Option<Partition>,
    key: Bytes,
    payload: Bytes,
}

impl<H> BufferedMessage<H> {
    /// Creates a buffered message from its parts.
    pub fn new(topic: H, partition: Option<Partition>, key: Bytes, payload: Bytes) -> Self {
        Self { topic, partition, key, payload }
    }

    /// Resolved topic handle.
    pub fn topic(&self) -> &H {
        &self.topic
    }

    /// Partition, if pinned.
    pub fn partition(&self) -> Option<Partition> {
        self.partition
    }

    /// Key bytes.
    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_empty_unpinned_message() {
        let builder = MessageBuilder::new("events");

        assert_eq!(builder.topic(), "events");
        assert_eq!(builder.partition_id(), None);
        assert!(builder.key_bytes().is_empty());
        assert!(builder.payload_bytes().is_empty());
    }

    #[test]
    fn binding_preserves_content() {
        let message = MessageBuilder::new("events")
            .partition(2)
            .key(&b"k"[..])
            .payload(vec![1u8, 2, 3])
            .bind(17u32);

        assert_eq!(*message.topic(), 17);
        assert_eq!(message.partition(), Some(2));
        assert_eq!(message.key().as_ref(), b"k");
        assert_eq!(message.payload().as_ref(), &[1, 2, 3]);
    }
}
