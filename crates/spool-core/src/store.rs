//! Pending-message store.
//!
//! Owns every buffered message until the broker acknowledges it, keyed by
//! correlation token in allocation order, together with the set of tokens
//! waiting to be resubmitted after a failed delivery.
//!
//! Delivery reports can arrive while the flush loop is part-way through a
//! wave (the transport runs them from inside `poll`, and the submission loop
//! polls on backpressure). Nothing here hands out iterators over the live
//! map to the drain loop: it works on token snapshots returned by
//! `flush_wave` and `take_due_retries`, and looks each token up again before
//! using it.

use std::{collections::BTreeMap, time::Instant};

use crate::{
    error::DeliveryFailure,
    message::BufferedMessage,
    token::{CorrelationToken, TokenAllocator},
};

/// Where a buffered entry is in its delivery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Added but never accepted by the transport.
    Buffered,
    /// Accepted by the transport, awaiting a delivery report.
    InFlight,
    /// Last delivery failed; waiting in the retry set.
    RetryQueued,
}

/// A buffered message plus its delivery bookkeeping.
#[derive(Debug, Clone)]
pub struct PendingEntry<H> {
    message: BufferedMessage<H>,
    state: EntryState,
    attempts: u32,
    not_before: Option<Instant>,
    last_error: Option<DeliveryFailure>,
}

impl<H> PendingEntry<H> {
    fn new(message: BufferedMessage<H>) -> Self {
        Self {
            message,
            state: EntryState::Buffered,
            attempts: 0,
            not_before: None,
            last_error: None,
        }
    }

    /// The buffered message.
    pub fn message(&self) -> &BufferedMessage<H> {
        &self.message
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Number of times the transport has accepted this message.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Most recent broker-reported failure, if any.
    pub fn last_error(&self) -> Option<&DeliveryFailure> {
        self.last_error.as_ref()
    }
}

/// A message removed from the buffer by a bounded retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonedMessage<H> {
    /// Token the message was buffered under.
    pub token: CorrelationToken,
    /// The message content.
    pub message: BufferedMessage<H>,
    /// Delivery attempts made before giving up.
    pub attempts: u32,
    /// Failure reported for the final attempt.
    pub last_error: DeliveryFailure,
}

/// Token-keyed store of unacknowledged messages.
#[derive(Debug)]
pub struct PendingStore<H> {
    entries: BTreeMap<CorrelationToken, PendingEntry<H>>,
    retry: Vec<CorrelationToken>,
    allocator: TokenAllocator,
    abandoned: Vec<AbandonedMessage<H>>,
}

impl<H> PendingStore<H> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_allocator(TokenAllocator::new())
    }

    /// Creates an empty store drawing tokens from `allocator`.
    pub fn with_allocator(allocator: TokenAllocator) -> Self {
        Self { entries: BTreeMap::new(), retry: Vec::new(), allocator, abandoned: Vec::new() }
    }

    /// Buffers `message` under a freshly allocated token.
    ///
    /// Never blocks and performs no I/O. Once the counter has wrapped, values
    /// still held by live entries are skipped.
    pub fn add(&mut self, message: BufferedMessage<H>) -> CorrelationToken {
        let token = loop {
            let candidate = self.allocator.allocate();
            if !self.entries.contains_key(&candidate) {
                break candidate;
            }
        };
        self.entries.insert(token, PendingEntry::new(message));
        token
    }

    /// Returns the message buffered under `token`.
    pub fn get(&self, token: CorrelationToken) -> Option<&BufferedMessage<H>> {
        self.entries.get(&token).map(PendingEntry::message)
    }

    /// Returns the full entry buffered under `token`.
    pub fn entry(&self, token: CorrelationToken) -> Option<&PendingEntry<H>> {
        self.entries.get(&token)
    }

    /// Returns `true` if `token` is still buffered.
    pub fn contains(&self, token: CorrelationToken) -> bool {
        self.entries.contains_key(&token)
    }

    /// Removes and returns the message buffered under `token`.
    pub fn remove(&mut self, token: CorrelationToken) -> Option<BufferedMessage<H>> {
        self.entries.remove(&token).map(|entry| entry.message)
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every buffered token in allocation order.
    pub fn tokens(&self) -> Vec<CorrelationToken> {
        self.entries.keys().copied().collect()
    }

    /// Number of entries accepted by the transport and awaiting a report.
    pub fn in_flight(&self) -> usize {
        self.count_in_state(EntryState::InFlight)
    }

    /// Number of entries waiting in the retry set.
    pub fn retry_queued(&self) -> usize {
        self.retry.len()
    }

    fn count_in_state(&self, state: EntryState) -> usize {
        self.entries.values().filter(|entry| entry.state == state).count()
    }

    /// Snapshot of the tokens a new flush must submit, in token order.
    ///
    /// Every entry not currently in flight is included, which covers fresh
    /// messages as well as retries left over from an aborted flush. The retry
    /// set is cleared since its members are part of the wave.
    pub fn flush_wave(&mut self) -> Vec<CorrelationToken> {
        self.retry.clear();
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state != EntryState::InFlight)
            .map(|(token, _)| *token)
            .collect()
    }

    /// Records that the transport accepted `token`.
    ///
    /// An in-flight token never stays in the retry set. Returns `false` if
    /// the token is no longer buffered.
    pub fn mark_in_flight(&mut self, token: CorrelationToken) -> bool {
        let Some(entry) = self.entries.get_mut(&token) else {
            return false;
        };
        if entry.state == EntryState::RetryQueued {
            self.retry.retain(|queued| *queued != token);
        }
        entry.state = EntryState::InFlight;
        entry.attempts = entry.attempts.saturating_add(1);
        entry.not_before = None;
        true
    }

    /// Moves `token` into the retry set, eligible from `not_before`.
    ///
    /// Returns `false` if the token is unknown or already queued, so a
    /// duplicated failure report never schedules two resubmissions.
    pub fn queue_retry(
        &mut self,
        token: CorrelationToken,
        not_before: Instant,
        failure: DeliveryFailure,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(&token) else {
            return false;
        };
        entry.last_error = Some(failure);
        if entry.state == EntryState::RetryQueued {
            return false;
        }
        entry.state = EntryState::RetryQueued;
        entry.not_before = Some(not_before);
        self.retry.push(token);
        true
    }

    /// Drains the retry set of every token due at `now`.
    ///
    /// Tokens whose backoff has not elapsed stay queued. The returned
    /// snapshot keeps the order in which failures were reported.
    pub fn take_due_retries(&mut self, now: Instant) -> Vec<CorrelationToken> {
        let entries = &self.entries;
        let (due, waiting): (Vec<_>, Vec<_>) = self.retry.drain(..).partition(|token| {
            entries
                .get(token)
                .and_then(|entry| entry.not_before)
                .map_or(true, |not_before| not_before <= now)
        });
        self.retry = waiting;
        due
    }

    /// Earliest instant at which a queued retry becomes due.
    pub fn next_retry_due(&self) -> Option<Instant> {
        self.retry
            .iter()
            .filter_map(|token| self.entries.get(token).and_then(|entry| entry.not_before))
            .min()
    }

    /// Removes `token` from the buffer and keeps it as abandoned.
    ///
    /// Returns `false` if the token is no longer buffered.
    pub fn abandon(&mut self, token: CorrelationToken, failure: DeliveryFailure) -> bool {
        let Some(entry) = self.entries.remove(&token) else {
            return false;
        };
        self.retry.retain(|queued| *queued != token);
        self.abandoned.push(AbandonedMessage {
            token,
            message: entry.message,
            attempts: entry.attempts,
            last_error: failure,
        });
        true
    }

    /// Number of abandoned messages not yet taken.
    pub fn abandoned_len(&self) -> usize {
        self.abandoned.len()
    }

    /// Hands back every abandoned message, oldest first.
    pub fn take_abandoned(&mut self) -> Vec<AbandonedMessage<H>> {
        std::mem::take(&mut self.abandoned)
    }
}

impl<H> Default for PendingStore<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn message(payload: &'static str) -> BufferedMessage<&'static str> {
        BufferedMessage::new("t", None, Bytes::new(), Bytes::from(payload))
    }

    #[test]
    fn tokens_not_derived_from_store_size() {
        let mut store = PendingStore::new();
        let first = store.add(message("a"));
        let second = store.add(message("b"));

        // Completing the first entry shrinks the store to one element; a
        // size-derived token would now collide with `second`.
        store.remove(first);
        let third = store.add(message("c"));

        assert_ne!(third, second);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(second).map(|m| m.payload().clone()), Some(Bytes::from("b")));
    }

    #[test]
    fn wrapped_allocator_skips_live_tokens() {
        let mut store = PendingStore::with_allocator(TokenAllocator::starting_at(usize::MAX));
        let last = store.add(message("a"));
        let zero = store.add(message("b"));
        assert_eq!(last.into_raw(), usize::MAX);
        assert_eq!(zero.into_raw(), 0);

        // Simulate the counter coming all the way around while both are live.
        store.allocator = TokenAllocator::starting_at(usize::MAX);
        let next = store.add(message("c"));

        assert_eq!(next.into_raw(), 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn entries_iterate_in_token_order() {
        let mut store = PendingStore::new();
        let tokens: Vec<_> = (0..4).map(|_| store.add(message("x"))).collect();

        assert_eq!(store.tokens(), tokens);
        assert_eq!(store.flush_wave(), tokens);
    }

    #[test]
    fn flush_wave_skips_in_flight_entries() {
        let mut store = PendingStore::new();
        let in_flight = store.add(message("a"));
        let buffered = store.add(message("b"));
        store.mark_in_flight(in_flight);

        assert_eq!(store.flush_wave(), vec![buffered]);
        assert_eq!(store.in_flight(), 1);
    }

    #[test]
    fn duplicate_failure_queues_single_retry() {
        let mut store = PendingStore::new();
        let token = store.add(message("a"));
        store.mark_in_flight(token);
        let now = Instant::now();

        assert!(store.queue_retry(token, now, DeliveryFailure::new("timeout")));
        assert!(!store.queue_retry(token, now, DeliveryFailure::new("timeout")));

        assert_eq!(store.take_due_retries(now), vec![token]);
        assert_eq!(store.retry_queued(), 0);
    }

    #[test]
    fn resubmitted_entry_leaves_retry_set() {
        let mut store = PendingStore::new();
        let token = store.add(message("a"));
        store.mark_in_flight(token);
        store.queue_retry(token, Instant::now(), DeliveryFailure::new("x"));

        // Re-entered flush submits it again before the retry set is drained.
        store.mark_in_flight(token);

        assert_eq!(store.retry_queued(), 0);
        assert_eq!(store.entry(token).map(PendingEntry::attempts), Some(2));
    }

    #[test]
    fn retries_wait_for_backoff() {
        let mut store = PendingStore::new();
        let token = store.add(message("a"));
        let now = Instant::now();
        let later = now + Duration::from_secs(5);
        store.queue_retry(token, later, DeliveryFailure::new("leader not available"));

        assert!(store.take_due_retries(now).is_empty());
        assert_eq!(store.next_retry_due(), Some(later));
        assert_eq!(store.take_due_retries(later), vec![token]);
        assert_eq!(store.next_retry_due(), None);
    }

    #[test]
    fn abandon_moves_entry_out_of_buffer() {
        let mut store = PendingStore::new();
        let token = store.add(message("a"));
        store.mark_in_flight(token);
        store.queue_retry(token, Instant::now(), DeliveryFailure::new("x"));

        assert!(store.abandon(token, DeliveryFailure::new("fatal")));

        assert!(store.is_empty());
        assert_eq!(store.retry_queued(), 0);
        let abandoned = store.take_abandoned();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].token, token);
        assert_eq!(abandoned[0].attempts, 1);
        assert_eq!(store.abandoned_len(), 0);
    }
}
