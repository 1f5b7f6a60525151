//! Correlation tokens and their allocator.
//!
//! A token is attached to every submission as opaque data and comes back
//! unchanged in the matching delivery report. It is pointer-width so that
//! transports which only carry a `void*`-sized opaque value can hold it
//! without boxing.

use std::fmt;

/// Opaque identifier of one buffered message.
///
/// Unique among the messages currently buffered by one producer. Ordering
/// follows allocation order, which is also submission order within a drain
/// wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationToken(usize);

impl CorrelationToken {
    /// Wraps a raw value received back from a transport.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw value to attach to a submission.
    pub const fn into_raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<CorrelationToken> for usize {
    fn from(token: CorrelationToken) -> Self {
        token.0
    }
}

/// Monotonic token counter scoped to one producer.
///
/// The counter advances on every allocation regardless of how many messages
/// are still buffered. Deriving tokens from the buffer size would reuse a
/// token still in flight as soon as an earlier message completes.
#[derive(Debug, Clone, Default)]
pub struct TokenAllocator {
    next: usize,
}

impl TokenAllocator {
    /// Creates an allocator whose first token is `#0`.
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Creates an allocator whose first token is `start`.
    pub fn starting_at(start: usize) -> Self {
        Self { next: start }
    }

    /// Issues the next token, wrapping at `usize::MAX`.
    ///
    /// Callers holding live tokens must skip values they still track; see
    /// `PendingStore::add`.
    pub fn allocate(&mut self) -> CorrelationToken {
        let token = CorrelationToken(self.next);
        self.next = self.next.wrapping_add(1);
        token
    }

    /// Value the next call to `allocate` returns.
    pub fn peek(&self) -> CorrelationToken {
        CorrelationToken(self.next)
    }
}
