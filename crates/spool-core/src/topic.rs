//! Memoized topic name resolution.

use std::collections::HashMap;

use tracing::debug;

use crate::error::Result;

/// Cache of resolved topic handles, keyed by name.
///
/// Entries are never evicted or invalidated for the lifetime of the cache. A
/// failed resolution is not cached, so the next lookup of that name asks the
/// transport again.
#[derive(Debug, Clone)]
pub struct TopicCache<H> {
    handles: HashMap<String, H>,
}

impl<H: Clone> TopicCache<H> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self { handles: HashMap::new() }
    }

    /// Returns the handle for `name`, calling `resolver` only on a miss.
    pub fn resolve<F>(&mut self, name: &str, resolver: F) -> Result<H>
    where
        F: FnOnce(&str) -> Result<H>,
    {
        if let Some(handle) = self.handles.get(name) {
            return Ok(handle.clone());
        }

        let handle = resolver(name)?;
        debug!(topic = name, "resolved topic handle");
        self.handles.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Number of cached topics.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` when no topic has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns `true` if `name` has a cached handle.
    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }
}

impl<H: Clone> Default for TopicCache<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::BufferError;

    #[test]
    fn second_lookup_hits_cache() {
        let mut cache = TopicCache::new();
        let calls = Cell::new(0);
        let resolver = |name: &str| {
            calls.set(calls.get() + 1);
            Ok(name.len())
        };

        assert_eq!(cache.resolve("orders", resolver).unwrap(), 6);
        assert_eq!(cache.resolve("orders", resolver).unwrap(), 6);

        assert_eq!(calls.get(), 1);
        assert!(cache.contains("orders"));
    }

    #[test]
    fn failed_resolution_not_cached() {
        let mut cache: TopicCache<u32> = TopicCache::new();

        let error = cache
            .resolve("missing", |name| Err(BufferError::topic_resolution(name, "unknown topic")))
            .unwrap_err();
        assert!(matches!(error, BufferError::TopicResolution { .. }));
        assert!(cache.is_empty());

        assert_eq!(cache.resolve("missing", |_| Ok(9)).unwrap(), 9);
        assert_eq!(cache.len(), 1);
    }
}
