use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::container::CacheContainer;
use super::types::{CacheType, CacheUpdateEvent};

/// One observer's view of the cache timestamps it has been shown.
///
/// Delivery is at most once per unique timestamp and never moves backwards
/// for a cache type, however late an event arrives.
#[derive(Debug, Clone, Default)]
pub struct CacheObserverView {
    seen: HashMap<CacheType, DateTime<Utc>>,
}

impl CacheObserverView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self, cache_type: CacheType) -> Option<CacheUpdateEvent> {
        self.seen
            .get(&cache_type)
            .map(|timestamp| CacheUpdateEvent {
                cache_type,
                timestamp: *timestamp,
            })
    }

    /// Record `event` if it is strictly newer than anything seen for its
    /// type. Returns whether it should be delivered.
    pub fn accept(&mut self, event: &CacheUpdateEvent) -> bool {
        match self.seen.get(&event.cache_type) {
            Some(seen) if *seen >= event.timestamp => false,
            _ => {
                self.seen.insert(event.cache_type, event.timestamp);
                true
            }
        }
    }

    /// Pull the container's current event for `cache_type` if this view is
    /// behind it.
    pub fn poll(
        &mut self,
        container: &CacheContainer,
        cache_type: CacheType,
    ) -> Option<CacheUpdateEvent> {
        let last = self.last_seen(cache_type);
        let event = container.check_and_raise_events_if_cache_newer(cache_type, last.as_ref())?;
        self.accept(&event).then_some(event)
    }

    pub fn poll_all(&mut self, container: &CacheContainer) -> Vec<CacheUpdateEvent> {
        CacheType::ALL
            .into_iter()
            .filter_map(|t| self.poll(container, t))
            .collect()
    }
}
