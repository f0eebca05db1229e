mod container;
mod observer;
mod types;

pub use container::CacheContainer;
pub use observer::CacheObserverView;
pub use types::{CacheEntry, CacheEvent, CacheType, CacheUpdateEvent};
