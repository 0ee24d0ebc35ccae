#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Construction-time options for the read caches.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct CacheConfig {
    /// Load the whole base model when the cache is built instead of on demand.
    pub prefetch: bool,
    /// Log every read that has to reach the base at `warn` instead of `trace`.
    pub warn_on_uncached_access: bool,
}

impl CacheConfig {
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_warn_on_uncached_access(mut self, warn: bool) -> Self {
        self.warn_on_uncached_access = warn;
        self
    }
}
