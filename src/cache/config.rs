//! Cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_TTL_SECONDS: u64 = 3600;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of every cached record.
    pub ttl: Duration,
    /// Entry limit of the in-process store.
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECONDS),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            ttl: Duration::from_secs(settings.ttl_seconds.get()),
            memory_capacity: settings.memory_capacity.get() as usize,
        }
    }
}

impl CacheConfig {
    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_one_hour_ttl() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(3600));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let config = CacheConfig {
            memory_capacity: 0,
            ..CacheConfig::default()
        };
        assert_eq!(config.memory_capacity_non_zero().get(), 1);
    }
}
