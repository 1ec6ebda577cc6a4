//! Per-key call throttle for best-effort lookups
//!
//! State lives in process memory only. Under scale-out each instance keeps
//! its own view, which costs extra lookups but never affects correctness.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Throttle configuration
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum spacing between two permitted calls for the same key
    pub interval: Duration,
    /// Hard cap on tracked keys; stale keys are swept first, then the oldest
    pub max_entries: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600), // 1 hour
            max_entries: 10_000,
        }
    }
}

/// Lookup throttle
#[derive(Debug, Clone)]
pub struct LookupThrottle {
    config: ThrottleConfig,
    /// Last permitted call per key
    entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl LookupThrottle {
    /// Create a new throttle
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Whether a call for `key` may go ahead now; records the call if so
    pub async fn try_acquire(&self, key: &str) -> bool {
        self.try_acquire_at(key, Instant::now()).await
    }

    async fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.entries.lock().await;

        if let Some(last) = entries.get(key) {
            if now.saturating_duration_since(*last) < self.config.interval {
                debug!("Throttled lookup for key {}", key);
                return false;
            }
        }

        if !entries.contains_key(key) && entries.len() >= self.config.max_entries {
            let interval = self.config.interval;
            entries.retain(|_, last| now.saturating_duration_since(*last) < interval);

            // Every key is fresh: drop the oldest so the map stays bounded
            if entries.len() >= self.config.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, last)| **last)
                    .map(|(oldest, _)| oldest.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(key.to_string(), now);
        true
    }
}
