//! Idempotent-replay cache.
//!
//! Maps caller-supplied `Idempotency-Key` values to the first successful
//! response (status + body). Entries expire after the configured TTL
//! (24 h default): lazily on read, and via a sweeper task that runs once a
//! minute until the cache is stopped. Stop is signalled exactly once;
//! repeated stops are a no-op.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use dashmap::DashMap;
use http::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Largest response body the cache will retain. Oversized responses pass
/// through uncached.
pub const MAX_CACHED_BODY: usize = 1024 * 1024;

struct Entry {
    status: StatusCode,
    body: Bytes,
    created_at: Instant,
}

/// Process-wide replay cache, constructor-injected into the pipeline.
pub struct IdempotencyCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
    stop: CancellationToken,
    stopped: AtomicBool,
}

impl IdempotencyCache {
    /// Creates the cache and starts its sweeper.
    pub fn new(ttl: Duration) -> Arc<Self> {
        let cache = Arc::new(Self {
            entries: DashMap::new(),
            ttl,
            stop: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        });

        let sweeper = cache.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = sweeper.stop.cancelled() => break,
                    _ = tick.tick() => sweeper.sweep(),
                }
            }
        });

        cache
    }

    /// Returns the cached response for `key`, dropping it if expired.
    pub fn get(&self, key: &str) -> Option<(StatusCode, Bytes)> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => {
                return Some((entry.status, entry.body.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Stores a response under `key`. The middleware only calls this for 2xx
    /// statuses and bodies under [`MAX_CACHED_BODY`].
    pub fn insert(&self, key: String, status: StatusCode, body: Bytes) {
        self.entries.insert(
            key,
            Entry {
                status,
                body,
                created_at: Instant::now(),
            },
        );
    }

    fn sweep(&self) {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.created_at.elapsed() < ttl);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "swept expired idempotency entries");
        }
    }

    /// Stops the sweeper. Safe to call more than once.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stop.cancel();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Drop for IdempotencyCache {
    fn drop(&mut self) {
        self.stop();
    }
}
