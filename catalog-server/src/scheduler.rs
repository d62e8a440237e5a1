//! The background refresh scheduler.
//!
//! One loop per plugin ticks every five seconds and drives three triggers:
//! the per-source background interval declared by its provider, the file
//! watcher for providers that expose a watch path, and manual refreshes via
//! [`RefreshScheduler::trigger`]. A per-source token bucket caps the total
//! refresh rate to protect downstream providers; the numbers are policy,
//! not contract.

use crate::error::ApiError;
use crate::plugins::PluginInstance;
use catalog_core::source::{SourceContext, SourceStatus};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::watch;

const TICK: Duration = Duration::from_secs(5);
const BUCKET_CAPACITY: f64 = 3.0;
const BUCKET_REFILL_PER_SEC: f64 = 0.2;

/// A small token bucket; one per `(plugin, source)`.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new() -> Self {
        TokenBucket {
            tokens: BUCKET_CAPACITY,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * BUCKET_REFILL_PER_SEC).min(BUCKET_CAPACITY);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SourceKey {
    plugin: String,
    source: String,
}

pub struct RefreshScheduler {
    instances: Arc<DashMap<String, Arc<PluginInstance>>>,
    /// Buckets sit behind a synchronous mutex; never held across an await.
    buckets: DashMap<SourceKey, std::sync::Mutex<TokenBucket>>,
    /// Last successful background refresh per source.
    last_refresh: DashMap<SourceKey, Instant>,
    /// Last observed mtime per watched file.
    watch_mtimes: DashMap<SourceKey, SystemTime>,
    shutdown: watch::Receiver<bool>,
}

impl RefreshScheduler {
    pub fn new(
        instances: Arc<DashMap<String, Arc<PluginInstance>>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        RefreshScheduler {
            instances,
            buckets: DashMap::new(),
            last_refresh: DashMap::new(),
            watch_mtimes: DashMap::new(),
            shutdown,
        }
    }

    fn acquire(&self, key: &SourceKey) -> bool {
        let bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| std::sync::Mutex::new(TokenBucket::new()));
        let mut guard = bucket.lock().expect("bucket lock poisoned");
        guard.try_acquire()
    }

    /// Manual refresh entry point used by the management handlers.
    pub async fn trigger(&self, plugin: &str, source: &str) -> Result<SourceStatus, ApiError> {
        let instance = self
            .instances
            .get(plugin)
            .map(|i| i.clone())
            .ok_or_else(|| ApiError::not_found(format!("plugin '{plugin}'")))?;
        let key = SourceKey {
            plugin: plugin.to_string(),
            source: source.to_string(),
        };
        if !self.acquire(&key) {
            return Err(ApiError::Transient {
                message: format!("refresh rate limit exceeded for source '{source}'"),
            });
        }
        let ctx = SourceContext::new(self.shutdown.clone());
        let status = instance.refresh_source(source, &ctx).await?;
        self.last_refresh.insert(key, Instant::now());
        Ok(status)
    }

    /// Drops per-source state after a source is deleted.
    pub fn forget_source(&self, plugin: &str, source: &str) {
        let key = SourceKey {
            plugin: plugin.to_string(),
            source: source.to_string(),
        };
        self.buckets.remove(&key);
        self.last_refresh.remove(&key);
        self.watch_mtimes.remove(&key);
    }

    /// Resets watcher state after a source config changed.
    pub fn sync_source(&self, plugin: &str, source: &str) {
        let key = SourceKey {
            plugin: plugin.to_string(),
            source: source.to_string(),
        };
        self.watch_mtimes.remove(&key);
        self.last_refresh.insert(key, Instant::now());
    }

    /// Spawns the per-plugin loops. Loops observe the shutdown channel at
    /// every tick and exit cleanly.
    pub fn start(self: &Arc<Self>) {
        for entry in self.instances.iter() {
            let plugin = entry.key().clone();
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.run_plugin_loop(plugin).await;
            });
        }
    }

    async fn run_plugin_loop(self: Arc<Self>, plugin: String) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_plugin(&plugin).await;
                }
                _ = shutdown.changed() => {
                    tracing::debug!(plugin = %plugin, "refresh loop exiting");
                    return;
                }
            }
            if *shutdown.borrow() {
                return;
            }
        }
    }

    async fn tick_plugin(&self, plugin: &str) {
        let Some(instance) = self.instances.get(plugin).map(|i| i.clone()) else {
            return;
        };
        if !instance.started() {
            return;
        }
        for cfg in instance.sources().await {
            if !cfg.enabled {
                continue;
            }
            let Some(provider) = instance.plugin().source_provider(&cfg.source_type) else {
                continue;
            };
            let key = SourceKey {
                plugin: plugin.to_string(),
                source: cfg.id.clone(),
            };

            let mut due = match self.last_refresh.get(&key) {
                Some(last) => last.elapsed() >= provider.refresh_interval(),
                None => true,
            };

            // The file watcher polls mtimes; a change forces a refresh
            // ahead of the interval.
            if !due {
                if let Some(path) = provider.watch_path(&cfg) {
                    if let Ok(mtime) = tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
                        let changed = self
                            .watch_mtimes
                            .get(&key)
                            .map(|prev| *prev != mtime)
                            .unwrap_or(false);
                        self.watch_mtimes.insert(key.clone(), mtime);
                        due = changed;
                    }
                }
            }

            if !due || !self.acquire(&key) {
                continue;
            }
            let ctx = SourceContext::new(self.shutdown.clone());
            if let Err(e) = instance.refresh_source(&cfg.id, &ctx).await {
                tracing::warn!(plugin = %plugin, source = %cfg.id, "background refresh failed: {e}");
            }
            self.last_refresh.insert(key, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_exhausts_and_refills() {
        let mut bucket = TokenBucket::new();
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        // Simulate elapsed time by back-dating the refill clock.
        bucket.last_refill = Instant::now() - Duration::from_secs(10);
        assert!(bucket.try_acquire());
    }
}
