//! Revoked-token index with TTL eviction.
//!
//! Prefers a shared Redis store so revocations propagate across instances;
//! any shared-store error degrades to the in-process bounded set so the
//! revocation check never takes availability down with it. Callers must
//! treat a negative answer as "not known revoked" - signature and expiry
//! checks still apply independently.

use chrono::{DateTime, Duration, Utc};
use forge_core::{Clock, Result};
use redis::aio::ConnectionManager;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Key prefix shared with the main system so tokens revoked in either are
/// rejected by both.
pub const BLACKLIST_KEY_PREFIX: &str = "forge:token:blacklist:";

#[derive(Debug, Clone)]
pub struct BlacklistConfig {
    /// Max entries held in the in-process fallback set.
    pub max_local_entries: usize,
    /// How often the expiry sweep runs over the local set.
    pub cleanup_interval: Duration,
    /// TTL applied in the shared store when the token expiry is unknown.
    pub default_ttl: Duration,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            max_local_entries: 50_000,
            cleanup_interval: Duration::minutes(5),
            default_ttl: Duration::hours(24),
        }
    }
}

struct LocalBlacklist {
    entries: HashMap<String, Option<DateTime<Utc>>>,
    insertion_order: VecDeque<String>,
    last_cleanup: DateTime<Utc>,
}

impl LocalBlacklist {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            last_cleanup: now,
        }
    }

    fn add(&mut self, jti: &str, expires_at: Option<DateTime<Utc>>) {
        if self.entries.insert(jti.to_string(), expires_at).is_none() {
            self.insertion_order.push_back(jti.to_string());
        }
    }

    fn contains(&self, jti: &str) -> bool {
        self.entries.contains_key(jti)
    }

    /// Drop entries whose expiry passed. Runs at most once per interval.
    fn maybe_cleanup(&mut self, now: DateTime<Utc>, interval: Duration) {
        if now - self.last_cleanup < interval {
            return;
        }
        self.last_cleanup = now;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, exp)| matches!(exp, Some(e) if *e < now))
            .map(|(jti, _)| jti.clone())
            .collect();
        for jti in &expired {
            self.entries.remove(jti);
        }
        self.insertion_order
            .retain(|jti| self.entries.contains_key(jti));
    }

    /// When the set exceeds its cap, discard the oldest 10% by insertion
    /// order.
    fn evict_if_needed(&mut self, max_entries: usize) {
        if self.entries.len() <= max_entries {
            return;
        }
        let drop_count = (self.entries.len() / 10).max(1);
        for _ in 0..drop_count {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

/// Token revocation index with shared-store preference and local fallback.
pub struct TokenBlacklist {
    config: BlacklistConfig,
    clock: Arc<dyn Clock>,
    redis: Mutex<Option<ConnectionManager>>,
    local: Mutex<LocalBlacklist>,
}

impl TokenBlacklist {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, BlacklistConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: BlacklistConfig) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            redis: Mutex::new(None),
            local: Mutex::new(LocalBlacklist::new(now)),
        }
    }

    /// Connect the shared store. Failure keeps the local set as the only
    /// backend and is not an error for the caller.
    pub async fn connect_shared(&self, redis_url: &str) -> bool {
        match redis::Client::open(redis_url) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(mut manager) => {
                    let ping: redis::RedisResult<String> =
                        redis::cmd("PING").query_async(&mut manager).await;
                    if let Err(e) = ping {
                        warn!(error = %e, "blacklist shared store ping failed, using local set");
                        return false;
                    }
                    *self.redis.lock().await = Some(manager);
                    info!("token blacklist connected to shared store");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "blacklist shared store unavailable, using local set");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "invalid shared store URL, using local set");
                false
            }
        }
    }

    /// Whether a token id is known revoked. Shared-store errors fall through
    /// to the local set.
    pub async fn is_blacklisted(&self, jti: &str) -> bool {
        if jti.is_empty() {
            return false;
        }

        let mut guard = self.redis.lock().await;
        if let Some(manager) = guard.as_mut() {
            let key = format!("{}{}", BLACKLIST_KEY_PREFIX, jti);
            let result: redis::RedisResult<bool> = redis::cmd("EXISTS")
                .arg(&key)
                .query_async(manager)
                .await;
            match result {
                Ok(exists) => return exists,
                Err(e) => {
                    warn!(error = %e, "blacklist shared store error, falling back to local");
                }
            }
        }
        drop(guard);

        let now = self.clock.now();
        let mut local = self.local.lock().await;
        local.maybe_cleanup(now, self.config.cleanup_interval);
        local.contains(jti)
    }

    /// Revoke a token id. No-op when the expiry already passed.
    pub async fn add(&self, jti: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        if jti.is_empty() {
            return Ok(());
        }

        let now = self.clock.now();
        let ttl = match expires_at {
            Some(exp) => {
                let remaining = exp - now;
                if remaining <= Duration::zero() {
                    return Ok(());
                }
                remaining
            }
            None => self.config.default_ttl,
        };

        let mut guard = self.redis.lock().await;
        if let Some(manager) = guard.as_mut() {
            let key = format!("{}{}", BLACKLIST_KEY_PREFIX, jti);
            let result: redis::RedisResult<()> = redis::cmd("SETEX")
                .arg(&key)
                .arg(ttl.num_seconds().max(1))
                .arg("1")
                .query_async(manager)
                .await;
            match result {
                Ok(()) => {
                    debug!(jti = %&jti[..jti.len().min(16)], "token blacklisted in shared store");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "blacklist shared store error, writing to local set");
                }
            }
        }
        drop(guard);

        let mut local = self.local.lock().await;
        local.add(jti, expires_at);
        local.maybe_cleanup(now, self.config.cleanup_interval);
        local.evict_if_needed(self.config.max_local_entries);
        debug!(jti = %&jti[..jti.len().min(16)], "token blacklisted locally");
        Ok(())
    }

    /// Number of entries in the local set. Exposed for eviction checks.
    pub async fn local_len(&self) -> usize {
        self.local.lock().await.entries.len()
    }

    /// Release the shared-store connection.
    pub async fn close(&self) {
        *self.redis.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use forge_core::ManualClock;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn add_then_lookup() {
        let clock = clock();
        let blacklist = TokenBlacklist::new(clock.clone());
        let exp = clock.now() + Duration::hours(1);

        blacklist.add("j1", Some(exp)).await.unwrap();
        assert!(blacklist.is_blacklisted("j1").await);
        assert!(!blacklist.is_blacklisted("j2").await);
    }

    #[tokio::test]
    async fn expired_token_is_a_noop() {
        let clock = clock();
        let blacklist = TokenBlacklist::new(clock.clone());
        let past = clock.now() - Duration::seconds(1);

        blacklist.add("j1", Some(past)).await.unwrap();
        assert!(!blacklist.is_blacklisted("j1").await);
        assert_eq!(blacklist.local_len().await, 0);
    }

    #[tokio::test]
    async fn expiry_sweep_drops_stale_entries() {
        let clock = clock();
        let blacklist = TokenBlacklist::new(clock.clone());
        blacklist
            .add("j1", Some(clock.now() + Duration::minutes(1)))
            .await
            .unwrap();

        // Past the token expiry and past the sweep interval.
        clock.advance(Duration::minutes(10));
        assert!(!blacklist.is_blacklisted("j1").await);
        assert_eq!(blacklist.local_len().await, 0);
    }

    #[tokio::test]
    async fn eviction_keeps_size_bounded_and_recent_entries() {
        let clock = clock();
        let config = BlacklistConfig {
            max_local_entries: 100,
            ..Default::default()
        };
        let blacklist = TokenBlacklist::with_config(clock.clone(), config);
        let exp = clock.now() + Duration::hours(1);

        for i in 0..101 {
            blacklist.add(&format!("jti-{i}"), Some(exp)).await.unwrap();
        }

        assert!(blacklist.local_len().await <= 100);
        // Oldest entries went first; the most recent survive.
        assert!(!blacklist.is_blacklisted("jti-0").await);
        assert!(blacklist.is_blacklisted("jti-100").await);
    }

    #[tokio::test]
    async fn empty_jti_is_ignored() {
        let clock = clock();
        let blacklist = TokenBlacklist::new(clock.clone());
        blacklist.add("", None).await.unwrap();
        assert!(!blacklist.is_blacklisted("").await);
    }
}
