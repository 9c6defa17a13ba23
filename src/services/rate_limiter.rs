//! Rate limiter for login attempts
//!
//! Counts login attempts per username in a sliding window. Keys are the
//! exact username, matching how identities are looked up, so attempts
//! against "ALICE" never spend the budget of "alice".

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::LoginLimitConfig;

/// Login rate limiter
pub struct LoginRateLimiter {
    /// Failed login attempts by username
    attempts: Arc<RwLock<HashMap<String, Vec<DateTime<Utc>>>>>,
    max_attempts: usize,
    window: Duration,
}

impl LoginRateLimiter {
    /// Create a new rate limiter
    pub fn new(config: &LoginLimitConfig) -> Self {
        Self {
            attempts: Arc::new(RwLock::new(HashMap::new())),
            max_attempts: config.max_attempts,
            window: Duration::minutes(config.window_minutes),
        }
    }

    /// Check if username has used up its attempts for the window
    pub async fn is_username_limited(&self, username: &str) -> bool {
        let mut attempts = self.attempts.write().await;
        self.prune_and_count(&mut attempts, username) >= self.max_attempts
    }

    /// Reserve one attempt for username.
    ///
    /// Returns `false` without recording anything when the budget is spent.
    /// The check and the record happen under one lock, so concurrent logins
    /// cannot all slip past the limit before any of them is counted.
    pub async fn try_acquire_attempt(&self, username: &str) -> bool {
        let mut attempts = self.attempts.write().await;
        if self.prune_and_count(&mut attempts, username) >= self.max_attempts {
            return false;
        }

        attempts
            .entry(username.to_string())
            .or_default()
            .push(Utc::now());
        true
    }

    /// Clear attempts for username (on successful login)
    pub async fn clear_username_attempts(&self, username: &str) {
        let mut attempts = self.attempts.write().await;
        attempts.remove(username);
    }

    fn prune_and_count(
        &self,
        attempts: &mut HashMap<String, Vec<DateTime<Utc>>>,
        username: &str,
    ) -> usize {
        let cutoff = Utc::now() - self.window;
        let Some(times) = attempts.get_mut(username) else {
            return 0;
        };

        times.retain(|time| *time > cutoff);
        let count = times.len();
        if count == 0 {
            attempts.remove(username);
        }
        count
    }

    /// Drop attempts older than the window. Returns the number of usernames
    /// still tracked.
    pub async fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - self.window;

        let mut attempts = self.attempts.write().await;
        attempts.retain(|_, times| {
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
        attempts.len()
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(&LoginLimitConfig::default())
    }
}
