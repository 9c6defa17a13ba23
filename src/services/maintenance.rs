//! Background maintenance
//!
//! A periodic task that purges expired sessions and stale login-throttle
//! entries. It stops when the shutdown channel flips to `true`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::services::auth::AuthService;
use crate::services::rate_limiter::LoginRateLimiter;

/// Spawn the session sweeper.
///
/// The first sweep runs one full `period` after startup. A failed sweep is
/// logged and retried on the next tick.
pub fn spawn_session_sweeper(
    auth: Arc<AuthService>,
    limiter: Arc<LoginRateLimiter>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => run_sweep(&auth, &limiter).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Session sweeper stopped");
    })
}

/// One maintenance pass
pub async fn run_sweep(auth: &AuthService, limiter: &LoginRateLimiter) {
    match auth.sweep_expired_sessions().await {
        Ok(0) => tracing::debug!("Session sweep: nothing expired"),
        Ok(count) => tracing::info!("Session sweep removed {} expired session(s)", count),
        Err(e) => tracing::warn!("Session sweep failed: {}", e),
    }

    limiter.cleanup().await;
}
