//! Periodic reclamation of sessions that outlived their maximum age.

use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info};
use voice_proxy_core::SessionManager;

/// Spawns a task that sweeps `sessions` every `interval`, stopping and
/// removing those older than `max_age`. Abort the handle to stop sweeping.
pub fn spawn_session_sweeper(
    sessions: Arc<SessionManager>,
    interval: Duration,
    max_age: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?interval, ?max_age, "Session sweeper started.");
        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_stale_sessions(max_age).await;
            debug!(removed, "Session sweep finished.");
        }
    })
}
