//! Periodic removal of idle sessions

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::BoxedSessionStorage;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Background task expiring sessions idle for longer than the configured TTL
pub struct SessionSweeper;

impl SessionSweeper {
    /// Sweep interval for a TTL: half of it, never zero
    pub fn interval_for(ttl: Duration) -> Duration {
        (ttl / 2).max(MIN_SWEEP_INTERVAL)
    }

    /// Spawn the sweep loop; it exits once `shutdown` is cancelled
    pub fn spawn(
        storage: Arc<BoxedSessionStorage>,
        ttl: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let period = Self::interval_for(ttl);
        info!(
            ttl_secs = ttl.as_secs_f64(),
            interval_secs = period.as_secs_f64(),
            "Session sweeper started"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Session sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        match storage.expire_sessions(ttl).await {
                            Ok(expired) => {
                                for session_id in &expired {
                                    debug!(session_id = %session_id, "Session expired");
                                }
                            }
                            Err(e) => error!("Session sweep failed: {}", e),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemorySessionStorage, SessionStorage};

    #[test]
    fn test_interval_is_half_ttl() {
        assert_eq!(
            SessionSweeper::interval_for(Duration::from_secs(1800)),
            Duration::from_secs(900)
        );
        assert_eq!(
            SessionSweeper::interval_for(Duration::ZERO),
            MIN_SWEEP_INTERVAL
        );
    }

    #[tokio::test]
    async fn test_sweeper_removes_idle_sessions() {
        let storage: Arc<BoxedSessionStorage> = Arc::new(InMemorySessionStorage::new());
        let id = storage.create_session().await.unwrap().session_id;

        let shutdown = CancellationToken::new();
        let handle = SessionSweeper::spawn(
            Arc::clone(&storage),
            Duration::from_millis(40),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!storage.list_session_ids().await.unwrap().contains(&id));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let storage: Arc<BoxedSessionStorage> = Arc::new(InMemorySessionStorage::new());
        let shutdown = CancellationToken::new();
        let handle = SessionSweeper::spawn(storage, Duration::from_secs(60), shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop promptly")
            .unwrap();
    }
}
