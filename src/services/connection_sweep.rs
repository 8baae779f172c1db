//! Connection sweep service
//!
//! Periodically evicts connections that closed without unregistering and
//! drops meetings that no longer have anyone connected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument};

use crate::hub::{Registry, SweepStats};

pub struct ConnectionSweepService {
    registry: Arc<Registry>,
    interval: Duration,
}

impl ConnectionSweepService {
    pub fn new(registry: Arc<Registry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run until the shutdown flag flips to `true`
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting connection sweep service (interval: {}s)",
            self.interval.as_secs()
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Connection sweep service shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep pass
    pub fn sweep_once(&self) -> SweepStats {
        let stats = self.registry.sweep();

        if stats.evicted > 0 || stats.pruned_meetings > 0 {
            info!(
                evicted = stats.evicted,
                pruned_meetings = stats.pruned_meetings,
                "Swept stale connections"
            );
        } else {
            debug!(
                meetings = self.registry.meeting_count(),
                connections = self.registry.connection_count(),
                "Nothing to sweep"
            );
        }

        stats
    }
}

/// Handle for stopping the sweep service
pub struct ConnectionSweepHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionSweepHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for ConnectionSweepHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Connection, Identity};

    fn join(registry: &Registry, meeting: &str, user: &str) -> Arc<Connection> {
        let (conn, _queue) = Connection::new(meeting, 8);
        conn.identify(Identity::new(user, user, ""));
        registry.register(conn.clone()).unwrap();
        conn
    }

    #[test]
    fn test_sweep_once_evicts_closed_connections() {
        let registry = Arc::new(Registry::new());
        let alice = join(&registry, "m1", "alice");
        join(&registry, "m1", "bob");
        let carol = join(&registry, "m2", "carol");

        alice.close();
        carol.close();

        let service = ConnectionSweepService::new(registry.clone(), Duration::from_secs(30));
        let stats = service.sweep_once();

        assert_eq!(stats.evicted, 2);
        assert_eq!(stats.pruned_meetings, 1);
        assert_eq!(registry.participants("m1"), vec!["bob".to_string()]);
        assert_eq!(registry.meeting_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_on_interval_and_stops_on_shutdown() {
        let registry = Arc::new(Registry::new());
        let alice = join(&registry, "m1", "alice");

        let (handle, rx) = ConnectionSweepHandle::new();
        let service = ConnectionSweepService::new(registry.clone(), Duration::from_secs(30));
        let task = tokio::spawn(async move { service.run(rx).await });

        alice.close();
        assert_eq!(registry.connection_count(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(registry.connection_count(), 0);

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
