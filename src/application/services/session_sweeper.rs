//! Session sweeper
//!
//! Background task that removes registry entries whose connection is
//! observed closed and reaps sessions with no inbound activity past the
//! stale threshold. Lookups already sweep on demand; this bounds how long
//! a dead entry can linger when nobody asks for it.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::session::SharedSessionRegistry;
use crate::shared::ShutdownSignal;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to sweep, seconds.
    pub check_interval_secs: u64,
    /// Inbound silence after which a session is considered dead, seconds.
    pub stale_after_secs: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            stale_after_secs: 300,
        }
    }
}

/// Start the sweeper background task.
pub fn start_session_sweeper(
    registry: SharedSessionRegistry,
    config: SweeperConfig,
    shutdown: ShutdownSignal,
) {
    tokio::spawn(async move {
        info!(
            check_interval = config.check_interval_secs,
            stale_after = config.stale_after_secs,
            "🧹 Session sweeper started"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(config.check_interval_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => sweep(&registry, config.stale_after_secs),
                _ = shutdown.wait() => {
                    info!("🧹 Session sweeper shutting down");
                    break;
                }
            }
        }
    });
}

fn sweep(registry: &SharedSessionRegistry, stale_after_secs: i64) {
    let now = Utc::now();
    let mut reaped = 0usize;

    for id in registry.connected_ids() {
        let Some(session) = registry.get(&id) else {
            // get() already swept a closed entry.
            continue;
        };
        let silent_for = now
            .signed_duration_since(session.last_activity())
            .num_seconds();
        if silent_for > stale_after_secs {
            warn!(
                charge_point_id = id.as_str(),
                silent_secs = silent_for,
                "Reaping stale session"
            );
            session.close();
            registry.unbind(&session);
            reaped += 1;
        }
    }

    if reaped > 0 {
        info!(reaped, "Session sweep complete");
    } else {
        debug!("Session sweep found nothing to reap");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionRegistry};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn negative_threshold_reaps_everything() {
        let registry = SessionRegistry::shared();

        let (tx, _rx) = mpsc::unbounded_channel();
        let a = Arc::new(Session::new("CP-A", tx));
        registry.bind(a.clone());

        let (tx, _rx) = mpsc::unbounded_channel();
        let b = Arc::new(Session::new("CP-B", tx));
        registry.bind(b.clone());

        sweep(&registry, -1);
        assert!(!registry.is_connected("CP-A"));
        assert!(!registry.is_connected("CP-B"));
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn sweep_keeps_active_sessions_with_generous_threshold() {
        let registry = SessionRegistry::shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new("CP1", tx));
        registry.bind(session.clone());

        sweep(&registry, 3600);
        assert!(registry.is_connected("CP1"));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn sweep_drops_closed_entries() {
        let registry = SessionRegistry::shared();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new("CP1", tx));
        registry.bind(session.clone());

        session.close();
        sweep(&registry, 3600);
        assert!(!registry.is_connected("CP1"));
    }
}
