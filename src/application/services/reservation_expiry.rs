//! Background task that periodically prunes expired reservations.
//!
//! Reads already prune lazily; this keeps aggregates of idle chargers from
//! accumulating dead reservations between reads.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::domain::ChargerStore;
use crate::shared::ShutdownSignal;

/// Start the reservation expiry background task.
pub fn start_reservation_expiry_task(
    store: Arc<dyn ChargerStore>,
    shutdown: ShutdownSignal,
    check_interval_secs: u64,
) {
    tokio::spawn(async move {
        info!(
            check_interval = check_interval_secs,
            "📅 Reservation expiry task started"
        );

        let mut interval = tokio::time::interval(Duration::from_secs(check_interval_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = prune_expired(&store).await {
                        warn!(error = %e, "Reservation expiry check error");
                    }
                }
                _ = shutdown.wait() => {
                    info!("📅 Reservation expiry task shutting down");
                    break;
                }
            }
        }
    });
}

async fn prune_expired(store: &Arc<dyn ChargerStore>) -> crate::domain::DomainResult<()> {
    let now = Utc::now();

    for charger in store.list_chargers().await? {
        let expired: Vec<i32> = charger
            .reservations
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.reservation_id)
            .collect();
        if expired.is_empty() {
            continue;
        }

        info!(
            charge_point_id = charger.charge_point_id.as_str(),
            count = expired.len(),
            "Pruning expired reservations"
        );
        store
            .apply_charger_mutation(
                &charger.charge_point_id,
                Box::new(move |c| {
                    for id in expired {
                        c.remove_reservation(id);
                    }
                }),
            )
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Reservation;
    use crate::infrastructure::InMemoryStore;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn prunes_expired_keeps_active() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_charger("C1").await.unwrap();
        store
            .apply_charger_mutation(
                "C1",
                Box::new(|c| {
                    c.add_reservation(Reservation::new(
                        1,
                        1,
                        "OLD",
                        None,
                        Utc::now() - ChronoDuration::minutes(1),
                    ));
                    c.add_reservation(Reservation::new(
                        2,
                        1,
                        "NEW",
                        None,
                        Utc::now() + ChronoDuration::hours(1),
                    ));
                }),
            )
            .await
            .unwrap();

        let store_dyn: Arc<dyn ChargerStore> = store.clone();
        prune_expired(&store_dyn).await.unwrap();

        let charger = store.get_charger("C1").await.unwrap().unwrap();
        assert_eq!(charger.reservations.len(), 1);
        assert!(charger.reservations.contains_key(&2));
    }

    #[tokio::test]
    async fn noop_without_reservations() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_charger("C1").await.unwrap();
        let store_dyn: Arc<dyn ChargerStore> = store.clone();
        prune_expired(&store_dyn).await.unwrap();
        assert!(store.get_charger("C1").await.unwrap().unwrap().reservations.is_empty());
    }
}
