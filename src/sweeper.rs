//! Background deletion of expired idempotency keys
//!
//! Each tick issues one `DELETE ... WHERE expires_at < now`. A failed tick is logged and
//! retried on the next one; it never stops the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::IntakeError;
use crate::metrics;
use crate::services::events::{EventBus, IntakeEvent};
use crate::services::IdempotencyService;

pub struct IdempotencySweeper {
    idempotency: Arc<IdempotencyService>,
    events: Arc<EventBus>,
    interval: Duration,
}

impl IdempotencySweeper {
    pub fn new(idempotency: Arc<IdempotencyService>, events: Arc<EventBus>, interval: Duration) -> Self {
        Self { idempotency, events, interval }
    }

    /// Delete entries that expired before `now`
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, IntakeError> {
        let deleted = self.idempotency.purge_expired_at(now)?;
        metrics::record_sweep(deleted);

        if deleted > 0 {
            self.events.emit(IntakeEvent::IdempotencyKeysSwept { deleted });
        } else {
            debug!("No expired idempotency keys");
        }

        Ok(deleted)
    }

    pub fn sweep_once(&self) -> Result<usize, IntakeError> {
        self.sweep_at(Utc::now())
    }

    /// Sweep every interval until shutdown is signalled
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Idempotency sweeper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.sweep_once() {
                        metrics::record_sweep_failure();
                        warn!(error = %e, "Idempotency sweep failed, retrying next tick");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Idempotency sweeper shutting down");
                    break;
                }
            }
        }
    }
}

/// Spawn the sweeper loop as a background task
pub fn spawn_sweeper(
    sweeper: Arc<IdempotencySweeper>,
    shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { sweeper.run(shutdown).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CatalogDb;
    use crate::services::idempotency_service::BeginOutcome;
    use chrono::TimeDelta;

    fn setup(ttl_secs: u64) -> (Arc<IdempotencyService>, IdempotencySweeper, Arc<EventBus>) {
        let db = Arc::new(CatalogDb::open_in_memory().unwrap());
        let events = Arc::new(EventBus::new());
        let idem = Arc::new(IdempotencyService::new(db, events.clone(), Duration::from_secs(ttl_secs)));
        let sweeper = IdempotencySweeper::new(idem.clone(), events.clone(), Duration::from_millis(20));
        (idem, sweeper, events)
    }

    #[test]
    fn test_sweep_deletes_only_expired() {
        let (idem, sweeper, _) = setup(60);
        let t0 = Utc::now();

        idem.begin_at("old", b"a", t0 - TimeDelta::seconds(120)).unwrap();
        idem.begin_at("fresh", b"b", t0).unwrap();
        idem.complete("fresh", 201, b"{}").unwrap();

        assert_eq!(sweeper.sweep_at(t0).unwrap(), 1);
        assert_eq!(sweeper.sweep_at(t0).unwrap(), 0);

        let stats = idem.stats().unwrap();
        assert_eq!(stats.total_keys, 1);
        assert_eq!(stats.completed_keys, 1);
        assert!(matches!(idem.begin("fresh", b"b").unwrap(), BeginOutcome::Replay(_)));
    }

    #[tokio::test]
    async fn test_run_sweeps_and_stops() {
        let (idem, sweeper, events) = setup(60);
        let mut receiver = events.subscribe();
        idem.begin_at("old", b"a", Utc::now() - TimeDelta::seconds(120)).unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_sweeper(Arc::new(sweeper), rx);

        let event = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");
        assert!(matches!(event, IntakeEvent::IdempotencyKeysSwept { deleted: 1 }));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
        assert_eq!(idem.stats().unwrap().total_keys, 0);
    }
}
