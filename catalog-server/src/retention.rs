//! The audit retention worker.
//!
//! One long-lived loop that wakes daily, computes the cutoff as
//! `now - retentionDays` and deletes older audit events. With retention
//! disabled (days <= 0) the worker never starts. The loop is the sole
//! deleter of audit events in the process; in multi-replica deployments it
//! is expected to run behind leader election.

use crate::governance::AuditStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const SWEEP_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

pub fn spawn_retention_worker(
    audit: Arc<dyn AuditStore>,
    retention_days: i64,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if retention_days <= 0 {
        tracing::info!("audit retention disabled (days <= 0)");
        return None;
    }
    Some(tokio::spawn(async move {
        tracing::info!(days = retention_days, "audit retention worker started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_PERIOD) => {
                    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
                    match audit.delete_older_than(cutoff).await {
                        Ok(0) => {}
                        Ok(removed) => {
                            tracing::info!(removed, cutoff = %cutoff, "audit retention sweep")
                        }
                        Err(e) => tracing::warn!("audit retention sweep failed: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    tracing::debug!("audit retention worker exiting");
                    return;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::MemoryAuditStore;

    #[tokio::test]
    async fn disabled_retention_spawns_nothing() {
        let (_tx, rx) = watch::channel(false);
        assert!(spawn_retention_worker(Arc::new(MemoryAuditStore::new()), 0, rx.clone()).is_none());
        assert!(spawn_retention_worker(Arc::new(MemoryAuditStore::new()), -3, rx).is_none());
    }

    #[tokio::test]
    async fn worker_exits_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let handle = spawn_retention_worker(Arc::new(MemoryAuditStore::new()), 30, rx).unwrap();
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should observe shutdown")
            .unwrap();
    }
}
