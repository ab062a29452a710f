//! Periodic full-ledger validation.
//!
//! Hashing is blocking I/O, so each sweep runs on the blocking pool. The
//! ledger hands out an `Arc` snapshot, so on-demand validations and new
//! registrations proceed while a sweep is in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::ledger::IntegrityLedger;
use crate::models::Recommendation;

/// Spawns a task that validates the whole ledger every `interval`.
///
/// The first sweep runs immediately. Abort the returned handle to stop.
pub fn spawn_sweep(ledger: Arc<IntegrityLedger>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let ledger = Arc::clone(&ledger);
            match tokio::task::spawn_blocking(move || ledger.validate_all()).await {
                Ok(Ok(summary)) => {
                    if summary.recommendation == Recommendation::Block {
                        warn!(tampered = summary.tampered, "integrity sweep found tampered components");
                    }
                }
                Ok(Err(e)) => error!(error = %e, "integrity sweep failed"),
                Err(e) => error!(error = %e, "integrity sweep task panicked"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, AuditLog};

    #[tokio::test]
    async fn test_sweep_detects_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched");
        std::fs::write(&path, "v1").unwrap();

        let audit = AuditLog::temporary().unwrap();
        let ledger = Arc::new(IntegrityLedger::temporary().unwrap().with_audit(audit.clone()));
        ledger.register("watched", &path, true).unwrap();
        std::fs::write(&path, "v2").unwrap();

        let handle = spawn_sweep(Arc::clone(&ledger), Duration::from_millis(20));
        let mut found = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if audit
                .records()
                .unwrap()
                .iter()
                .any(|r| matches!(r.event, AuditEvent::IntegrityTampered { .. }))
            {
                found = true;
                break;
            }
        }
        handle.abort();
        assert!(found, "sweep never reported the tampered component");
    }
}
