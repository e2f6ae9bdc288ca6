use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::handle::ServiceHandle;
use super::{DaemonError, ServiceError};
use crate::node::Node;

/// Start periodic garbage collection when enabled. The first sweep runs
/// one full period after start; a period that is zero or too large to
/// schedule is refused.
pub fn maybe_run_gc(
    enabled: bool,
    node: Arc<Node>,
    period: Duration,
    cancel: CancellationToken,
) -> Result<Option<ServiceHandle>, DaemonError> {
    if !enabled {
        return Ok(None);
    }
    let first = match tokio::time::Instant::now().checked_add(period) {
        Some(first) if !period.is_zero() => first,
        _ => return Err(DaemonError::InvalidGcPeriod(period)),
    };

    info!("Garbage collection every {:?}", period);
    Ok(Some(ServiceHandle::spawn("gc", async move {
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    node.storage()
                        .collect_garbage()
                        .await
                        .map_err(ServiceError::Gc)?;
                }
            }
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Exchange, LedgerBook, NodeError, StorageEngine};
    use async_trait::async_trait;

    struct FailingStorage;

    #[async_trait]
    impl StorageEngine for FailingStorage {
        async fn storage_usage(&self) -> Result<u64, NodeError> {
            Ok(0)
        }

        async fn collect_garbage(&self) -> Result<usize, NodeError> {
            Err(NodeError::Task("disk gone".to_string()))
        }
    }

    fn node() -> Arc<Node> {
        let exchange: Arc<dyn Exchange> = Arc::new(LedgerBook::new());
        Arc::new(Node::new("peer", true, Arc::new(FailingStorage), exchange))
    }

    #[tokio::test]
    async fn test_disabled_gc_is_absent() {
        let handle = maybe_run_gc(false, node(), Duration::ZERO, CancellationToken::new()).unwrap();
        assert!(handle.is_none());
    }

    #[tokio::test]
    async fn test_zero_period_is_rejected() {
        let result = maybe_run_gc(true, node(), Duration::ZERO, CancellationToken::new());
        assert!(matches!(result, Err(DaemonError::InvalidGcPeriod(_))));
    }

    #[tokio::test]
    async fn test_unschedulable_period_is_rejected() {
        let period = Duration::from_secs(u64::MAX);
        let result = maybe_run_gc(true, node(), period, CancellationToken::new());
        assert!(matches!(result, Err(DaemonError::InvalidGcPeriod(p)) if p == period));
    }

    #[tokio::test]
    async fn test_gc_failure_is_reported() {
        let handle = maybe_run_gc(
            true,
            node(),
            Duration::from_millis(10),
            CancellationToken::new(),
        )
        .unwrap()
        .unwrap();
        let (mut errors, _task) = handle.into_parts();
        assert!(matches!(errors.recv().await, Some(ServiceError::Gc(_))));
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_stops_gc_cleanly() {
        let cancel = CancellationToken::new();
        let handle = maybe_run_gc(true, node(), Duration::from_secs(3600), cancel.clone())
            .unwrap()
            .unwrap();
        cancel.cancel();
        let (mut errors, task) = handle.into_parts();
        assert!(errors.recv().await.is_none());
        task.await.unwrap();
    }
}
