//! Periodic signed usage reports.
//!
//! The reporter waits until the node holds a license, then every jittered
//! interval sends the storage in use and the per-peer ledger deltas to the
//! collector at `Report.Address`. A failed cycle is logged and dropped; the
//! next one runs on schedule.

pub mod payload;
pub mod schedule;
pub mod send;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::licensing::config::LICENSE_POLL_INTERVAL;
use crate::licensing::{LicenseError, NodeKey};
use crate::node::{Node, NodeError};
use crate::repo::ConfigStore;

pub use payload::{build_report_data, storage_mib, ReportData, ReportRequest, ReportResponse};
pub use schedule::ReportSchedule;
pub use send::{parse_report_response, send_report};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("report duration max value must be greater than min value: min={min} max={max}")]
    InvalidInterval { min: u64, max: u64 },

    #[error("parse Report.Address as a URL failed: {0}")]
    InvalidAddress(#[from] url::ParseError),

    #[error("report signing key unavailable: {0}")]
    Key(#[from] LicenseError),

    #[error("got repo storage usage error: {0}")]
    Storage(#[from] NodeError),

    #[error("encode report failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("report error: {0}")]
    Network(String),

    #[error("report request timed out after {0:?}")]
    Timeout(Duration),

    #[error("report response code not 200: {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unmarshal report response [body={body}] error: {source}")]
    MalformedBody {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("report rejected: {code}: {message}")]
    Rejected { code: String, message: String },
}

/// Settings fixed when the reporter starts.
struct Prepared {
    address: String,
    key: NodeKey,
    schedule: ReportSchedule,
    request_timeout: Duration,
}

pub struct UsageReporter {
    store: Arc<ConfigStore>,
    node: Arc<Node>,
    client: reqwest::Client,
    rng: StdRng,
    poll_interval: Duration,
}

impl UsageReporter {
    pub fn new(store: Arc<ConfigStore>, node: Arc<Node>) -> Self {
        Self {
            store,
            node,
            client: reqwest::Client::new(),
            rng: StdRng::from_entropy(),
            poll_interval: LICENSE_POLL_INTERVAL,
        }
    }

    /// How often to re-check config while no license is present.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn prepare(&self) -> Result<Prepared, ReportError> {
        let config = self.store.snapshot();
        url::Url::parse(&config.report.address)?;
        let key = NodeKey::from_secret(&config.verify.secret)?;
        let schedule = ReportSchedule::new(config.report.duration_min, config.report.duration_max)?;

        Ok(Prepared {
            address: config.report.address,
            key,
            schedule,
            request_timeout: Duration::from_secs(config.report.request_timeout),
        })
    }

    /// Run until `cancel` fires.
    ///
    /// Returns an error only when the reporter cannot start: a bad address,
    /// secret or interval. Per-cycle failures never end the loop.
    #[instrument(name = "reporter", skip_all)]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ReportError> {
        let prepared = self.prepare()?;

        while self.store.snapshot().verify.license.is_empty() {
            debug!("No license yet, waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(address = %prepared.address, "Usage reporter started");

        loop {
            let delay = prepared.schedule.next_delay(&mut self.rng);
            debug!("report duration = {:?}", delay);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.report_once(&prepared) => match result {
                    Ok(true) => {
                        self.node.metrics().record_report_sent();
                        debug!("Report accepted");
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.node.metrics().record_report_failed();
                        warn!("report failed: {}", e);
                    }
                },
            }
        }

        debug!("Usage reporter stopped");
        Ok(())
    }

    /// One report cycle. `Ok(false)` means nothing was sent.
    async fn report_once(&self, prepared: &Prepared) -> Result<bool, ReportError> {
        let config = self.store.snapshot();
        if config.verify.license.is_empty() {
            debug!("License cleared, skipping report");
            return Ok(false);
        }

        let usage = self.node.storage().storage_usage().await?;
        let diffs = self.node.exchange().ledger_diffs();

        let data = build_report_data(
            self.node.peer_id(),
            &config.report.account,
            usage,
            diffs,
            Utc::now().timestamp(),
        )
        .signed(&prepared.key)?;

        let request = ReportRequest {
            sign: config.verify.license,
            txid: config.verify.txid,
            pubkey: prepared.key.public_key(),
            voutid: config.verify.voutid,
            licperiod: config.verify.period,
            licversion: config.verify.licversion,
            data,
        };

        send_report(
            &self.client,
            &prepared.address,
            &request,
            prepared.request_timeout,
        )
        .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FsStorage, LedgerBook};
    use crate::repo::NodeConfig;
    use tempfile::TempDir;

    fn reporter(dir: &TempDir, edit: impl FnOnce(&mut NodeConfig)) -> UsageReporter {
        let mut config = NodeConfig::default();
        config.report.address = "http://127.0.0.1:9/report".to_string();
        config.verify.secret = NodeKey::from_seed([4u8; 32]).secret();
        edit(&mut config);

        let store = Arc::new(ConfigStore::with_config(dir.path().join("config"), config));
        let node = Arc::new(Node::new(
            "peer",
            true,
            Arc::new(FsStorage::new(dir.path().join("blocks"))),
            Arc::new(LedgerBook::new()),
        ));
        UsageReporter::new(store, node).with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_equal_interval_bounds_refuse_to_start() {
        let dir = TempDir::new().unwrap();
        let reporter = reporter(&dir, |c| {
            c.report.duration_min = 60;
            c.report.duration_max = 60;
        });

        let err = reporter.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReportError::InvalidInterval { min: 60, max: 60 }));
    }

    #[tokio::test]
    async fn test_bad_address_refuses_to_start() {
        let dir = TempDir::new().unwrap();
        let reporter = reporter(&dir, |c| c.report.address = "not a url".to_string());
        let err = reporter.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReportError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_bad_secret_refuses_to_start() {
        let dir = TempDir::new().unwrap();
        let reporter = reporter(&dir, |c| c.verify.secret = "short".to_string());
        let err = reporter.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ReportError::Key(_)));
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_license() {
        let dir = TempDir::new().unwrap();
        let reporter = reporter(&dir, |_| {});
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_while_idle() {
        let dir = TempDir::new().unwrap();
        let reporter = reporter(&dir, |c| c.verify.license = "sig".to_string());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
