//! Node metrics in Prometheus text exposition format.
//!
//! Report outcomes are lock-free counters kept here. Storage usage and the
//! per-peer ledger are read from the node's collaborators at scrape time and
//! passed in by the caller.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::node::LedgerDiff;

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Default)]
pub struct NodeMetrics {
    reports_sent: AtomicU64,
    reports_failed: AtomicU64,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A report the collector accepted.
    pub fn record_report_sent(&self) {
        self.reports_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A report cycle that ended in any error.
    pub fn record_report_failed(&self) {
        self.reports_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reports_sent(&self) -> u64 {
        self.reports_sent.load(Ordering::SeqCst)
    }

    pub fn reports_failed(&self) -> u64 {
        self.reports_failed.load(Ordering::SeqCst)
    }

    /// Render every metric. `storage_bytes` is left out when the block store
    /// could not be measured; `ledger` holds cumulative per-peer totals.
    pub fn to_prometheus(&self, storage_bytes: Option<u64>, ledger: &[LedgerDiff]) -> String {
        let mut out = String::new();

        if let Some(bytes) = storage_bytes {
            out.push_str(&format!(
                "# HELP udfs_repo_storage_bytes Bytes held in the local block store\n\
                 # TYPE udfs_repo_storage_bytes gauge\n\
                 udfs_repo_storage_bytes {}\n",
                bytes
            ));
        }

        out.push_str(
            "# HELP udfs_ledger_received_bytes_total Bytes received from each peer\n\
             # TYPE udfs_ledger_received_bytes_total counter\n",
        );
        for entry in ledger {
            out.push_str(&format!(
                "udfs_ledger_received_bytes_total{{peer=\"{}\"}} {}\n",
                escape_label(&entry.peer_id),
                entry.received
            ));
        }

        out.push_str(
            "# HELP udfs_ledger_sent_bytes_total Bytes sent to each peer\n\
             # TYPE udfs_ledger_sent_bytes_total counter\n",
        );
        for entry in ledger {
            out.push_str(&format!(
                "udfs_ledger_sent_bytes_total{{peer=\"{}\"}} {}\n",
                escape_label(&entry.peer_id),
                entry.sent
            ));
        }

        out.push_str(&format!(
            "# HELP udfs_reports_sent_total Usage reports accepted by the collector\n\
             # TYPE udfs_reports_sent_total counter\n\
             udfs_reports_sent_total {}\n\
             # HELP udfs_reports_failed_total Usage report cycles that failed\n\
             # TYPE udfs_reports_failed_total counter\n\
             udfs_reports_failed_total {}\n",
            self.reports_sent(),
            self.reports_failed(),
        ));

        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
