//! Report wire format.
//!
//! Field names and order are what the collector expects. The data
//! signature covers the SHA-256 of `data` serialized without `sign`.

use serde::{Deserialize, Serialize};

use crate::licensing::keys::{sha256, Hash256, NodeKey};
use crate::node::LedgerDiff;

use super::ReportError;

/// Traffic with one remote peer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "desNodeId")]
    pub des_node_id: String,
    pub inflow: i32,
    pub outflow: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReportData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign: Option<String>,
    pub account: String,
    pub id: String,
    pub ts: i64,
    /// Aggregate totals are not computed; always zero.
    #[serde(rename = "in")]
    pub total_in: i32,
    #[serde(rename = "out")]
    pub total_out: i32,
    /// MiB, truncated.
    pub storage: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<FlowEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    /// The node's license.
    pub sign: String,
    pub txid: String,
    pub pubkey: String,
    pub voutid: i32,
    pub licperiod: i64,
    pub licversion: i32,
    pub data: ReportData,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ReportResponse {
    #[serde(rename = "errorCode")]
    pub error_code: String,
    pub success: bool,
    #[serde(rename = "errorMsg")]
    pub error_msg: String,
}

pub fn storage_mib(bytes: u64) -> i32 {
    saturate(bytes / 1024 / 1024)
}

fn saturate(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub fn build_report_data(
    peer_id: &str,
    account: &str,
    usage_bytes: u64,
    diffs: Vec<LedgerDiff>,
    ts: i64,
) -> ReportData {
    let list = diffs
        .into_iter()
        .map(|diff| FlowEntry {
            node_id: peer_id.to_string(),
            des_node_id: diff.peer_id,
            inflow: saturate(diff.received),
            outflow: saturate(diff.sent),
        })
        .collect();

    ReportData {
        sign: None,
        account: account.to_string(),
        id: peer_id.to_string(),
        ts,
        total_in: 0,
        total_out: 0,
        storage: storage_mib(usage_bytes),
        list,
    }
}

impl ReportData {
    /// Hash of this payload with the signature field absent.
    pub fn signing_hash(&self) -> Result<Hash256, ReportError> {
        let unsigned = ReportData {
            sign: None,
            ..self.clone()
        };
        let bytes = serde_json::to_vec(&unsigned).map_err(ReportError::Encode)?;
        Ok(sha256(&bytes))
    }

    pub fn signed(mut self, key: &NodeKey) -> Result<Self, ReportError> {
        let hash = self.signing_hash()?;
        self.sign = Some(key.sign(&hash));
        Ok(self)
    }
}
