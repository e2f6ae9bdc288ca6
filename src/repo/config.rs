//! Durable node configuration
//!
//! The document stored at `{repo}/config`. Section and field names are
//! PascalCase on disk so existing repos keep loading; unknown top-level
//! fields are preserved for forward compatibility.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default API listen address.
pub const DEFAULT_API_ADDR: &str = "/ip4/127.0.0.1/tcp/5001";
/// Default gateway listen address.
pub const DEFAULT_GATEWAY_ADDR: &str = "/ip4/127.0.0.1/tcp/8080";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "PascalCase")]
pub struct NodeConfig {
    pub identity: Identity,
    pub addresses: Addresses,
    pub mounts: Mounts,
    pub gateway: GatewayConfig,
    pub datastore: DatastoreConfig,
    pub verify: VerifyInfo,
    #[serde(rename = "UCenter")]
    pub ucenter: TrustAuthorityInfo,
    pub report: ReportConfig,

    /// Unknown fields, written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Identity {
    #[serde(rename = "PeerID")]
    pub peer_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Addresses {
    #[serde(rename = "API")]
    pub api: Vec<String>,
    #[serde(rename = "Gateway")]
    pub gateway: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Mounts {
    #[serde(rename = "UDFS")]
    pub udfs: String,
    #[serde(rename = "IPNS")]
    pub ipns: String,
}

impl Default for Mounts {
    fn default() -> Self {
        Self {
            udfs: "/udfs".to_string(),
            ipns: "/ipns".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct GatewayConfig {
    pub writable: bool,
    pub root_redirect: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Seconds between garbage-collection sweeps when GC is enabled.
    #[serde(rename = "GCPeriod")]
    pub gc_period_secs: u64,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            gc_period_secs: 3600,
        }
    }
}

/// License binding of this node.
///
/// `license` and `period` are either both unset (never verified) or were
/// stored together from one trust authority response.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct VerifyInfo {
    pub txid: String,
    pub voutid: i32,
    /// Base64 Ed25519 seed of the node.
    pub secret: String,
    pub license: String,
    /// License expiry, Unix seconds.
    pub period: i64,
    pub licversion: i32,
}

impl VerifyInfo {
    /// Whether a new license must be requested before verification.
    pub fn needs_license(&self, now: i64) -> bool {
        now > self.period || self.license.is_empty() || self.licversion == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct VersionPubkey {
    pub licversion: i32,
    pub pubkey: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct TrustAuthorityInfo {
    pub server_address: String,
    pub server_pubkeys: Vec<VersionPubkey>,
}

/// Usage reporting settings. An empty `address` disables the reporter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "PascalCase")]
pub struct ReportConfig {
    pub address: String,
    pub account: String,
    /// Seconds.
    pub duration_min: u64,
    /// Seconds, must be strictly greater than `duration_min`.
    pub duration_max: u64,
    /// Seconds; 0 disables the deadline.
    pub request_timeout: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            account: String::new(),
            duration_min: 1800,
            duration_max: 3600,
            request_timeout: 30,
        }
    }
}

impl NodeConfig {
    /// Config written by `--init`: fresh identity, local listeners.
    pub fn init_defaults() -> Self {
        Self {
            identity: Identity {
                peer_id: uuid::Uuid::new_v4().to_string(),
            },
            addresses: Addresses {
                api: vec![DEFAULT_API_ADDR.to_string()],
                gateway: vec![DEFAULT_GATEWAY_ADDR.to_string()],
            },
            ..Default::default()
        }
    }
}
