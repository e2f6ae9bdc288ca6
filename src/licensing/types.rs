use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::repo::RepoError;

/// License issued by the trust authority.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct LicenseGrant {
    pub license: String,
    /// Expiry, Unix seconds.
    #[serde(rename = "licPeriod")]
    pub lic_period: i64,
    pub licversion: i32,
}

/// Authority signing keys by license version.
pub type PubkeyMap = BTreeMap<i32, String>;

/// Outcome of a successful verification.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct VerifiedLicense {
    pub public_key: String,
    pub period: i64,
    pub licversion: i32,
    /// Whether a new license was fetched during this verification.
    pub renewed: bool,
}

/// Error types for licensing operations
#[derive(thiserror::Error, Debug)]
pub enum LicenseError {
    #[error("Save verify info to config file failed: {0}")]
    Storage(#[source] RepoError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Trust authority error: {0}")]
    ServerError(String),

    #[error("Missing {0} in config")]
    MissingField(&'static str),

    #[error("Invalid {0} in config")]
    InvalidField(&'static str),

    #[error("Invalid node secret: {0}")]
    InvalidSecret(String),

    #[error("Trust authority returned {fetched} public keys, fewer than the {known} already known")]
    KeyMapShrunk { fetched: usize, known: usize },

    #[error("Trust authority changed the public key of license version {0}")]
    KeyConflict(i32),

    #[error("verify failed")]
    VerificationFailed,
}
