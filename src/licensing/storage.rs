use tracing::debug;

use crate::licensing::keyring::ServerKeyring;
use crate::licensing::types::{LicenseError, LicenseGrant};
use crate::repo::ConfigStore;

/// Command-line values that are written into config before verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyOverrides {
    pub txid: Option<String>,
    pub voutid: Option<i32>,
    pub secret: Option<String>,
    pub account: Option<String>,
}

impl VerifyOverrides {
    pub fn is_empty(&self) -> bool {
        self.txid.is_none()
            && self.voutid.is_none()
            && self.secret.is_none()
            && self.account.is_none()
    }
}

/// Persist the overrides. Returns whether config was written.
pub fn apply_overrides(
    store: &ConfigStore,
    overrides: &VerifyOverrides,
) -> Result<bool, LicenseError> {
    if overrides.is_empty() {
        return Ok(false);
    }

    store
        .update(|config| {
            if let Some(txid) = &overrides.txid {
                config.verify.txid = txid.clone();
            }
            if let Some(voutid) = overrides.voutid {
                config.verify.voutid = voutid;
            }
            if let Some(secret) = &overrides.secret {
                config.verify.secret = secret.clone();
            }
            if let Some(account) = &overrides.account {
                config.report.account = account.clone();
            }
        })
        .map_err(LicenseError::Storage)?;

    debug!("Saved command line overrides to {:?}", store.path());
    Ok(true)
}

/// Store a freshly issued license in the `Verify` section.
pub fn save_grant(store: &ConfigStore, grant: &LicenseGrant) -> Result<(), LicenseError> {
    store
        .update(|config| {
            config.verify.license = grant.license.clone();
            config.verify.period = grant.lic_period;
            config.verify.licversion = grant.licversion;
        })
        .map_err(LicenseError::Storage)
}

pub fn load_server_keys(store: &ConfigStore) -> ServerKeyring {
    ServerKeyring::from_persisted(&store.snapshot().ucenter.server_pubkeys)
}

pub fn save_server_keys(store: &ConfigStore, keyring: &ServerKeyring) -> Result<(), LicenseError> {
    store
        .update(|config| config.ucenter.server_pubkeys = keyring.to_persisted())
        .map_err(LicenseError::Storage)
}
