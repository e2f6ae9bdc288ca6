use chrono::Utc;
use tracing::{debug, info, warn};

use crate::licensing::api::TrustAuthority;
use crate::licensing::keys::{node_identity_hash, public_key_from_secret, verify_signature};
use crate::licensing::storage::{load_server_keys, save_grant, save_server_keys};
use crate::licensing::types::{LicenseError, VerifiedLicense};
use crate::repo::config::{TrustAuthorityInfo, VerifyInfo};
use crate::repo::ConfigStore;

/// Fields the verifier needs before it can talk to the trust authority.
pub fn check_verify_info(info: &VerifyInfo) -> Result<(), LicenseError> {
    if info.txid.is_empty() {
        return Err(LicenseError::MissingField("Txid"));
    }
    if info.voutid < 0 {
        return Err(LicenseError::InvalidField("Voutid"));
    }
    if info.secret.is_empty() {
        return Err(LicenseError::MissingField("Secret"));
    }
    Ok(())
}

pub fn check_ucenter_info(info: &TrustAuthorityInfo) -> Result<(), LicenseError> {
    if info.server_address.is_empty() {
        return Err(LicenseError::MissingField("ServerAddress"));
    }
    Ok(())
}

/// Make sure the node holds a valid license, renewing it if needed.
pub async fn verify(
    store: &ConfigStore,
    authority: &dyn TrustAuthority,
) -> Result<VerifiedLicense, LicenseError> {
    verify_at(store, authority, Utc::now().timestamp()).await
}

/// [`verify`] with an explicit clock, in Unix seconds.
///
/// Config is written at most twice: once for a new license and once for
/// a fetched key map. A license that is present, unexpired and signed by
/// a cached key costs no request and no write.
pub async fn verify_at(
    store: &ConfigStore,
    authority: &dyn TrustAuthority,
    now: i64,
) -> Result<VerifiedLicense, LicenseError> {
    let config = store.snapshot();
    let server = config.ucenter.server_address.as_str();
    let mut info = config.verify.clone();
    let mut renewed = false;

    if info.needs_license(now) {
        info!(
            txid = %info.txid,
            voutid = info.voutid,
            "License missing or expired, requesting a new one"
        );
        let grant = authority
            .request_license(server, &info.txid, info.voutid)
            .await?;
        save_grant(store, &grant)?;

        info.license = grant.license;
        info.period = grant.lic_period;
        info.licversion = grant.licversion;
        renewed = true;
    }

    let public_key = public_key_from_secret(&info.secret)?;

    let mut keyring = load_server_keys(store);
    if keyring.get(info.licversion).is_none() {
        debug!(
            licversion = info.licversion,
            "No cached authority key, fetching key map"
        );
        let fetched = authority
            .request_pubkey_map(server, &info.txid, info.voutid)
            .await?;
        keyring.absorb(fetched)?;
        save_server_keys(store, &keyring)?;
    }

    let Some(server_key) = keyring.get(info.licversion) else {
        warn!(licversion = info.licversion, "Authority has no key for license version");
        return Err(LicenseError::VerificationFailed);
    };

    let hash = node_identity_hash(
        &info.txid,
        info.voutid,
        &public_key,
        info.period,
        info.licversion,
    );
    if !verify_signature(&hash, &info.license, server_key) {
        warn!(licversion = info.licversion, "License signature does not match");
        return Err(LicenseError::VerificationFailed);
    }

    Ok(VerifiedLicense {
        public_key,
        period: info.period,
        licversion: info.licversion,
        renewed,
    })
}
