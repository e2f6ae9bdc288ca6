use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::licensing::config::{endpoints, AUTHORITY_TIMEOUT};
use crate::licensing::types::{LicenseError, LicenseGrant, PubkeyMap};

// ============================================================================
// Wire types
// ============================================================================

/// Body of every trust authority request: the funding output the node is
/// bound to.
#[derive(Serialize, Debug)]
pub struct AuthorityRequest<'a> {
    pub txid: &'a str,
    pub voutid: i32,
}

/// Response to a license request
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct LicenseResponse {
    pub license: String,
    #[serde(rename = "licPeriod")]
    pub lic_period: i64,
    pub licversion: i32,
    #[serde(rename = "errorCode")]
    pub error_code: String,
    #[serde(rename = "errorMsg")]
    pub error_msg: String,
}

impl LicenseResponse {
    pub fn into_grant(self) -> Result<LicenseGrant, LicenseError> {
        check_error_code(&self.error_code, &self.error_msg)?;
        if self.license.is_empty() {
            return Err(LicenseError::ServerError(
                "license response carries no license".to_string(),
            ));
        }
        Ok(LicenseGrant {
            license: self.license,
            lic_period: self.lic_period,
            licversion: self.licversion,
        })
    }
}

/// Response to a public key map request
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct PubkeyMapResponse {
    #[serde(rename = "v2key")]
    pub v2key: PubkeyMap,
    #[serde(rename = "errorCode")]
    pub error_code: String,
    #[serde(rename = "errorMsg")]
    pub error_msg: String,
}

impl PubkeyMapResponse {
    pub fn into_map(self) -> Result<PubkeyMap, LicenseError> {
        check_error_code(&self.error_code, &self.error_msg)?;
        Ok(self.v2key)
    }
}

fn check_error_code(code: &str, message: &str) -> Result<(), LicenseError> {
    match code {
        "" | "OK" => Ok(()),
        _ => Err(LicenseError::ServerError(format!("{}: {}", code, message))),
    }
}

// ============================================================================
// Trust authority
// ============================================================================

/// Remote service that issues licenses and publishes its signing keys.
#[async_trait]
pub trait TrustAuthority: Send + Sync {
    async fn request_license(
        &self,
        server: &str,
        txid: &str,
        voutid: i32,
    ) -> Result<LicenseGrant, LicenseError>;

    async fn request_pubkey_map(
        &self,
        server: &str,
        txid: &str,
        voutid: i32,
    ) -> Result<PubkeyMap, LicenseError>;
}

/// HTTP client for the trust authority ("user center")
pub struct UCenterClient {
    client: reqwest::Client,
}

impl UCenterClient {
    pub fn new() -> Result<Self, LicenseError> {
        let client = reqwest::Client::builder()
            .timeout(AUTHORITY_TIMEOUT)
            .build()
            .map_err(|e| LicenseError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        request: &AuthorityRequest<'_>,
    ) -> Result<T, LicenseError> {
        debug!(url, txid = request.txid, voutid = request.voutid, "Trust authority request");

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| LicenseError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LicenseError::ServerError(format!("{}: {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| LicenseError::ServerError(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl TrustAuthority for UCenterClient {
    async fn request_license(
        &self,
        server: &str,
        txid: &str,
        voutid: i32,
    ) -> Result<LicenseGrant, LicenseError> {
        let response: LicenseResponse = self
            .post(
                &endpoints::request_license(server),
                &AuthorityRequest { txid, voutid },
            )
            .await?;
        response.into_grant()
    }

    async fn request_pubkey_map(
        &self,
        server: &str,
        txid: &str,
        voutid: i32,
    ) -> Result<PubkeyMap, LicenseError> {
        let response: PubkeyMapResponse = self
            .post(&endpoints::pubkey_map(server), &AuthorityRequest { txid, voutid })
            .await?;
        response.into_map()
    }
}
