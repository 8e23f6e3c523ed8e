//! Transport to the license server.

use crate::error::{ClientError, ValidatorResult};
use async_trait::async_trait;
use callguard_license::protocol::{
    ActivateRequest, ActivateResponse, AuthorizationGrant, ErrorBody, HeartbeatRequest,
    HeartbeatResponse,
};
use callguard_license::LicenseKey;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Calls the validator makes against the license server.
#[async_trait]
pub trait LicenseClient: Send + Sync {
    /// Activates or revalidates `key` for the machine identified by
    /// `fingerprint`.
    async fn activate(
        &self,
        key: &LicenseKey,
        fingerprint: &str,
    ) -> Result<AuthorizationGrant, ClientError>;

    /// Reports usage for `key`.
    async fn heartbeat(
        &self,
        key: &LicenseKey,
        report: &HeartbeatRequest,
    ) -> Result<AuthorizationGrant, ClientError>;
}

/// [`LicenseClient`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpLicenseClient {
    client: Client,
    base_url: String,
}

impl HttpLicenseClient {
    /// Creates a client for the server at `base_url` with a per-request
    /// timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ValidatorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, key: &LicenseKey, action: &str) -> String {
        format!("{}/api/license/{}/{}", self.base_url, key, action)
    }
}

#[async_trait]
impl LicenseClient for HttpLicenseClient {
    async fn activate(
        &self,
        key: &LicenseKey,
        fingerprint: &str,
    ) -> Result<AuthorizationGrant, ClientError> {
        debug!(license_key = %key.masked(), "Sending activation request");
        let response = self
            .client
            .post(self.url(key, "activate"))
            .json(&ActivateRequest {
                hardware_fingerprint: fingerprint.to_string(),
            })
            .send()
            .await
            .map_err(|e| ClientError::Transient(format!("activation request failed: {e}")))?;

        let body: ActivateResponse = read_success(response).await?;
        Ok(body.into())
    }

    async fn heartbeat(
        &self,
        key: &LicenseKey,
        report: &HeartbeatRequest,
    ) -> Result<AuthorizationGrant, ClientError> {
        debug!(license_key = %key.masked(), active_calls = report.active_calls, "Sending heartbeat");
        let response = self
            .client
            .post(self.url(key, "heartbeat"))
            .json(report)
            .send()
            .await
            .map_err(|e| ClientError::Transient(format!("heartbeat request failed: {e}")))?;

        let body: HeartbeatResponse = read_success(response).await?;
        Ok(body.into())
    }
}

/// Decodes a 2xx body, or classifies the error response.
///
/// Only error codes that carry a verdict about the license become
/// [`ClientError::Rejected`]; everything else is transient.
async fn read_success<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| ClientError::Transient(format!("failed to parse response: {e}")));
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => match body.error.code.rejection() {
            Some(reason) if !status.is_server_error() => Err(ClientError::Rejected(reason)),
            _ => Err(ClientError::Transient(format!(
                "server returned {status}: {}",
                body.error.message
            ))),
        },
        Err(_) => Err(ClientError::Transient(format!("server returned {status}: {text}"))),
    }
}
