//! Client for a remote authority that owns principal data.
//!
//! Every check forwards the caller's own bearer to
//! `GET {base}/auth/{app|admin}/verify`; this service never stores the
//! principals it authorizes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use multiroom_auth::{AuthorityEnvelope, AuthorizationClient, Identity, PrincipalRecord, TokenType};
use multiroom_core::{ServiceError, ServiceResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RemoteAuthorization {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteAuthorization {
    /// `base_url` is the authority's root, e.g. `http://users:8080`.
    pub fn new(base_url: impl Into<String>) -> ServiceResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::internal(format!("http client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn verify_url(&self, token_type: TokenType) -> String {
        format!("{}/auth/{}/verify", self.base_url, token_type.audience())
    }
}

#[async_trait]
impl AuthorizationClient for RemoteAuthorization {
    #[instrument(skip(self, identity), fields(subject = %identity.subject, token_type = %identity.token_type.as_str()))]
    async fn principal(&self, identity: &Identity) -> ServiceResult<PrincipalRecord> {
        let url = self.verify_url(identity.token_type);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&identity.bearer)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "authority unreachable");
                ServiceError::unavailable(format!("authority request failed: {e}"))
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!(status = status.as_u16(), "authority rejected the credential");
            return Err(ServiceError::Upstream {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            warn!(url = %url, error = %e, "authority response truncated");
            ServiceError::unavailable(format!("authority response: {e}"))
        })?;

        parse_principal(&body)
    }
}

/// Extract the principal from a successful verification response.
fn parse_principal(body: &[u8]) -> ServiceResult<PrincipalRecord> {
    let envelope: AuthorityEnvelope<PrincipalRecord> = serde_json::from_slice(body).map_err(|e| {
        warn!(error = %e, "authority response is not a principal envelope");
        ServiceError::internal(format!("authority response: {e}"))
    })?;

    envelope
        .data
        .ok_or_else(|| ServiceError::internal("authority response without principal data"))
}
