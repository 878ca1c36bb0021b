//! reqwest-backed hosting client

use std::time::Duration;

use async_trait::async_trait;
use hp_common::ServerUsage;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tracing::{debug, warn};

use crate::signing::{RequestSigner, SIGNATURE_HEADER};
use crate::{DeployRequest, DomainRefreshRequest, HostingApi, HostingError, Result, ServerTarget};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HostingClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HostingClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct HostingClient {
    client: reqwest::Client,
    signer: RequestSigner,
}

impl HostingClient {
    pub fn new(config: HostingClientConfig, signer: RequestSigner) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| HostingError::Transport(e.to_string()))?;

        Ok(Self { client, signer })
    }

    fn url(target: &ServerTarget, path: &str) -> String {
        format!("{}{}", target.base_address.trim_end_matches('/'), path)
    }

    /// Sign `body`, send it and map any non-2xx status to an error
    async fn send(
        &self,
        target: &ServerTarget,
        method: Method,
        path: &str,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let signature = self.signer.sign(target, &body).await?;
        let url = Self::url(target, path);

        debug!(server_id = %target.server_id, %method, url = %url, "Sending signed hosting request");

        let mut request = self
            .client
            .request(method, &url)
            .header(SIGNATURE_HEADER, signature);
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                HostingError::Timeout(target.server_id.clone())
            } else {
                HostingError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                server_id = %target.server_id,
                status = status.as_u16(),
                url = %url,
                "Hosting server rejected request"
            );
            return Err(HostingError::Status {
                server_id: target.server_id.clone(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl HostingApi for HostingClient {
    async fn health(&self, target: &ServerTarget) -> Result<()> {
        self.send(target, Method::GET, "/", Vec::new()).await?;
        Ok(())
    }

    async fn deploy(&self, target: &ServerTarget, request: &DeployRequest) -> Result<()> {
        let body = serde_json::to_vec(request)?;
        self.send(target, Method::POST, "/projects/deploy", body).await?;
        Ok(())
    }

    async fn refresh_domains(&self, target: &ServerTarget, request: &DomainRefreshRequest) -> Result<()> {
        let body = serde_json::to_vec(request)?;
        self.send(target, Method::POST, "/domains/refresh", body).await?;
        Ok(())
    }

    async fn usage(&self, target: &ServerTarget) -> Result<ServerUsage> {
        let response = self.send(target, Method::GET, "/usage", Vec::new()).await?;
        response
            .json::<ServerUsage>()
            .await
            .map_err(|e| HostingError::InvalidResponse(e.to_string()))
    }
}
