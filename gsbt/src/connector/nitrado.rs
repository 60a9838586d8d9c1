//! Nitrado game server access.
//!
//! The API key and service id are exchanged for FTP credentials via
//! `GET /services/{id}/gameservers`; every file operation is then delegated
//! to an [`FtpConnector`] built from the response.

use super::{Connector, ConnectorConfig, FtpConnector, RemoteFile};
use crate::utils::errors::{GsbtError, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_API_BASE: &str = "https://api.nitrado.net";
const API_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct GameserverResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: GameserverData,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct GameserverData {
    #[serde(default)]
    ftp: FtpCredentials,
}

#[derive(Debug, Default, Deserialize)]
struct FtpCredentials {
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

pub struct NitradoConnector {
    config: ConnectorConfig,
    api_base: String,
    client: reqwest::Client,
    delegate: Option<FtpConnector>,
}

impl NitradoConnector {
    pub fn new(config: ConnectorConfig) -> Result<Self> {
        let api_base = config
            .api_base
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let client = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;

        Ok(Self {
            config,
            api_base,
            client,
            delegate: None,
        })
    }

    fn delegate(&mut self) -> Result<&mut FtpConnector> {
        self.delegate.as_mut().ok_or(GsbtError::NotConnected)
    }

    async fn fetch_credentials(&self) -> Result<FtpCredentials> {
        let url = format!(
            "{}/services/{}/gameservers",
            self.api_base, self.config.service_id
        );
        debug!(url = %url, "Requesting FTP credentials");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string();
            return Err(GsbtError::RateLimited { retry_after });
        }

        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(GsbtError::Api(format!(
                "status {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let body: GameserverResponse = response.json().await?;
        if body.status != "success" {
            return Err(GsbtError::Api(format!("API returned error: {}", body.message)));
        }

        Ok(body.data.ftp)
    }
}

#[async_trait]
impl Connector for NitradoConnector {
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.delegate.is_some() {
            return Ok(());
        }
        if self.config.api_key.is_empty() {
            return Err(GsbtError::Config(
                "api_key is required for nitrado connector".into(),
            ));
        }
        if self.config.service_id.is_empty() {
            return Err(GsbtError::Config(
                "service_id is required for nitrado connector".into(),
            ));
        }

        let creds = tokio::select! {
            creds = self.fetch_credentials() => creds?,
            _ = cancel.cancelled() => return Err(GsbtError::Cancelled),
        };
        info!(
            remote = %self.name(),
            ftp_host = %creds.hostname,
            "Resolved FTP credentials"
        );

        let mut ftp = FtpConnector::new(ConnectorConfig {
            kind: "ftp".into(),
            host: creds.hostname,
            port: creds.port,
            username: creds.username,
            password: creds.password,
            remote_path: self.config.remote_path.clone(),
            include: self.config.include.clone(),
            exclude: self.config.exclude.clone(),
            passive: true,
            retry: self.config.retry.clone(),
            ..Default::default()
        });
        ftp.connect(cancel).await?;

        self.delegate = Some(ftp);
        Ok(())
    }

    async fn list(&mut self, cancel: &CancellationToken) -> Result<Vec<RemoteFile>> {
        self.delegate()?.list(cancel).await
    }

    async fn download(
        &mut self,
        cancel: &CancellationToken,
        path: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        self.delegate()?.download(cancel, path, sink).await
    }

    async fn upload(
        &mut self,
        cancel: &CancellationToken,
        source: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> Result<()> {
        self.delegate()?.upload(cancel, source, path).await
    }

    async fn close(&mut self) -> Result<()> {
        match self.delegate.take() {
            Some(mut ftp) => ftp.close().await,
            None => Ok(()),
        }
    }

    fn name(&self) -> String {
        format!("nitrado://{}", self.config.service_id)
    }
}
