//! Remote file access behind one contract.
//!
//! Every backend implements [`Connector`]: connect, list, download, upload,
//! close. The FTP and SFTP variants speak their protocol directly; the
//! Nitrado variant exchanges an API key for FTP credentials and then
//! forwards every call to an inner [`FtpConnector`].

mod blocking;
pub mod ftp;
pub mod matcher;
pub mod nitrado;
pub mod sftp;

use crate::utils::errors::{GsbtError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub use ftp::FtpConnector;
pub use matcher::{matches, PathFilter};
pub use nitrado::NitradoConnector;
pub use sftp::SftpConnector;

/// A remote entry discovered by [`Connector::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the configured remote root, `/`-separated
    pub path: String,

    /// Size in bytes
    pub size: u64,

    /// Last modification time, when the server reports one
    pub modified: Option<DateTime<Utc>>,

    /// Is this a directory?
    pub is_dir: bool,
}

/// Retry tunables carried from configuration.
///
/// Nothing consults these yet: a failed connect, list or download fails the
/// server's run on the first error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_secs: u64,
    pub backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_secs: 5,
            backoff: false,
        }
    }
}

/// Fully resolved settings for one connector instance.
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfig {
    /// Declared backend type (`ftp`, `sftp`, `nitrado`)
    pub kind: String,
    pub host: String,
    /// 0 selects the backend default
    pub port: u16,
    pub username: String,
    pub password: String,
    pub key_file: Option<String>,
    pub api_key: String,
    pub service_id: String,
    /// Overrides the Nitrado API base URL
    pub api_base: Option<String>,
    pub remote_path: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub tls: bool,
    pub passive: bool,
    pub retry: RetryPolicy,
}

/// Backend selected by [`ConnectorConfig::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Ftp,
    Sftp,
    Nitrado,
}

impl FromStr for BackendKind {
    type Err = GsbtError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ftp" => Ok(BackendKind::Ftp),
            "sftp" => Ok(BackendKind::Sftp),
            "nitrado" => Ok(BackendKind::Nitrado),
            other => Err(GsbtError::Config(format!(
                "unsupported connector type: {:?}",
                other
            ))),
        }
    }
}

/// Uniform access to one remote backend.
///
/// `list`, `download` and `upload` fail with [`GsbtError::NotConnected`]
/// until `connect` has succeeded. `close` may be called any number of times,
/// including after a failed `connect`.
#[async_trait]
pub trait Connector: Send {
    /// Open the transport session.
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Recursively list files under the remote root that pass the
    /// include/exclude rules. Directories are walked but not returned.
    async fn list(&mut self, cancel: &CancellationToken) -> Result<Vec<RemoteFile>>;

    /// Stream the file at `path` (relative to the remote root) into `sink`.
    async fn download(
        &mut self,
        cancel: &CancellationToken,
        path: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()>;

    /// Write everything read from `source` to `path` on the remote.
    async fn upload(
        &mut self,
        cancel: &CancellationToken,
        source: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> Result<()>;

    /// Release the transport session.
    async fn close(&mut self) -> Result<()>;

    /// Human readable identity for logs, e.g. `ftp://host:21`.
    fn name(&self) -> String;
}

/// Build the connector for `config.kind`.
pub fn create_connector(config: ConnectorConfig) -> Result<Box<dyn Connector>> {
    let kind: BackendKind = config.kind.parse()?;
    let connector: Box<dyn Connector> = match kind {
        BackendKind::Ftp => Box::new(FtpConnector::new(config)),
        BackendKind::Sftp => Box::new(SftpConnector::new(config)),
        BackendKind::Nitrado => Box::new(NitradoConnector::new(config)?),
    };
    Ok(connector)
}

/// Join a remote directory and a relative path with a single `/`.
pub(crate) fn join_remote(base: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if base.is_empty() {
        return rel.to_string();
    }
    let base = base.trim_end_matches('/');
    if rel.is_empty() {
        return if base.is_empty() { "/".to_string() } else { base.to_string() };
    }
    format!("{}/{}", base, rel)
}

/// Path of `full` relative to `root`, without a leading `/`.
pub(crate) fn relative_to_root(root: &str, full: &str) -> String {
    let root = root.trim_end_matches('/');
    full.strip_prefix(root)
        .unwrap_or(full)
        .trim_start_matches('/')
        .to_string()
}

/// Parent directory of a remote path, if it has one.
pub(crate) fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => None,
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// Drop directories and entries rejected by `filter`.
pub(crate) fn filter_listing(entries: Vec<RemoteFile>, filter: &PathFilter) -> Vec<RemoteFile> {
    entries
        .into_iter()
        .filter(|f| !f.is_dir && filter.is_match(&f.path))
        .collect()
}
