//! Direct FTP connector (plain or explicit TLS).

use super::blocking::{drain_source, forward_chunks, lock, pump_into, run_blocking};
use super::{
    filter_listing, join_remote, relative_to_root, remote_parent, Connector, ConnectorConfig,
    PathFilter, RemoteFile,
};
use crate::utils::errors::{GsbtError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::ToSocketAddrs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use suppaftp::list::File as ListEntry;
use suppaftp::native_tls::TlsConnector;
use suppaftp::{Mode, NativeTlsConnector, NativeTlsFtpStream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_FTP_PORT: u16 = 21;
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

type Session = Arc<Mutex<NativeTlsFtpStream>>;

pub struct FtpConnector {
    config: ConnectorConfig,
    filter: PathFilter,
    session: Option<Session>,
}

impl FtpConnector {
    pub fn new(mut config: ConnectorConfig) -> Self {
        if config.port == 0 {
            config.port = DEFAULT_FTP_PORT;
        }
        let filter = PathFilter::new(&config.include, &config.exclude);
        Self {
            config,
            filter,
            session: None,
        }
    }

    fn session(&self) -> Result<Session> {
        self.session.clone().ok_or(GsbtError::NotConnected)
    }
}

fn dial(
    host: &str,
    port: u16,
    tls: bool,
    passive: bool,
    username: &str,
    password: &str,
) -> Result<NativeTlsFtpStream> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| GsbtError::Connection(format!("failed to resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| GsbtError::Connection(format!("no address found for {}:{}", host, port)))?;

    let mut ftp = NativeTlsFtpStream::connect_timeout(addr, DIAL_TIMEOUT)
        .map_err(|e| GsbtError::Connection(format!("failed to connect to FTP: {}", e)))?;

    if tls {
        let connector = TlsConnector::new()
            .map_err(|e| GsbtError::Connection(format!("failed to set up TLS: {}", e)))?;
        ftp = ftp
            .into_secure(NativeTlsConnector::from(connector), host)
            .map_err(|e| GsbtError::Connection(format!("FTP TLS negotiation failed: {}", e)))?;
    }

    ftp.set_mode(if passive { Mode::Passive } else { Mode::Active });

    if let Err(e) = ftp.login(username, password) {
        let _ = ftp.quit();
        return Err(GsbtError::Connection(format!("FTP login failed: {}", e)));
    }

    Ok(ftp)
}

fn list_lines(ftp: &mut NativeTlsFtpStream, dir: &str) -> Result<Vec<String>> {
    let target = if dir.is_empty() { None } else { Some(dir) };
    ftp.list(target)
        .map_err(|e| GsbtError::List(format!("failed to list {}: {}", dir, e)))
}

/// Depth-first walk of `dir`, recording every entry relative to `root`.
/// `list_dir` returns the raw `LIST` lines of one directory. Stops with
/// `Cancelled` before entering the next directory once `cancel` fires.
fn walk<L>(
    list_dir: &mut L,
    cancel: &CancellationToken,
    root: &str,
    dir: &str,
    out: &mut Vec<RemoteFile>,
) -> Result<()>
where
    L: FnMut(&str) -> Result<Vec<String>>,
{
    if cancel.is_cancelled() {
        return Err(GsbtError::Cancelled);
    }

    for line in list_dir(dir)? {
        let entry = match line.parse::<ListEntry>() {
            Ok(entry) => entry,
            Err(e) => {
                debug!(line = %line, error = %e, "Skipping unparseable LIST line");
                continue;
            }
        };

        let name = entry.name();
        if name == "." || name == ".." {
            continue;
        }

        let full = join_remote(dir, name);
        let is_dir = entry.is_directory();
        out.push(RemoteFile {
            path: relative_to_root(root, &full),
            size: entry.size() as u64,
            modified: Some(DateTime::<Utc>::from(entry.modified())),
            is_dir,
        });

        if is_dir {
            walk(list_dir, cancel, root, &full, out)?;
        }
    }

    Ok(())
}

#[async_trait]
impl Connector for FtpConnector {
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let host = self.config.host.clone();
        let port = self.config.port;
        let tls = self.config.tls;
        let passive = self.config.passive;
        let username = self.config.username.clone();
        let password = self.config.password.clone();

        let ftp = run_blocking(cancel, move || {
            dial(&host, port, tls, passive, &username, &password)
        })
        .await?;

        info!(remote = %self.name(), tls, passive, "FTP session established");
        self.session = Some(Arc::new(Mutex::new(ftp)));
        Ok(())
    }

    async fn list(&mut self, cancel: &CancellationToken) -> Result<Vec<RemoteFile>> {
        let session = self.session()?;
        let root = self.config.remote_path.clone();
        let token = cancel.clone();

        let entries = run_blocking(cancel, move || {
            let mut ftp = lock(&session)?;
            let mut out = Vec::new();
            walk(
                &mut |dir: &str| list_lines(&mut ftp, dir),
                &token,
                &root,
                &root,
                &mut out,
            )?;
            Ok(out)
        })
        .await?;

        debug!(remote = %self.name(), entries = entries.len(), "Remote listing complete");
        Ok(filter_listing(entries, &self.filter))
    }

    async fn download(
        &mut self,
        cancel: &CancellationToken,
        path: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        let session = self.session()?;
        let full = join_remote(&self.config.remote_path, path);
        let rel = path.to_string();

        pump_into(cancel, sink, move |tx| {
            let mut ftp = lock(&session)?;
            let mut stream = ftp
                .retr_as_stream(&full)
                .map_err(|e| GsbtError::Download(format!("failed to download {}: {}", rel, e)))?;
            forward_chunks(&mut stream, &tx)?;
            ftp.finalize_retr_stream(stream)
                .map_err(|e| GsbtError::Download(format!("failed to download {}: {}", rel, e)))
        })
        .await?;

        Ok(())
    }

    async fn upload(
        &mut self,
        cancel: &CancellationToken,
        source: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> Result<()> {
        let session = self.session()?;
        let full = join_remote(&self.config.remote_path, path);
        let data = drain_source(cancel, source).await?;

        run_blocking(cancel, move || {
            let mut ftp = lock(&session)?;
            if let Some(parent) = remote_parent(&full) {
                // Already existing directories are the common case.
                let _ = ftp.mkdir(parent);
            }
            ftp.put_file(&full, &mut std::io::Cursor::new(data))
                .map_err(|e| GsbtError::Upload(format!("failed to upload {}: {}", full, e)))?;
            Ok(())
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || {
            let mut ftp = lock(&session)?;
            ftp.quit()
                .map_err(|e| GsbtError::Connection(format!("FTP quit failed: {}", e)))
        })
        .await?
    }

    fn name(&self) -> String {
        format!("ftp://{}:{}", self.config.host, self.config.port)
    }
}
