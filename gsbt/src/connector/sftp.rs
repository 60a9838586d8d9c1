//! Direct SFTP connector over SSH.
//!
//! Host keys are NOT verified: any server key is accepted. Every connect
//! logs a warning so the gap stays visible in operator logs.

use super::blocking::{drain_source, forward_chunks, lock, pump_into, run_blocking};
use super::{
    filter_listing, join_remote, remote_parent, Connector, ConnectorConfig, PathFilter, RemoteFile,
};
use crate::utils::errors::{GsbtError, Result};
use async_trait::async_trait;
use chrono::DateTime;
use ssh2::{FileStat, Session, Sftp};
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_SFTP_PORT: u16 = 22;
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

struct SftpSession {
    ssh: Session,
    sftp: Sftp,
}

type SharedSession = Arc<Mutex<SftpSession>>;

pub struct SftpConnector {
    config: ConnectorConfig,
    filter: PathFilter,
    session: Option<SharedSession>,
}

/// Credentials to try, in order.
#[derive(Debug, Clone)]
struct Auth {
    username: String,
    key_file: Option<PathBuf>,
    password: Option<String>,
}

impl SftpConnector {
    pub fn new(mut config: ConnectorConfig) -> Self {
        if config.port == 0 {
            config.port = DEFAULT_SFTP_PORT;
        }
        let filter = PathFilter::new(&config.include, &config.exclude);
        Self {
            config,
            filter,
            session: None,
        }
    }

    fn session(&self) -> Result<SharedSession> {
        self.session.clone().ok_or(GsbtError::NotConnected)
    }

    fn auth(&self) -> Result<Auth> {
        let key_file = self
            .config
            .key_file
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(PathBuf::from);
        let password = Some(self.config.password.clone()).filter(|p| !p.is_empty());

        if key_file.is_none() && password.is_none() {
            return Err(GsbtError::Config(
                "no authentication method provided (need password or key_file)".into(),
            ));
        }

        if let Some(key) = &key_file {
            if !key.is_file() {
                return Err(GsbtError::Config(format!(
                    "failed to read key file: {}",
                    key.display()
                )));
            }
        }

        Ok(Auth {
            username: self.config.username.clone(),
            key_file,
            password,
        })
    }

    /// Remote root as a path; an empty root means the login directory.
    fn root(&self) -> PathBuf {
        if self.config.remote_path.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.config.remote_path)
        }
    }
}

fn dial(host: &str, port: u16, auth: &Auth) -> Result<SftpSession> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| GsbtError::Connection(format!("failed to resolve {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| GsbtError::Connection(format!("no address found for {}:{}", host, port)))?;

    let tcp = TcpStream::connect_timeout(&addr, DIAL_TIMEOUT)
        .map_err(|e| GsbtError::Connection(format!("failed to connect to SSH: {}", e)))?;

    let mut ssh = Session::new()
        .map_err(|e| GsbtError::Connection(format!("failed to create SSH session: {}", e)))?;
    ssh.set_tcp_stream(tcp);
    ssh.set_timeout(DIAL_TIMEOUT.as_millis() as u32);
    ssh.handshake()
        .map_err(|e| GsbtError::Connection(format!("SSH handshake failed: {}", e)))?;

    // Host key intentionally unchecked.

    if let Some(key) = &auth.key_file {
        if let Err(e) = ssh.userauth_pubkey_file(&auth.username, None, key, None) {
            debug!(error = %e, "Key authentication failed");
        }
    }
    if !ssh.authenticated() {
        if let Some(password) = &auth.password {
            ssh.userauth_password(&auth.username, password)
                .map_err(|e| GsbtError::Connection(format!("SSH authentication failed: {}", e)))?;
        }
    }
    if !ssh.authenticated() {
        return Err(GsbtError::Connection("SSH authentication failed".into()));
    }

    // Transfers can legitimately stall longer than the dial budget.
    ssh.set_timeout(0);

    let sftp = ssh
        .sftp()
        .map_err(|e| GsbtError::Connection(format!("failed to create SFTP client: {}", e)))?;

    Ok(SftpSession { ssh, sftp })
}

/// `/`-joined form of `path` relative to `root`.
fn relative_slash(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn read_dir(sftp: &Sftp, dir: &Path) -> Result<Vec<(PathBuf, FileStat)>> {
    sftp.readdir(dir)
        .map_err(|e| GsbtError::List(format!("failed to list {}: {}", dir.display(), e)))
}

/// Depth-first walk of `dir` through `read_dir`, recording every entry
/// relative to `root`. Checks `cancel` before each directory.
fn walk<R>(
    read_dir: &mut R,
    cancel: &CancellationToken,
    root: &Path,
    dir: &Path,
    out: &mut Vec<RemoteFile>,
) -> Result<()>
where
    R: FnMut(&Path) -> Result<Vec<(PathBuf, FileStat)>>,
{
    if cancel.is_cancelled() {
        return Err(GsbtError::Cancelled);
    }

    for (full, stat) in read_dir(dir)? {
        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.is_empty() || name == "." || name == ".." {
            continue;
        }

        let is_dir = stat.is_dir();
        out.push(RemoteFile {
            path: relative_slash(root, &full),
            size: stat.size.unwrap_or(0),
            modified: stat
                .mtime
                .and_then(|t| DateTime::from_timestamp(t as i64, 0)),
            is_dir,
        });

        if is_dir {
            walk(read_dir, cancel, root, &full, out)?;
        }
    }

    Ok(())
}

/// Create every missing ancestor of `dir`, ignoring failures.
fn mkdir_all(sftp: &Sftp, dir: &str) {
    let mut current = String::new();
    for part in dir.split('/') {
        if part.is_empty() {
            if current.is_empty() {
                current.push('/');
            }
            continue;
        }
        if !current.is_empty() && !current.ends_with('/') {
            current.push('/');
        }
        current.push_str(part);
        let _ = sftp.mkdir(Path::new(&current), 0o755);
    }
}

#[async_trait]
impl Connector for SftpConnector {
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let auth = self.auth()?;
        warn!(
            remote = %self.name(),
            "SFTP host key verification is disabled; the server identity is not checked"
        );

        let host = self.config.host.clone();
        let port = self.config.port;
        let session = run_blocking(cancel, move || dial(&host, port, &auth)).await?;

        info!(remote = %self.name(), "SFTP session established");
        self.session = Some(Arc::new(Mutex::new(session)));
        Ok(())
    }

    async fn list(&mut self, cancel: &CancellationToken) -> Result<Vec<RemoteFile>> {
        let session = self.session()?;
        let root = self.root();
        let token = cancel.clone();

        let entries = run_blocking(cancel, move || {
            let s = lock(&session)?;
            let mut out = Vec::new();
            walk(
                &mut |dir: &Path| read_dir(&s.sftp, dir),
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
            let s = lock(&session)?;
            let mut file = s
                .sftp
                .open(Path::new(&full))
                .map_err(|e| GsbtError::Download(format!("failed to open {}: {}", rel, e)))?;
            forward_chunks(&mut file, &tx)
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
            let s = lock(&session)?;
            if let Some(parent) = remote_parent(&full) {
                mkdir_all(&s.sftp, parent);
            }
            let mut file = s
                .sftp
                .create(Path::new(&full))
                .map_err(|e| GsbtError::Upload(format!("failed to create {}: {}", full, e)))?;
            file.write_all(&data)
                .map_err(|e| GsbtError::Upload(format!("failed to write {}: {}", full, e)))?;
            Ok(())
        })
        .await
    }

    async fn close(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        tokio::task::spawn_blocking(move || {
            let s = lock(&session)?;
            s.ssh
                .disconnect(None, "gsbt session closed", None)
                .map_err(|e| GsbtError::Connection(format!("SSH disconnect failed: {}", e)))
        })
        .await?
    }

    fn name(&self) -> String {
        format!("sftp://{}:{}", self.config.host, self.config.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> ConnectorConfig {
        ConnectorConfig {
            kind: "sftp".into(),
            host: "sftp.example.com".into(),
            username: "steam".into(),
            password: "secret".into(),
            remote_path: "/home/steam/saves".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_port_and_name() {
        let conn = SftpConnector::new(config());
        assert_eq!(conn.name(), "sftp://sftp.example.com:22");
    }

    #[tokio::test]
    async fn test_connect_without_credentials_is_config_error() {
        let mut conn = SftpConnector::new(ConnectorConfig {
            password: String::new(),
            key_file: None,
            ..config()
        });
        let err = conn.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GsbtError::Config(_)));
        assert!(err.to_string().contains("no authentication method"));
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_key_file_is_config_error() {
        let mut conn = SftpConnector::new(ConnectorConfig {
            key_file: Some("/nonexistent/id_ed25519".into()),
            ..config()
        });
        let err = conn.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("key file"));
    }

    #[tokio::test]
    async fn test_operations_require_connect() {
        let cancel = CancellationToken::new();
        let mut conn = SftpConnector::new(config());

        assert!(matches!(conn.list(&cancel).await, Err(GsbtError::NotConnected)));
        let mut sink = Vec::new();
        assert!(matches!(
            conn.download(&cancel, "world.sav", &mut sink).await,
            Err(GsbtError::NotConnected)
        ));
        let mut source: &[u8] = b"x";
        assert!(matches!(
            conn.upload(&cancel, &mut source, "world.sav").await,
            Err(GsbtError::NotConnected)
        ));
    }

    #[test]
    fn test_relative_slash() {
        let root = Path::new("/home/steam/saves");
        assert_eq!(
            relative_slash(root, Path::new("/home/steam/saves/world/a.sav")),
            "world/a.sav"
        );
        assert_eq!(relative_slash(Path::new("."), Path::new("./a.sav")), "a.sav");
    }

    fn stat(perm: u32, size: u64) -> FileStat {
        FileStat {
            size: Some(size),
            uid: None,
            gid: None,
            perm: Some(perm),
            atime: None,
            mtime: Some(1_700_000_000),
        }
    }

    fn dir(path: &str) -> (PathBuf, FileStat) {
        (PathBuf::from(path), stat(0o040755, 0))
    }

    fn file(path: &str, size: u64) -> (PathBuf, FileStat) {
        (PathBuf::from(path), stat(0o100644, size))
    }

    fn walk_fake(
        root: &str,
        cancel: &CancellationToken,
    ) -> (Result<Vec<RemoteFile>>, Vec<PathBuf>) {
        let tree: HashMap<PathBuf, Vec<(PathBuf, FileStat)>> = HashMap::from([
            (
                PathBuf::from("/srv/game"),
                vec![
                    dir("/srv/game/."),
                    dir("/srv/game/.."),
                    file("/srv/game/ShooterGame.log", 7),
                    dir("/srv/game/Saved"),
                ],
            ),
            (
                PathBuf::from("/srv/game/Saved"),
                vec![
                    file("/srv/game/Saved/Island.ark", 2048),
                    dir("/srv/game/Saved/Config"),
                ],
            ),
            (
                PathBuf::from("/srv/game/Saved/Config"),
                vec![file("/srv/game/Saved/Config/Game.ini", 64)],
            ),
        ]);

        let mut visited = Vec::new();
        let mut out = Vec::new();
        let root = Path::new(root);
        let result = walk(
            &mut |dir: &Path| {
                visited.push(dir.to_path_buf());
                tree.get(dir)
                    .cloned()
                    .ok_or_else(|| GsbtError::List(format!("no such directory {}", dir.display())))
            },
            cancel,
            root,
            root,
            &mut out,
        );
        (result.map(|_| out), visited)
    }

    #[test]
    fn test_walk_recurses_and_relativizes() {
        let (entries, visited) = walk_fake("/srv/game", &CancellationToken::new());
        let entries = entries.unwrap();

        let paths: Vec<_> = entries.iter().map(|e| (e.path.as_str(), e.is_dir)).collect();
        assert_eq!(
            paths,
            vec![
                ("ShooterGame.log", false),
                ("Saved", true),
                ("Saved/Island.ark", false),
                ("Saved/Config", true),
                ("Saved/Config/Game.ini", false),
            ]
        );
        assert_eq!(visited.len(), 3);

        let ark = entries.iter().find(|e| e.path == "Saved/Island.ark").unwrap();
        assert_eq!(ark.size, 2048);
        assert_eq!(ark.modified.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_listing_drops_directories_and_filtered_files() {
        let (entries, _) = walk_fake("/srv/game", &CancellationToken::new());
        let filter = PathFilter::new(&[], &["*.log".to_string(), "Saved/Config/".to_string()]);
        let kept: Vec<_> = filter_listing(entries.unwrap(), &filter)
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(kept, vec!["Saved/Island.ark"]);
    }

    #[test]
    fn test_walk_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (entries, visited) = walk_fake("/srv/game", &cancel);
        assert!(matches!(entries, Err(GsbtError::Cancelled)));
        assert!(visited.is_empty());
    }
}
