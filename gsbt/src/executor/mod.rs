//! Backup execution: pulls one server's files and archives them.
//!
//! The manager owns a single run: connect, list, download everything that
//! passed the connector's filters into a private staging directory, then
//! compress the staging directory into a timestamped `.tar.gz`. The
//! multi-server fan-out lives in [`runner`].

pub mod archive;
pub mod runner;

use crate::connector::Connector;
use crate::transfer::progress::{format_bytes, format_duration};
use crate::transfer::{NullReporter, ProgressReporter, ProgressWriter};
use crate::utils::errors::{GsbtError, Result};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Summary of a finished backup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupStats {
    pub files: usize,
    /// Bytes actually written to staging
    pub bytes: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub archive_path: PathBuf,
    pub stats: BackupStats,
}

/// Runs backups for a single server.
pub struct BackupManager {
    pub backup_location: PathBuf,
    /// Staging root; `{backup_location}/.tmp` when unset
    pub temp_dir: Option<PathBuf>,
    pub reporter: Arc<dyn ProgressReporter>,
}

impl BackupManager {
    pub fn new(backup_location: impl Into<PathBuf>) -> Self {
        Self {
            backup_location: backup_location.into(),
            temp_dir: None,
            reporter: Arc::new(NullReporter),
        }
    }

    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    fn staging_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| self.backup_location.join(".tmp"))
    }

    /// Pull every listed file through `conn` and archive the result.
    ///
    /// No archive is written unless every download succeeded. Once
    /// `connect` succeeds, `close` is called exactly once whatever happens.
    pub async fn backup(
        &self,
        conn: &mut dyn Connector,
        cancel: &CancellationToken,
    ) -> Result<BackupOutcome> {
        let started = Instant::now();

        if self.backup_location.as_os_str().is_empty() {
            return Err(GsbtError::Config("backup location is required".into()));
        }

        let staging_root = self.staging_root();
        tokio::fs::create_dir_all(&staging_root).await.map_err(|e| {
            GsbtError::Archive(format!(
                "failed to create temp dir {}: {}",
                staging_root.display(),
                e
            ))
        })?;
        let staging = tempfile::Builder::new()
            .prefix("gsbt-")
            .tempdir_in(&staging_root)?;
        debug!(staging = %staging.path().display(), "Created staging directory");

        conn.connect(cancel).await?;
        info!(remote = %conn.name(), "Connected");

        let result = self.pull_and_archive(conn, cancel, staging.path()).await;

        if let Err(e) = conn.close().await {
            warn!(remote = %conn.name(), error = %e, "Failed to close connection");
        }

        let (archive_path, mut stats) = result?;
        stats.duration = started.elapsed();

        info!(
            archive = %archive_path.display(),
            files = stats.files,
            size = %format_bytes(stats.bytes),
            elapsed = %format_duration(stats.duration),
            "Backup complete"
        );

        Ok(BackupOutcome {
            archive_path,
            stats,
        })
    }

    async fn pull_and_archive(
        &self,
        conn: &mut dyn Connector,
        cancel: &CancellationToken,
        staging: &Path,
    ) -> Result<(PathBuf, BackupStats)> {
        let files = conn.list(cancel).await?;
        let files: Vec<_> = files.into_iter().filter(|f| !f.is_dir).collect();
        let total_bytes: u64 = files.iter().map(|f| f.size).sum();

        self.reporter.start(total_bytes, files.len());

        let mut stats = BackupStats::default();
        for file in &files {
            if cancel.is_cancelled() {
                self.reporter.close();
                return Err(GsbtError::Cancelled);
            }

            match self.pull_one(conn, cancel, staging, &file.path, file.size).await {
                Ok(written) => {
                    stats.files += 1;
                    stats.bytes += written;
                }
                Err(e) => {
                    self.reporter.close();
                    return Err(e);
                }
            }
        }

        self.reporter.close();

        if files.is_empty() {
            warn!(remote = %conn.name(), "No files matched; archive will be empty");
        }

        let archive_path = self
            .backup_location
            .join(archive::timestamped_filename());
        let src = staging.to_path_buf();
        let dest = archive_path.clone();
        tokio::task::spawn_blocking(move || archive::create_archive(&src, &dest)).await??;

        Ok((archive_path, stats))
    }

    async fn pull_one(
        &self,
        conn: &mut dyn Connector,
        cancel: &CancellationToken,
        staging: &Path,
        rel: &str,
        size: u64,
    ) -> Result<u64> {
        let local = staged_path(staging, rel)?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&local).await?;

        self.reporter.file_start(rel, size);

        let reporter = self.reporter.clone();
        let name = rel.to_string();
        let mut writer = ProgressWriter::new(
            file,
            Arc::new(move |written| reporter.file_progress(&name, written, size)),
        );

        conn.download(cancel, rel, &mut writer).await?;
        writer.flush().await?;

        self.reporter.file_done(rel);
        Ok(writer.bytes_written())
    }
}

/// Local path for a remote relative path. Rejects paths that would land
/// outside `staging`.
fn staged_path(staging: &Path, rel: &str) -> Result<PathBuf> {
    let mut local = staging.to_path_buf();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => local.push(part),
            Component::CurDir => {}
            _ => {
                return Err(GsbtError::Download(format!(
                    "refusing unsafe remote path: {}",
                    rel
                )))
            }
        }
    }
    if local == staging {
        return Err(GsbtError::Download(format!("empty remote path: {:?}", rel)));
    }
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::testing::{MockBehavior, MockConnector};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn start(&self, total_bytes: u64, file_count: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {} {}", total_bytes, file_count));
        }
        fn file_start(&self, name: &str, size: u64) {
            self.events.lock().unwrap().push(format!("file_start {} {}", name, size));
        }
        fn file_progress(&self, name: &str, written: u64, size: u64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("progress {} {}/{}", name, written, size));
        }
        fn file_done(&self, name: &str) {
            self.events.lock().unwrap().push(format!("file_done {}", name));
        }
        fn message(&self, text: &str) {
            self.events.lock().unwrap().push(format!("message {}", text));
        }
        fn close(&self) {
            self.events.lock().unwrap().push("close".to_string());
        }
    }

    fn archives_in(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().ends_with(".tar.gz"))
            .collect()
    }

    #[tokio::test]
    async fn test_backup_filters_downloads_and_archives() {
        let location = TempDir::new().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let manager =
            BackupManager::new(location.path()).with_reporter(reporter.clone());

        let mut conn = MockConnector::new(&[("a.txt", b"0123456789"), ("b.log", b"12345")])
            .with_patterns(&["*"], &["*.log"]);
        let closes = conn.close_calls.clone();

        let outcome = manager
            .backup(&mut conn, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.stats.files, 1);
        assert_eq!(outcome.stats.bytes, 10);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let entries = archive::list_entries(&outcome.archive_path).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(names, vec!["a.txt"]);

        let events = reporter.events.lock().unwrap();
        assert_eq!(events.first().map(String::as_str), Some("start 10 1"));
        assert!(events.contains(&"file_start a.txt 10".to_string()));
        assert!(events.contains(&"progress a.txt 10/10".to_string()));
        assert!(events.contains(&"file_done a.txt".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn test_download_failure_leaves_no_archive() {
        let location = TempDir::new().unwrap();
        let manager = BackupManager::new(location.path());

        let mut conn = MockConnector::new(&[("a.txt", b"aaa"), ("b.txt", b"bbb")]).with_behavior(
            MockBehavior {
                fail_download: Some("b.txt".into()),
                ..Default::default()
            },
        );
        let closes = conn.close_calls.clone();

        let err = manager
            .backup(&mut conn, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GsbtError::Download(_)), "got {err:?}");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(archives_in(location.path()).is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_skips_close() {
        let location = TempDir::new().unwrap();
        let manager = BackupManager::new(location.path());

        let mut conn = MockConnector::new(&[("a.txt", b"a")]).with_behavior(MockBehavior {
            fail_connect: true,
            ..Default::default()
        });
        let closes = conn.close_calls.clone();

        let err = manager
            .backup(&mut conn, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GsbtError::Connection(_)));
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert!(archives_in(location.path()).is_empty());
    }

    #[tokio::test]
    async fn test_staging_is_removed_after_run() {
        let location = TempDir::new().unwrap();
        let temp = TempDir::new().unwrap();
        let manager = BackupManager::new(location.path())
            .with_temp_dir(Some(temp.path().to_path_buf()));

        let mut conn = MockConnector::new(&[("saves/world.sav", b"world")]);
        let outcome = manager
            .backup(&mut conn, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.archive_path.starts_with(location.path()));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_produces_no_archive() {
        let location = TempDir::new().unwrap();
        let manager = BackupManager::new(location.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut conn = MockConnector::new(&[("a.txt", b"a")]);
        let closes = conn.close_calls.clone();
        let err = manager.backup(&mut conn, &cancel).await.unwrap_err();

        assert!(matches!(err, GsbtError::Cancelled));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(archives_in(location.path()).is_empty());
    }

    #[test]
    fn test_staged_path_rejects_escape() {
        let staging = Path::new("/tmp/stage");
        assert_eq!(
            staged_path(staging, "saves/a.sav").unwrap(),
            PathBuf::from("/tmp/stage/saves/a.sav")
        );
        assert!(staged_path(staging, "../etc/passwd").is_err());
        assert!(staged_path(staging, "/etc/passwd").is_err());
        assert!(staged_path(staging, "").is_err());
    }
}
