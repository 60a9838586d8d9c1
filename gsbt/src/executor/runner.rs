//! Multi-server backup runs.
//!
//! Each selected server gets its own connector, staging directory and
//! reporter. Servers run concurrently on separate tokio tasks unless the run
//! is sequential; one server failing never stops the others.

use super::{BackupManager, BackupStats};
use crate::config::{to_connector_config, Config, Server};
use crate::connector::{create_connector, Connector, ConnectorConfig};
use crate::transfer::progress::{format_bytes, format_duration};
use crate::transfer::{reporter_for, shared_multi_progress};
use crate::utils::errors::Result;
use crate::utils::logger::OutputFormat;
use indicatif::MultiProgress;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

/// Builds a connector from resolved settings. Swappable for tests.
pub type ConnectorFactory =
    Arc<dyn Fn(ConnectorConfig) -> Result<Box<dyn Connector>> + Send + Sync>;

pub fn default_factory() -> ConnectorFactory {
    Arc::new(create_connector)
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// One server at a time
    pub sequential: bool,
    /// Only back up the named server
    pub server: Option<String>,
    pub output: OutputFormat,
    pub quiet: bool,
}

#[derive(Debug)]
pub struct ServerOutcome {
    pub server: String,
    pub result: Result<(PathBuf, BackupStats)>,
}

impl ServerOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    AllSucceeded,
    PartialFailure,
    AllFailed,
}

impl RunStatus {
    /// Process exit code for this status.
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::AllSucceeded => 0,
            RunStatus::PartialFailure => 2,
            RunStatus::AllFailed => 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<ServerOutcome>,
}

impl RunSummary {
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }

    pub fn status(&self) -> RunStatus {
        match (self.successes(), self.failures()) {
            (_, 0) => RunStatus::AllSucceeded,
            (0, _) => RunStatus::AllFailed,
            _ => RunStatus::PartialFailure,
        }
    }
}

pub struct BackupRunner {
    config: Arc<Config>,
    options: RunOptions,
    factory: ConnectorFactory,
    multi: Arc<MultiProgress>,
}

impl BackupRunner {
    pub fn new(config: Config, options: RunOptions, factory: ConnectorFactory) -> Self {
        Self {
            config: Arc::new(config),
            options,
            factory,
            multi: shared_multi_progress(),
        }
    }

    /// Back up every selected server. Fails before doing any work when the
    /// server filter names an unknown server or nothing is configured.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let servers: Vec<Server> = self
            .config
            .select(self.options.server.as_deref())?
            .into_iter()
            .cloned()
            .collect();

        let sequential = self.options.sequential || servers.len() == 1;
        info!(
            servers = servers.len(),
            mode = if sequential { "sequential" } else { "concurrent" },
            "Starting backup run"
        );

        let mut outcomes = Vec::with_capacity(servers.len());
        if sequential {
            for server in servers {
                outcomes.push(self.server_task(server, cancel.clone()).await);
            }
        } else {
            let mut handles = Vec::with_capacity(servers.len());
            for server in servers {
                let name = server.name.clone();
                let task = self.server_task(server, cancel.clone());
                handles.push((name, tokio::spawn(task)));
            }
            for (name, handle) in handles {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => ServerOutcome {
                        server: name,
                        result: Err(e.into()),
                    },
                };
                outcomes.push(outcome);
            }
        }

        let summary = RunSummary { outcomes };
        info!(
            succeeded = summary.successes(),
            failed = summary.failures(),
            "Backup run finished"
        );
        Ok(summary)
    }

    /// Owned future for one server so it can be spawned.
    fn server_task(
        &self,
        server: Server,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = ServerOutcome> + Send + 'static {
        let config = self.config.clone();
        let factory = self.factory.clone();
        let reporter = reporter_for(
            self.options.output,
            self.options.quiet,
            &self.multi,
            &server.name,
        );
        let span = tracing::info_span!("server", name = %server.name);

        async move {
            info!("Starting backup");
            let manager = BackupManager::new(server.backup_location(&config.defaults))
                .with_temp_dir(config.defaults.temp_dir())
                .with_reporter(reporter);

            let result = run_one(&server, &config, &factory, &manager, &cancel).await;
            match &result {
                Ok((archive, stats)) => info!(
                    archive = %archive.display(),
                    files = stats.files,
                    bytes = stats.bytes,
                    size = %format_bytes(stats.bytes),
                    elapsed = %format_duration(stats.duration),
                    "Saved"
                ),
                Err(e) => error!(error = %e, "Backup failed"),
            }

            ServerOutcome {
                server: server.name,
                result,
            }
        }
        .instrument(span)
    }
}

async fn run_one(
    server: &Server,
    config: &Config,
    factory: &ConnectorFactory,
    manager: &BackupManager,
    cancel: &CancellationToken,
) -> Result<(PathBuf, BackupStats)> {
    let conn_config = to_connector_config(server, &config.defaults)?;
    let build = factory.as_ref();
    let mut conn = build(conn_config)?;
    let outcome = manager.backup(conn.as_mut(), cancel).await?;
    Ok((outcome.archive_path, outcome.stats))
}
