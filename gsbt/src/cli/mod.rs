//! CLI argument parsing with clap

pub mod backup;
pub mod init;
pub mod list;
pub mod prune;
pub mod restore;
pub mod schema;
pub mod version;

use crate::config::{find_config_file, load_config, Config};
use crate::executor::runner::RunStatus;
use crate::utils::logger::OutputFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Game server backup tool
#[derive(Parser, Debug)]
#[command(name = "gsbt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the config file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub output: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download and archive files from configured servers
    Backup(backup::BackupArgs),

    /// Show configured servers and their archives
    List(list::ListArgs),

    /// Delete archives older than the configured prune age
    Prune(prune::PruneArgs),

    /// Restore an archive
    Restore(restore::RestoreArgs),

    /// Write a sample configuration file
    Init(init::InitArgs),

    /// Write the JSON Schema of the configuration file
    Schema(schema::SchemaArgs),

    /// Print version information
    Version,
}

/// Settings every command can read.
#[derive(Debug, Clone)]
pub struct Globals {
    pub config: Option<PathBuf>,
    pub output: OutputFormat,
    pub quiet: bool,
}

impl Globals {
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let path = find_config_file(self.config.as_deref())?;
        tracing::debug!(path = %path.display(), "Loading config");
        Ok(load_config(&path)?)
    }

    pub fn json(&self) -> bool {
        self.output == OutputFormat::Json
    }
}

impl Cli {
    pub fn globals(&self) -> Globals {
        Globals {
            config: self.config.clone(),
            output: self.output,
            quiet: self.quiet,
        }
    }
}

/// Run the parsed command. Only `backup` can end in a partial failure.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> anyhow::Result<RunStatus> {
    let globals = cli.globals();
    match cli.command {
        Commands::Backup(args) => backup::run(&globals, args, &cancel).await,
        Commands::List(args) => list::run(&globals, args).map(|_| RunStatus::AllSucceeded),
        Commands::Prune(args) => prune::run(&globals, args).map(|_| RunStatus::AllSucceeded),
        Commands::Restore(args) => restore::run(&globals, args)
            .await
            .map(|_| RunStatus::AllSucceeded),
        Commands::Init(args) => init::run(args).map(|_| RunStatus::AllSucceeded),
        Commands::Schema(args) => schema::run(args).map(|_| RunStatus::AllSucceeded),
        Commands::Version => {
            version::run(&globals)?;
            Ok(RunStatus::AllSucceeded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["gsbt", "backup", "--output", "json", "-q", "--sequential"])
            .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.quiet);
        match cli.command {
            Commands::Backup(args) => assert!(args.sequential),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["gsbt", "-v", "-q", "list"]).is_err());
    }

    #[test]
    fn test_restore_requires_archive() {
        assert!(Cli::try_parse_from(["gsbt", "restore"]).is_err());
        let cli = Cli::try_parse_from(["gsbt", "restore", "a.tar.gz", "--local", "out"]).unwrap();
        match cli.command {
            Commands::Restore(args) => {
                assert_eq!(args.archive, PathBuf::from("a.tar.gz"));
                assert_eq!(args.local, Some(PathBuf::from("out")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
