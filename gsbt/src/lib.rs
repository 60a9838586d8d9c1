//! gsbt - game server backup tool
//!
//! Pulls files from game servers over FTP, SFTP or the Nitrado API and
//! stores them as timestamped `.tar.gz` archives.

pub mod cli;
pub mod config;
pub mod connector;
pub mod executor;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use connector::{create_connector, Connector, ConnectorConfig, RemoteFile};
pub use executor::runner::{BackupRunner, RunOptions, RunStatus, RunSummary};
pub use executor::{BackupManager, BackupOutcome, BackupStats};
pub use utils::errors::GsbtError;
pub type Result<T> = std::result::Result<T, GsbtError>;
