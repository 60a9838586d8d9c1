//! `gsbt list`

use super::Globals;
use crate::config::{Config, Server};
use crate::executor::archive::{find_archives, StoredArchive};
use crate::transfer::progress::format_bytes;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Show this server only
    #[arg(long, value_name = "NAME")]
    pub server: Option<String>,
}

/// What `list` knows about one server.
#[derive(Debug, Serialize)]
pub struct ServerListing {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub backup_location: PathBuf,
    pub prune_age: u32,
    pub archives: usize,
    pub total_bytes: u64,
    pub newest: Option<DateTime<Utc>>,
}

pub fn collect(config: &Config, server: Option<&str>) -> anyhow::Result<Vec<ServerListing>> {
    config
        .select(server)?
        .into_iter()
        .map(|s| listing(config, s))
        .collect()
}

fn listing(config: &Config, server: &Server) -> anyhow::Result<ServerListing> {
    let location = server.backup_location(&config.defaults);
    let archives: Vec<StoredArchive> = find_archives(&location)?;
    Ok(ServerListing {
        name: server.name.clone(),
        description: server.description.clone(),
        kind: server.connection.kind.clone(),
        prune_age: server.prune_age(&config.defaults),
        archives: archives.len(),
        total_bytes: archives.iter().map(|a| a.size).sum(),
        newest: archives.last().map(|a| a.created),
        backup_location: location,
    })
}

pub fn run(globals: &Globals, args: ListArgs) -> anyhow::Result<()> {
    let config = globals.load_config()?;
    let listings = collect(&config, args.server.as_deref())?;

    if globals.json() {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    for l in &listings {
        println!("{} ({})", l.name, l.kind);
        if !l.description.is_empty() {
            println!("  {}", l.description);
        }
        println!("  location:  {}", l.backup_location.display());
        println!("  archives:  {} ({})", l.archives, format_bytes(l.total_bytes));
        match l.newest {
            Some(newest) => println!("  newest:    {}", newest.format("%Y-%m-%d %H:%M:%S UTC")),
            None => println!("  newest:    never"),
        }
        println!("  prune age: {} days", l.prune_age);
    }
    Ok(())
}
