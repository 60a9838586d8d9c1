//! `gsbt restore`
//!
//! Local extraction only. Pushing an archive back to a server is not
//! implemented yet.

use super::Globals;
use crate::executor::archive::{extract_archive, list_entries};
use crate::transfer::progress::format_bytes;
use anyhow::{bail, Context};
use clap::Args;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args, Debug, Clone, Default)]
pub struct RestoreArgs {
    /// Archive to restore
    pub archive: PathBuf,

    /// Restore to this server
    #[arg(long, value_name = "NAME")]
    pub server: Option<String>,

    /// Extract into this local directory
    #[arg(long, value_name = "DIR")]
    pub local: Option<PathBuf>,

    /// List what would be restored
    #[arg(long)]
    pub dry_run: bool,

    /// Allow extracting into a non-empty directory
    #[arg(long)]
    pub force: bool,
}

fn is_non_empty_dir(path: &Path) -> anyhow::Result<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("cannot read {}", path.display())),
    }
}

pub async fn run(globals: &Globals, args: RestoreArgs) -> anyhow::Result<()> {
    if !args.archive.is_file() {
        bail!("archive not found: {}", args.archive.display());
    }

    let Some(target) = args.local.clone() else {
        if let Some(server) = &args.server {
            bail!("restore to server {:?} is not implemented; use --local DIR to extract", server);
        }
        bail!("specify --local DIR to extract the archive");
    };

    if args.dry_run {
        let archive = args.archive.clone();
        let entries = tokio::task::spawn_blocking(move || list_entries(&archive)).await??;
        let files: Vec<_> = entries.iter().filter(|e| !e.is_dir).collect();
        let bytes: u64 = files.iter().map(|e| e.size).sum();

        if globals.json() {
            let listed: Vec<_> = files
                .iter()
                .map(|e| json!({"path": e.path, "bytes": e.size}))
                .collect();
            let doc = json!({
                "archive": args.archive,
                "target": target,
                "dry_run": true,
                "files": listed,
                "bytes": bytes,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        } else {
            for entry in &files {
                println!("{}  ({})", entry.path, format_bytes(entry.size));
            }
            println!(
                "would extract {} file(s), {} into {}",
                files.len(),
                format_bytes(bytes),
                target.display()
            );
        }
        return Ok(());
    }

    if !args.force && is_non_empty_dir(&target)? {
        bail!(
            "target directory {} is not empty; use --force to extract anyway",
            target.display()
        );
    }

    info!(archive = %args.archive.display(), target = %target.display(), "Extracting");
    let archive = args.archive.clone();
    let dest = target.clone();
    let count = tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
        .await?
        .with_context(|| format!("failed to extract {}", args.archive.display()))?;

    if globals.json() {
        let doc = json!({
            "archive": args.archive,
            "target": target,
            "files": count,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        println!("extracted {} file(s) into {}", count, target.display());
    }
    Ok(())
}
