//! `gsbt backup`

use super::Globals;
use crate::executor::runner::{default_factory, BackupRunner, RunOptions, RunStatus, RunSummary};
use crate::transfer::progress::format_bytes;
use clap::Args;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Args, Debug, Clone, Default)]
pub struct BackupArgs {
    /// Back up this server only
    #[arg(long, value_name = "NAME")]
    pub server: Option<String>,

    /// Run servers one after another
    #[arg(long)]
    pub sequential: bool,
}

pub async fn run(
    globals: &Globals,
    args: BackupArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<RunStatus> {
    let config = globals.load_config()?;
    let options = RunOptions {
        sequential: args.sequential,
        server: args.server,
        output: globals.output,
        quiet: globals.quiet,
    };

    let runner = BackupRunner::new(config, options, default_factory());
    let summary = runner.run(cancel).await?;
    report(globals, &summary)?;
    Ok(summary.status())
}

fn report(globals: &Globals, summary: &RunSummary) -> anyhow::Result<()> {
    if globals.json() {
        let servers: Vec<_> = summary
            .outcomes
            .iter()
            .map(|o| match &o.result {
                Ok((archive, stats)) => json!({
                    "server": o.server,
                    "status": "success",
                    "archive_path": archive,
                    "files": stats.files,
                    "bytes": stats.bytes,
                    "duration_sec": stats.duration.as_secs_f64(),
                }),
                Err(e) => json!({
                    "server": o.server,
                    "status": "failed",
                    "error": e.to_string(),
                }),
            })
            .collect();
        let doc = json!({
            "successes": summary.successes(),
            "failures": summary.failures(),
            "servers": servers,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    // Per-server lines were already logged inside each server's span.
    match summary.status() {
        RunStatus::AllSucceeded => {
            let bytes: u64 = summary
                .outcomes
                .iter()
                .filter_map(|o| o.result.as_ref().ok())
                .map(|(_, stats)| stats.bytes)
                .sum();
            info!(
                "backup complete ({} success, {} total)",
                summary.successes(),
                format_bytes(bytes)
            )
        }
        _ => {
            for outcome in summary.outcomes.iter().filter(|o| !o.is_success()) {
                if let Err(e) = &outcome.result {
                    error!(server = %outcome.server, "{}", e);
                }
            }
            warn!(
                "backup complete with failures: {} success, {} failed",
                summary.successes(),
                summary.failures()
            )
        }
    }
    Ok(())
}
