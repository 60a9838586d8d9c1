//! `gsbt prune`

use super::Globals;
use crate::config::Config;
use crate::executor::archive::{find_archives, StoredArchive};
use crate::transfer::progress::format_bytes;
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use serde_json::json;
use tracing::{info, warn};

#[derive(Args, Debug, Clone, Default)]
pub struct PruneArgs {
    /// Prune this server only
    #[arg(long, value_name = "NAME")]
    pub server: Option<String>,

    /// Show what would be deleted
    #[arg(long)]
    pub dry_run: bool,
}

/// Archives created before `now - prune_age days`.
pub fn expired(
    archives: Vec<StoredArchive>,
    prune_age: u32,
    now: DateTime<Utc>,
) -> Vec<StoredArchive> {
    let cutoff = now - Duration::days(i64::from(prune_age));
    archives.into_iter().filter(|a| a.created < cutoff).collect()
}

/// Candidates per server, in config order.
pub fn plan(
    config: &Config,
    server: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<(String, Vec<StoredArchive>)>> {
    let mut out = Vec::new();
    for s in config.select(server)? {
        let archives = find_archives(&s.backup_location(&config.defaults))?;
        out.push((s.name.clone(), expired(archives, s.prune_age(&config.defaults), now)));
    }
    Ok(out)
}

pub fn run(globals: &Globals, args: PruneArgs) -> anyhow::Result<()> {
    let config = globals.load_config()?;
    let plan = plan(&config, args.server.as_deref(), Utc::now())?;

    let mut deleted = 0usize;
    let mut freed = 0u64;
    let mut report = Vec::new();

    for (server, archives) in &plan {
        for archive in archives {
            if args.dry_run {
                info!(server = %server, archive = %archive.path.display(), "Would delete");
            } else {
                match std::fs::remove_file(&archive.path) {
                    Ok(()) => {
                        info!(server = %server, archive = %archive.path.display(), "Deleted");
                    }
                    Err(e) => {
                        warn!(
                            server = %server,
                            archive = %archive.path.display(),
                            error = %e,
                            "Failed to delete"
                        );
                        continue;
                    }
                }
            }
            deleted += 1;
            freed += archive.size;
            report.push(json!({
                "server": server,
                "path": archive.path,
                "created": archive.created,
                "bytes": archive.size,
            }));
        }
    }

    if globals.json() {
        let doc = json!({
            "dry_run": args.dry_run,
            "count": deleted,
            "bytes": freed,
            "archives": report,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else if args.dry_run {
        println!("would delete {} archive(s), {}", deleted, format_bytes(freed));
    } else {
        println!("deleted {} archive(s), freed {}", deleted, format_bytes(freed));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Connection, Defaults, Server};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn archive(day: u32) -> StoredArchive {
        StoredArchive {
            path: format!("/b/2024-05-{:02}_000000.tar.gz", day).into(),
            created: Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap(),
            size: 1,
        }
    }

    #[test]
    fn test_expired_uses_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap();
        let kept = expired(vec![archive(1), archive(20), archive(30)], 10, now);
        let days: Vec<u32> = kept
            .iter()
            .map(|a| chrono::Datelike::day(&a.created))
            .collect();
        assert_eq!(days, vec![1, 20]);
    }

    #[test]
    fn test_plan_honours_server_prune_age() {
        let root = TempDir::new().unwrap();
        for (server, name) in [
            ("ark", "2024-05-01_000000.tar.gz"),
            ("ark", "2024-05-29_000000.tar.gz"),
            ("dayz", "2024-05-25_000000.tar.gz"),
        ] {
            let dir = root.path().join(server);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let config = Config {
            defaults: Defaults {
                backup_location: root.path().to_string_lossy().into_owned(),
                prune_age: 30,
                ..Default::default()
            },
            servers: vec![
                Server {
                    name: "ark".into(),
                    connection: Connection::default(),
                    ..Default::default()
                },
                Server {
                    name: "dayz".into(),
                    prune_age: 3,
                    connection: Connection::default(),
                    ..Default::default()
                },
            ],
        };

        let now = Utc.with_ymd_and_hms(2024, 6, 5, 0, 0, 0).unwrap();
        let plan = plan(&config, None, now).unwrap();
        assert_eq!(plan[0].0, "ark");
        assert_eq!(plan[0].1.len(), 1);
        assert!(plan[0].1[0].path.ends_with("2024-05-01_000000.tar.gz"));
        assert_eq!(plan[1].0, "dayz");
        assert_eq!(plan[1].1.len(), 1);
    }
}
