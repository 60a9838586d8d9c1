//! `gsbt init`

use crate::config::{LOCAL_CONFIG_FILE, SAMPLE_CONFIG};
use anyhow::{bail, Context};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    /// Output file path
    #[arg(short = 'o', long = "outfile", default_value = LOCAL_CONFIG_FILE)]
    pub outfile: PathBuf,

    /// Overwrite an existing file
    #[arg(short, long)]
    pub force: bool,
}

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    let path = &args.outfile;
    if path.exists() && !args.force {
        bail!(
            "file {} already exists; use --force to overwrite",
            path.display()
        );
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    std::fs::write(path, SAMPLE_CONFIG)
        .with_context(|| format!("failed to write config file {}", path.display()))?;

    println!("Configuration initialized at {}", path.display());
    Ok(())
}
