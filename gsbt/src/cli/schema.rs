//! `gsbt schema`

use crate::config::config_schema;
use anyhow::Context;
use clap::Args;
use std::path::PathBuf;

pub const DEFAULT_SCHEMA_FILE: &str = "gsbt.schema.json";

#[derive(Args, Debug, Clone)]
pub struct SchemaArgs {
    /// Output file path
    #[arg(id = "schema_output", value_name = "OUTPUT", default_value = DEFAULT_SCHEMA_FILE)]
    pub output: PathBuf,
}

pub fn run(args: SchemaArgs) -> anyhow::Result<()> {
    let data = serde_json::to_string_pretty(&config_schema())?;

    if let Some(dir) = args.output.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }
    std::fs::write(&args.output, data)
        .with_context(|| format!("failed to write schema file {}", args.output.display()))?;

    println!("Schema written to {}", args.output.display());
    Ok(())
}
