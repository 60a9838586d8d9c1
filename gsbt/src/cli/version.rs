//! `gsbt version`

use super::Globals;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub version: &'static str,
    pub commit: &'static str,
    pub build_date: &'static str,
}

/// Version plus whatever the build injected through `GSBT_COMMIT` and
/// `GSBT_BUILD_DATE`.
pub fn info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GSBT_COMMIT").unwrap_or("unknown"),
        build_date: option_env!("GSBT_BUILD_DATE").unwrap_or("unknown"),
    }
}

pub fn run(globals: &Globals) -> anyhow::Result<()> {
    let info = info();
    if globals.json() {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        println!("gsbt {}", info.version);
        println!("  commit: {}", info.commit);
        println!("  built:  {}", info.build_date);
    }
    Ok(())
}
