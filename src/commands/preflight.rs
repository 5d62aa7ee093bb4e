//! Preflight command - runs preflight checks.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::platform::Platform;
use crate::preflight;
use crate::process::SystemRunner;

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, platform: Platform, cwd: &Path, strict: bool) -> Result<()> {
    if strict {
        preflight::run_preflight_or_fail(&SystemRunner, platform, config, cwd)?;
    } else {
        let report = preflight::run_preflight(&SystemRunner, platform, config, cwd);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to exit non-zero.");
        }
    }
    Ok(())
}
