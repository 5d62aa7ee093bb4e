//! Preflight checks for USB provisioning.
//!
//! Validates host tools and the local environment before any device is
//! touched. Run with `syntropy preflight` to check everything is ready.

mod environment;
mod host_tools;
mod types;

use std::path::Path;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::platform::Platform;
use crate::process::Runner;

pub use environment::check_environment;
pub use host_tools::check_host_tools;
pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(
    runner: &dyn Runner,
    platform: Platform,
    config: &Config,
    cwd: &Path,
) -> PreflightReport {
    let mut checks = vec![CheckResult::pass_with("platform", platform.tag())];

    println!("Checking host tools...");
    checks.extend(check_host_tools(runner, platform));

    println!("Checking environment...");
    checks.extend(check_environment(config, platform, cwd));

    println!();
    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(
    runner: &dyn Runner,
    platform: Platform,
    config: &Config,
    cwd: &Path,
) -> Result<()> {
    let report = run_preflight(runner, platform, config, cwd);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before provisioning.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
