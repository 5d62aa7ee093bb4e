//! Provisioning environment checks (directories, templates, privileges).

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::platform::{self, Platform};
use crate::template::TemplateRenderer;

use super::types::CheckResult;

/// Check directories, the template set and privileges.
pub fn check_environment(config: &Config, platform: Platform, cwd: &Path) -> Vec<CheckResult> {
    let mut results = vec![
        check_writable("work dir", &config.work_dir),
        check_writable("key dir", &config.key_dir),
        check_writable("cache dir", &config.cache_dir),
        check_templates(config, cwd),
    ];

    if platform::is_elevated() {
        results.push(CheckResult::pass_with("privileges", "running elevated"));
    } else if platform.capabilities().sudo_elevation {
        results.push(CheckResult::pass_with(
            "privileges",
            "format and mount will use sudo",
        ));
    } else {
        results.push(CheckResult::warn(
            "privileges",
            "not elevated - run from an administrator shell to format",
        ));
    }

    results
}

/// Create `dir` if needed and prove a file can be written there.
fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
    }
    let probe = dir.join(".preflight-test");
    match fs::write(&probe, "test") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            CheckResult::pass_with(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}

/// The templates must parse, not merely exist.
fn check_templates(config: &Config, cwd: &Path) -> CheckResult {
    let renderer = match &config.template_dir {
        Some(dir) => TemplateRenderer::at(dir),
        None => TemplateRenderer::discover(cwd),
    };
    match renderer.and_then(|r| r.check().map(|n| (r, n))) {
        Ok((renderer, placeholders)) => CheckResult::pass_with(
            "templates",
            &format!("{} ({} placeholders)", renderer.root().display(), placeholders),
        ),
        Err(e) => CheckResult::fail("templates", &e.to_string()),
    }
}
