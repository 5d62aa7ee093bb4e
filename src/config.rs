//! Configuration for the `syntropy` CLI.
//!
//! Reads a `.env` file (via `dotenvy`) and the process environment.
//! Environment variables take precedence over `.env`. The provisioning core
//! itself reads no environment; everything it needs is passed in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Directory under the operator home holding all Syntropy state.
pub const STATE_DIR_NAME: &str = ".syntropy";

pub const ENV_WORK_DIR: &str = "SYNTROPY_WORK_DIR";
pub const ENV_CACHE_DIR: &str = "SYNTROPY_CACHE_DIR";
pub const ENV_KEY_DIR: &str = "SYNTROPY_KEY_DIR";
pub const ENV_TEMPLATE_DIR: &str = "SYNTROPY_TEMPLATE_DIR";

/// Effective CLI configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Mount points are created here (default: ~/.syntropy/work)
    pub work_dir: PathBuf,
    /// Downloaded installer images (default: ~/.syntropy/cache)
    pub cache_dir: PathBuf,
    /// Host-side owner/community keys (default: ~/.syntropy/keys)
    pub key_dir: PathBuf,
    /// Explicit cloud-init template directory. `None` = search from cwd.
    pub template_dir: Option<PathBuf>,
}

impl Config {
    /// Load `.env` from the current directory (if any), then the process
    /// environment.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let home = dirs::home_dir().context("cannot resolve the home directory")?;
        Ok(Self::from_vars(&home, std::env::vars()))
    }

    /// Build from explicit variables. Relative paths resolve against `home`.
    pub fn from_vars<I>(home: &Path, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let state = home.join(STATE_DIR_NAME);
        let dir = |key: &str, default: &str| {
            vars.get(key)
                .map(|v| resolve(home, v))
                .unwrap_or_else(|| state.join(default))
        };

        Self {
            work_dir: dir(ENV_WORK_DIR, "work"),
            cache_dir: dir(ENV_CACHE_DIR, "cache"),
            key_dir: dir(ENV_KEY_DIR, "keys"),
            template_dir: vars.get(ENV_TEMPLATE_DIR).map(|v| resolve(home, v)),
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  {}: {}", ENV_WORK_DIR, self.work_dir.display());
        println!("  {}: {}", ENV_CACHE_DIR, self.cache_dir.display());
        println!("  {}: {}", ENV_KEY_DIR, self.key_dir.display());
        match &self.template_dir {
            Some(dir) => println!("  {}: {}", ENV_TEMPLATE_DIR, dir.display()),
            None => println!("  {}: (search ./templates/cloud-init)", ENV_TEMPLATE_DIR),
        }
    }
}

fn resolve(home: &Path, value: &str) -> PathBuf {
    let value = value.trim();
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        home.join(path)
    }
}
