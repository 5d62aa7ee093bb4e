//! Key pair generation.

use std::path::Path;

use super::KeyAlgorithm;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::process::{self, Cmd, Runner, SystemRunner};

/// Writes an OpenSSH key pair to `private_path` and `<private_path>.pub`.
pub trait KeyGenerator {
    fn generate(&self, algorithm: KeyAlgorithm, comment: &str, private_path: &Path) -> Result<()>;
}

/// Generator backed by `ssh-keygen`.
pub struct SshKeygen {
    runner: Box<dyn Runner>,
}

impl SshKeygen {
    pub fn new() -> Self {
        Self::with_runner(Box::new(SystemRunner))
    }

    pub fn with_runner(runner: Box<dyn Runner>) -> Self {
        Self { runner }
    }

    fn command(algorithm: KeyAlgorithm, comment: &str, private_path: &Path) -> Cmd {
        let mut cmd = Cmd::new("ssh-keygen").args(["-q", "-t", algorithm.ssh_type()]);
        if let Some(bits) = algorithm.bits() {
            cmd = cmd.arg("-b").arg(bits.to_string());
        }
        cmd.args(["-N", "", "-C", comment, "-f"]).arg_path(private_path)
    }
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for SshKeygen {
    fn generate(&self, algorithm: KeyAlgorithm, comment: &str, private_path: &Path) -> Result<()> {
        process::require_tools(self.runner.as_ref(), &["ssh-keygen"]).map_err(|e| {
            Error::new(ErrorKind::KeygenFailed, "cannot generate keys: required tool missing")
                .with_detail(e.to_string())
        })?;
        tracing::info!(algorithm = algorithm.tag(), path = %private_path.display(), "generating key pair");
        Self::command(algorithm, comment, private_path)
            .run_with(self.runner.as_ref())
            .kind(
                ErrorKind::KeygenFailed,
                format!("ssh-keygen failed for {}", private_path.display()),
            )?;
        Ok(())
    }
}
