//! Admin password hashing for the installed system.

use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::process::{self, Cmd, Runner};

/// Shadow entry for an account that cannot log in with a password.
pub const LOCKED_PASSWORD: &str = "!";

/// SHA-512 crypt hash of `password` via `openssl passwd -6`. An empty
/// password yields [`LOCKED_PASSWORD`].
pub fn hash_password(runner: &dyn Runner, password: &str) -> Result<String> {
    if password.is_empty() {
        return Ok(LOCKED_PASSWORD.to_string());
    }
    process::require_tools(runner, &["openssl"]).map_err(|e| {
        Error::new(ErrorKind::KeygenFailed, "cannot hash admin password").with_detail(e.to_string())
    })?;
    let result = Cmd::new("openssl")
        .args(["passwd", "-6", "-stdin"])
        .stdin(format!("{}\n", password))
        .run_with(runner)
        .kind(ErrorKind::KeygenFailed, "hashing admin password failed")?;
    let hash = result.stdout_trimmed();
    if !hash.starts_with("$6$") {
        return Err(Error::new(
            ErrorKind::KeygenFailed,
            "openssl did not return a SHA-512 crypt hash",
        ));
    }
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::scripted::ScriptedRunner;
    use crate::process::CommandResult;

    #[test]
    fn empty_password_locks_account() {
        let runner = ScriptedRunner::new();
        assert_eq!(hash_password(&runner, "").unwrap(), "!");
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn hash_comes_from_openssl() {
        let runner = ScriptedRunner::new().on(
            "openssl passwd",
            CommandResult::ok("$6$salt$hashhashhash\n"),
        );
        assert_eq!(hash_password(&runner, "hunter2").unwrap(), "$6$salt$hashhashhash");
        assert_eq!(runner.calls(), vec!["openssl passwd -6 -stdin"]);
    }

    #[test]
    fn unexpected_output_is_rejected() {
        let runner = ScriptedRunner::new().on("openssl passwd", CommandResult::ok("usage: ..."));
        assert!(hash_password(&runner, "pw").is_err());
    }
}
