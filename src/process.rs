//! External tool invocation for the host providers.
//!
//! Every external tool the core touches (lsblk, parted, mkfs.fat, mount,
//! ssh-keygen, powershell.exe, ...) goes through [`Cmd`]. Commands capture
//! stderr so failures carry a useful message, and execution is routed
//! through a [`Runner`] so host providers can be driven without touching
//! real block devices.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Exit status and captured output of one external tool.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    /// Exit code, or None if terminated by signal.
    pub code: Option<i32>,
    /// Lossy UTF-8 stdout.
    pub stdout: String,
    /// Lossy UTF-8 stderr.
    pub stderr: String,
}

impl CommandResult {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Zero exit status.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code; -1 when killed by a signal.
    pub fn code(&self) -> i32 {
        self.code.unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Executes commands. The real implementation spawns processes; tests
/// substitute a scripted one.
pub trait Runner {
    /// Run `cmd` and capture its output. Fails only if the program could
    /// not be started; exit codes are judged by [`Cmd::run_with`].
    fn exec(&self, cmd: &Cmd) -> Result<CommandResult>;

    /// Locate a program in PATH.
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}

/// Spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn exec(&self, cmd: &Cmd) -> Result<CommandResult> {
        let (program, args) = cmd.argv();
        let mut command = Command::new(&program);
        command.args(&args);

        let output = if let Some(ref input) = cmd.stdin {
            let mut child = command
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .with_context(|| format!("Failed to execute '{}'. Is it installed?", program))?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .with_context(|| format!("Failed to write stdin of '{}'", program))?;
            }
            child
                .wait_with_output()
                .with_context(|| format!("Failed to wait for '{}'", program))?
        } else {
            command
                .output()
                .with_context(|| format!("Failed to execute '{}'. Is it installed?", program))?
        };

        Ok(CommandResult {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// One external tool invocation, built up then run.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    /// Non-zero exit is returned, not raised.
    allow_fail: bool,
    /// Replaces "'<program>' failed" in errors.
    error_prefix: Option<String>,
    /// Run through the platform elevation wrapper.
    sudo: bool,
    stdin: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            allow_fail: false,
            error_prefix: None,
            sudo: false,
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Lossy path argument; device and mount paths are ASCII in practice.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Return non-zero exits as results (probes, best-effort cleanup).
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Message used in place of the program name when the tool fails.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Run through `sudo`.
    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    /// Feed `input` to the command's stdin.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The program and arguments actually executed, elevation included.
    pub fn argv(&self) -> (String, Vec<String>) {
        if self.sudo {
            let mut args = Vec::with_capacity(self.args.len() + 1);
            args.push(self.program.clone());
            args.extend(self.args.iter().cloned());
            ("sudo".to_string(), args)
        } else {
            (self.program.clone(), self.args.clone())
        }
    }

    /// Space-joined command line, for logs and test assertions.
    pub fn display(&self) -> String {
        let (program, args) = self.argv();
        std::iter::once(program)
            .chain(args)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the command on the host and capture output.
    pub fn run(self) -> Result<CommandResult> {
        self.run_with(&SystemRunner)
    }

    /// Run the command through `runner` and capture output.
    pub fn run_with(self, runner: &dyn Runner) -> Result<CommandResult> {
        tracing::debug!(command = %self.display(), "exec");
        let result = runner.exec(&self)?;

        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }
}

// =============================================================================
// Tool lookup
// =============================================================================

/// Fail unless every program in `tools` is in PATH. The error names the
/// first missing tool.
pub fn require_tools(runner: &dyn Runner, tools: &[&str]) -> Result<()> {
    for tool in tools {
        if runner.locate(tool).is_none() {
            bail!("'{}' not found in PATH", tool);
        }
    }
    Ok(())
}


// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::scripted::ScriptedRunner;
    use super::*;

    #[test]
    fn test_run_success() {
        let result = Cmd::new("echo").arg("hello").run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Cmd::new("ls").arg("/nonexistent_path_12345").run().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("No such file") || msg.contains("cannot access"));
    }

    #[test]
    fn test_stdin_is_forwarded() {
        let result = Cmd::new("cat").stdin("piped input").run().unwrap();
        assert_eq!(result.stdout_trimmed(), "piped input");
    }

    #[test]
    fn test_custom_error_message() {
        let err = Cmd::new("false")
            .error_msg("parted mklabel failed")
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("parted mklabel failed"));
    }

    #[test]
    fn test_allow_fail() {
        let result = Cmd::new("false").allow_fail().run().unwrap();
        assert!(!result.success());
        assert_eq!(result.code(), 1);
    }

    #[test]
    fn test_sudo_prefixes_argv() {
        let cmd = Cmd::new("wipefs").args(["-a", "/dev/sdb"]).sudo();
        assert_eq!(cmd.display(), "sudo wipefs -a /dev/sdb");
        assert_eq!(cmd.program(), "wipefs");
    }

    #[test]
    fn test_missing_program_is_named() {
        let err = Cmd::new("nonexistent_program_12345").run().unwrap_err();
        assert!(err.to_string().contains("nonexistent_program_12345"));
    }

    #[test]
    fn test_require_tools_names_first_missing() {
        let runner = ScriptedRunner::new().without("sgdisk");
        let err = require_tools(&runner, &["wipefs", "sgdisk", "parted"]).unwrap_err();
        assert_eq!(err.to_string(), "'sgdisk' not found in PATH");
    }

    #[test]
    fn test_scripted_runner_failure_is_reported() {
        let runner =
            ScriptedRunner::new().on("sudo parted", CommandResult::failed(1, "Error: busy"));
        let err = Cmd::new("parted")
            .args(["-s", "/dev/sdb", "mklabel", "msdos"])
            .sudo()
            .run_with(&runner)
            .unwrap_err();
        assert!(err.to_string().contains("Error: busy"));
        assert_eq!(runner.calls(), vec!["sudo parted -s /dev/sdb mklabel msdos"]);
    }
}
