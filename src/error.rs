//! Typed errors for the provisioning core.
//!
//! Every failure that leaves the core carries an [`ErrorKind`] from a closed
//! set. Wrapping keeps the inner kind reachable through [`Error::matches`], so
//! a caller can ask "was this ultimately a keygen failure?" no matter how
//! many stage or context layers were added on the way out.

use std::fmt;

use thiserror::Error;

use crate::pipeline::Stage;

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of failure kinds surfaced by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A caller-supplied field failed validation.
    InvalidInput,
    /// Device path does not exist.
    DeviceNotFound,
    /// Device is mounted or busy.
    DeviceInUse,
    /// Device was classified as a system disk.
    DeviceIsSystem,
    /// A step in the format pipeline failed.
    FormatFailed,
    /// The platform mount primitive failed.
    MountFailed,
    /// Identity generation or storage failed.
    KeygenFailed,
    /// Template resolution or rendering failed.
    TemplateFailed,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Stable kebab-case tag printed on stderr by the CLI.
    pub fn tag(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::DeviceNotFound => "device-not-found",
            ErrorKind::DeviceInUse => "device-in-use",
            ErrorKind::DeviceIsSystem => "device-is-system",
            ErrorKind::FormatFailed => "format-failed",
            ErrorKind::MountFailed => "mount-failed",
            ErrorKind::KeygenFailed => "keygen-failed",
            ErrorKind::TemplateFailed => "template-failed",
            ErrorKind::Internal => "internal",
        }
    }

    /// Advisory HTTP-equivalent severity.
    pub fn severity(self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::DeviceNotFound => 404,
            ErrorKind::DeviceInUse | ErrorKind::DeviceIsSystem => 409,
            ErrorKind::FormatFailed
            | ErrorKind::MountFailed
            | ErrorKind::KeygenFailed
            | ErrorKind::TemplateFailed => 422,
            ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Core error: kind, human message, optional detail, optional stage.
#[derive(Debug, Error)]
#[error("{}", render(.stage, .message, .detail))]
pub struct Error {
    kind: ErrorKind,
    message: String,
    detail: Option<String>,
    stage: Option<Stage>,
    #[source]
    source: Option<Box<Error>>,
}

fn render(stage: &Option<Stage>, message: &String, detail: &Option<String>) -> String {
    let mut out = String::new();
    if let Some(stage) = stage {
        out.push_str(&format!("stage {} ({}): ", stage.number(), stage.label()));
    }
    out.push_str(message);
    if let Some(detail) = detail {
        out.push_str(": ");
        out.push_str(detail);
    }
    out
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            stage: None,
            source: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach a detail string (tool stderr, searched paths, ...).
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        if !detail.trim().is_empty() {
            self.detail = Some(detail.trim().to_string());
        }
        self
    }

    /// Convert an anyhow chain from the process layer into a typed error.
    pub fn from_anyhow(kind: ErrorKind, message: impl Into<String>, err: anyhow::Error) -> Self {
        Self::new(kind, message).with_detail(format!("{:#}", err))
    }

    /// Wrap `inner` under a new message. The new error inherits the inner kind.
    pub fn wrap(message: impl Into<String>, inner: Error) -> Self {
        Self {
            kind: inner.kind,
            message: format!("{}: {}", message.into(), inner),
            detail: None,
            stage: None,
            source: Some(Box::new(inner)),
        }
    }

    /// Wrap `inner` as the failure of a pipeline stage.
    pub fn at_stage(stage: Stage, inner: Error) -> Self {
        Self {
            kind: inner.kind,
            message: inner.to_string(),
            detail: None,
            stage: Some(stage),
            source: Some(Box::new(inner)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Stage of the outermost stage wrapper, if any.
    pub fn stage(&self) -> Option<Stage> {
        self.stage
            .or_else(|| self.source.as_ref().and_then(|inner| inner.stage()))
    }

    pub fn severity(&self) -> u16 {
        self.kind.severity()
    }

    /// True if this error or anything it wraps has `kind`.
    pub fn matches(&self, kind: ErrorKind) -> bool {
        self.kind == kind
            || self
                .source
                .as_ref()
                .map(|inner| inner.matches(kind))
                .unwrap_or(false)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::internal("I/O error").with_detail(err.to_string())
    }
}

/// Attach a kind and message to fallible results from the process layer.
pub trait ResultExt<T> {
    fn kind(self, kind: ErrorKind, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for anyhow::Result<T> {
    fn kind(self, kind: ErrorKind, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::from_anyhow(kind, message, e))
    }
}

impl<T> ResultExt<T> for std::io::Result<T> {
    fn kind(self, kind: ErrorKind, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::new(kind, message).with_detail(e.to_string()))
    }
}
