//! Syntropy USB provisioning core.
//!
//! The `syntropy` binary is a thin CLI over these modules; integration
//! tests drive the same API with fake host providers.

pub mod commands;
pub mod common;
pub mod config;
pub mod device;
pub mod error;
pub mod format;
pub mod host;
pub mod identity;
pub mod image;
pub mod mount;
pub mod node;
pub mod pipeline;
pub mod platform;
pub mod preflight;
pub mod process;
pub mod template;
pub mod timing;

pub use error::{Error, ErrorKind, Result};
