//! CLI command handlers.
//!
//! Each submodule handles one CLI command:
//! - `node` - provision a node USB (`node create`)
//! - `usb` - list candidate devices
//! - `preflight` - check host tools and environment
//! - `show` - print effective configuration
//! - `image` - inspect the installer image cache

mod image;
pub mod node;
mod preflight;
mod show;
pub mod usb;

pub use image::cmd_image_check;
pub use node::{cmd_node_create, NodeCreateArgs};
pub use preflight::cmd_preflight;
pub use show::cmd_show_config;
pub use usb::cmd_usb_list;
