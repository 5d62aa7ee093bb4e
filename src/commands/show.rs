//! Show command - displays configuration.

use crate::config::Config;
use crate::platform::{self, Platform};
use crate::template::TemplateRenderer;

/// Execute `config`.
pub fn cmd_show_config(config: &Config, platform: Platform) {
    config.print();
    println!();
    println!("Host:");
    println!("  platform: {}", platform);
    println!("  elevated: {}", platform::is_elevated());
    let templates = match &config.template_dir {
        Some(dir) => TemplateRenderer::at(dir),
        None => TemplateRenderer::from_current_dir(),
    };
    match templates {
        Ok(t) => println!("  templates: {}", t.root().display()),
        Err(e) => println!("  templates: NOT FOUND ({})", e),
    }
}
