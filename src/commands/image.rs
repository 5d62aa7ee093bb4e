//! Image command - inspects the installer image cache.

use anyhow::Result;

use crate::config::Config;
use crate::image::ImageCache;

/// Execute `image check <file> [--sha256 <hex>]`.
pub fn cmd_image_check(config: &Config, file_name: &str, sha256: Option<&str>) -> Result<()> {
    let cache = ImageCache::new(&config.cache_dir);
    let image = cache.verified(file_name, sha256)?;
    println!("  [OK] {} ({} bytes)", image.path.display(), image.size_bytes);
    match image.sha256 {
        Some(sum) => println!("  [OK] sha256 {}", sum),
        None => println!("  [WARN] no checksum given; contents not verified"),
    }
    Ok(())
}
