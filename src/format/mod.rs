//! Destructive formatting of a target device.
//!
//! The formatter never decides *which* device to format; callers run the
//! safety checks first. Linux-family hosts run a wipe → label → partition →
//! mkfs pipeline of external tools. Windows hosts run one PowerShell script.

pub mod linux;
pub mod windows;

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Bytes zeroed at each end of the device (10 MiB).
pub const WIPE_BYTES: u64 = 10 << 20;

/// How long to wait for the kernel to expose the new partition node.
pub const PARTITION_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

const PARTITION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Partition path candidates for the first partition of `device`
/// (`/dev/sdb1` and `/dev/nvme0n1p1` styles), most likely first.
pub fn partition_candidates(device: &str) -> [String; 2] {
    let plain = format!("{}1", device);
    let with_p = format!("{}p1", device);
    if device.ends_with(|c: char| c.is_ascii_digit()) {
        [with_p, plain]
    } else {
        [plain, with_p]
    }
}

/// Poll until one of `candidates` exists or `timeout` elapses.
pub fn wait_for_partition(candidates: &[String], timeout: Duration) -> Option<String> {
    let start = Instant::now();
    loop {
        if let Some(found) = candidates.iter().find(|c| Path::new(c.as_str()).exists()) {
            return Some(found.clone());
        }
        if start.elapsed() >= timeout {
            return None;
        }
        thread::sleep(PARTITION_POLL_INTERVAL);
    }
}
