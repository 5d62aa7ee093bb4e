//! Host tool availability checks.

use crate::platform::Platform;
use crate::process::Runner;

use super::types::CheckResult;

/// (tool, package, purpose) for Linux-family hosts.
const LINUX_TOOLS: &[(&str, &str, &str)] = &[
    ("lsblk", "util-linux", "Required to enumerate and inspect devices"),
    ("mount", "util-linux", "Required to mount the USB partition"),
    ("umount", "util-linux", "Required to release mounts"),
    ("wipefs", "util-linux", "Required to erase filesystem signatures"),
    ("sgdisk", "gdisk", "Required to zap partition tables"),
    ("dd", "coreutils", "Required to zero the disk head and tail"),
    ("parted", "parted", "Required to partition the device"),
    ("partprobe", "parted", "Required to reread the partition table"),
    ("mkfs.fat", "dosfstools", "Required to create the FAT32 filesystem"),
    ("ssh-keygen", "openssh-clients", "Required to generate node keys"),
    ("sudo", "sudo", "Required for format and mount"),
];

/// Needed only for `--admin-password`.
const OPTIONAL_TOOLS: &[(&str, &str, &str)] =
    &[("openssl", "openssl", "Required to hash --admin-password")];

const POWERSHELL: (&str, &str, &str) = (
    "powershell.exe",
    "Windows PowerShell",
    "Required to query and format Windows disks",
);

/// Check every tool the given platform shells out to.
pub fn check_host_tools(runner: &dyn Runner, platform: Platform) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if platform.is_linux_family() {
        for (tool, package, purpose) in LINUX_TOOLS {
            results.push(check_tool(runner, tool, package, purpose, true));
        }
    } else {
        results.push(check_tool(
            runner,
            "ssh-keygen",
            "OpenSSH Client",
            "Required to generate node keys",
            true,
        ));
    }

    let (tool, package, purpose) = POWERSHELL;
    if platform.capabilities().powershell {
        results.push(check_tool(runner, tool, package, purpose, true));
    } else {
        results.push(CheckResult::skip(tool, "not used on this platform"));
    }

    for (tool, package, purpose) in OPTIONAL_TOOLS {
        results.push(check_tool(runner, tool, package, purpose, false));
    }

    results
}

fn check_tool(
    runner: &dyn Runner,
    tool: &str,
    package: &str,
    purpose: &str,
    required: bool,
) -> CheckResult {
    match runner.locate(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        None => {
            let msg = format!("Not found. Install '{}'. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}
