//! Host platform detection.
//!
//! The platform decides which host-tooling family the device subsystem
//! uses. It is a pure function of the running host, so the first answer is
//! memoized for the rest of the process.

use std::fmt;
use std::fs;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Host-tooling family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    NativeLinux,
    LinuxUnderWindows,
    NativeWindows,
}

/// What the host tooling of a platform can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Destructive operations go through `sudo`.
    pub sudo_elevation: bool,
    /// Block devices can be checked with a stat call.
    pub block_stat: bool,
    /// Windows-side queries run through `powershell.exe`.
    pub powershell: bool,
}

impl Platform {
    pub fn tag(self) -> &'static str {
        match self {
            Platform::NativeLinux => "native-linux",
            Platform::LinuxUnderWindows => "linux-under-windows",
            Platform::NativeWindows => "native-windows",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "native-linux" => Some(Platform::NativeLinux),
            "linux-under-windows" => Some(Platform::LinuxUnderWindows),
            "native-windows" => Some(Platform::NativeWindows),
            _ => None,
        }
    }

    pub fn is_linux_family(self) -> bool {
        !matches!(self, Platform::NativeWindows)
    }

    pub fn capabilities(self) -> Capabilities {
        match self {
            Platform::NativeLinux => Capabilities {
                sudo_elevation: true,
                block_stat: true,
                powershell: false,
            },
            Platform::LinuxUnderWindows => Capabilities {
                sudo_elevation: true,
                block_stat: true,
                powershell: true,
            },
            Platform::NativeWindows => Capabilities {
                sudo_elevation: false,
                block_stat: false,
                powershell: true,
            },
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Detect the host platform. Cached after the first call.
pub fn detect() -> Platform {
    static PLATFORM: OnceLock<Platform> = OnceLock::new();
    *PLATFORM.get_or_init(|| {
        let platform = detect_uncached();
        tracing::debug!(platform = platform.tag(), "detected host platform");
        platform
    })
}

fn detect_uncached() -> Platform {
    if cfg!(windows) {
        return Platform::NativeWindows;
    }
    if cfg!(target_os = "linux") {
        if let Some(release) = kernel_release() {
            return classify_kernel_release(&release);
        }
    }
    Platform::NativeLinux
}

/// Classify a Linux kernel version string.
///
/// Microsoft-built WSL kernels carry "microsoft" in their release string
/// (e.g. `5.15.153.1-microsoft-standard-WSL2`).
pub fn classify_kernel_release(release: &str) -> Platform {
    if release.to_ascii_lowercase().contains("microsoft") {
        Platform::LinuxUnderWindows
    } else {
        Platform::NativeLinux
    }
}

fn kernel_release() -> Option<String> {
    ["/proc/sys/kernel/osrelease", "/proc/version"]
        .iter()
        .find_map(|path| fs::read_to_string(path).ok())
        .map(|s| s.trim().to_string())
}

/// True if the current process runs with administrator rights.
#[cfg(unix)]
pub fn is_elevated() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// True if the current process runs with administrator rights.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    // `net session` only succeeds from an elevated shell.
    crate::process::Cmd::new("net")
        .arg("session")
        .allow_fail()
        .run()
        .map(|r| r.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wsl_kernel_is_detected_case_insensitively() {
        assert_eq!(
            classify_kernel_release("5.15.153.1-microsoft-standard-WSL2"),
            Platform::LinuxUnderWindows
        );
        assert_eq!(
            classify_kernel_release("4.4.0-19041-Microsoft"),
            Platform::LinuxUnderWindows
        );
    }

    #[test]
    fn regular_kernel_is_native() {
        assert_eq!(
            classify_kernel_release("6.8.0-45-generic"),
            Platform::NativeLinux
        );
    }

    #[test]
    fn tags_round_trip() {
        for p in [
            Platform::NativeLinux,
            Platform::LinuxUnderWindows,
            Platform::NativeWindows,
        ] {
            assert_eq!(Platform::from_tag(p.tag()), Some(p));
        }
        assert_eq!(Platform::from_tag("macos"), None);
    }

    #[test]
    fn detection_is_stable() {
        assert_eq!(detect(), detect());
    }

    #[test]
    fn windows_has_no_sudo() {
        assert!(!Platform::NativeWindows.capabilities().sudo_elevation);
        assert!(Platform::LinuxUnderWindows.capabilities().powershell);
    }
}
