//! Pre-flight sanity checks
//!
//! Verifies the rescue environment before any destructive step runs:
//! - required external binaries are present in PATH
//! - running with root privileges (EUID 0)
//!
//! Failures surface as typed errors so the process exits with the missing
//! tool code rather than dying halfway through a repair.

use crate::error::{RepairError, Result};
use crate::process_guard::CommandProcessGroup;
use std::process::Command;

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }
}

/// Binaries every repair scope needs before it starts.
const REQUIRED_BINARIES: &[&str] = &[
    "sfdisk",    // GPT partition table writes (util-linux)
    "blkid",     // filesystem and label probes (util-linux)
    "blockdev",  // device capacity query (util-linux)
    "dd",        // block imaging (coreutils)
    "mkfs.vfat", // ESP/EFI formatting (dosfstools)
    "mkfs.ext4", // var/home formatting (e2fsprogs)
    "fsfreeze",  // source quiesce during imaging (util-linux)
    "btrfs",     // image consistency check (btrfs-progs)
    "btrfstune", // image UUID regeneration (btrfs-progs)
    "udevadm",   // device-node settling (systemd)
    "mount",     // staging mounts (util-linux)
    "umount",    // staging unmounts (util-linux)
];

/// Binaries only some targets need; missing ones are reported when the
/// target actually invokes them.
const OPTIONAL_BINARIES: &[&str] = &[
    "nvme", // sanitize target only (nvme-cli)
];

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .in_new_process_group()
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Check if running as root (EUID 0)
fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Skip the root check (for development on a workstation).
/// Set REPAIRCTL_SKIP_ROOT_CHECK=1 to skip.
fn should_skip_root_check() -> bool {
    std::env::var("REPAIRCTL_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Perform all checks and return the raw result
pub fn verify_environment() -> SanityCheckResult {
    let mut missing = Vec::new();

    for binary in REQUIRED_BINARIES {
        if !binary_exists(binary) {
            missing.push((*binary).to_string());
        }
    }

    for binary in OPTIONAL_BINARIES {
        if !binary_exists(binary) {
            log::debug!("Optional binary not found: {binary}");
        }
    }

    SanityCheckResult {
        missing_binaries: missing,
        is_root: is_running_as_root(),
    }
}

/// Verify the environment, converting failures into typed errors.
pub fn run_preflight_checks() -> Result<()> {
    log::debug!("Running pre-flight sanity checks...");

    let mut result = verify_environment();

    if should_skip_root_check() {
        log::warn!("Root check skipped (REPAIRCTL_SKIP_ROOT_CHECK=1)");
        result.is_root = true;
    }

    if !result.is_root {
        return Err(RepairError::config(
            "root privileges required: repairs rewrite partition tables and raw devices",
        ));
    }
    if !result.missing_binaries.is_empty() {
        return Err(RepairError::ToolUnavailable(
            result.missing_binaries.join(", "),
        ));
    }

    log::info!("Pre-flight checks passed");
    Ok(())
}
