//! Test support
//!
//! [`RecordingSystem`] is a `SystemOps` fake that records every call as a
//! flat string, answers probes from preprogrammed state, and injects
//! failures by call prefix. Nothing here touches a real device; tests
//! assert on the recorded call sequence instead.

use crate::error::{RepairError, Result};
use crate::system::{SanitizeStatus, SystemOps};
use std::collections::{HashMap, VecDeque};
use std::path::Path;

/// In-memory `SystemOps` with call recording and failure injection.
#[derive(Default)]
pub struct RecordingSystem {
    calls: Vec<String>,
    fail_prefixes: Vec<String>,
    fs_types: HashMap<String, String>,
    partition_labels: HashMap<String, String>,
    sanitize_statuses: VecDeque<Option<SanitizeStatus>>,
    capacity_mib: Option<u64>,
}

impl RecordingSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.clone()
    }

    /// Number of recorded calls starting with the given prefix.
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Number of recorded calls exactly equal to the given string.
    ///
    /// Prefer this over `count_calls` when asserting a complete call:
    /// mountpoints nest (`/mnt/repair-root` is a prefix of
    /// `/mnt/repair-root/var`), so a prefix count can overmatch.
    pub fn count_exact(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    /// Make every call whose string starts with `prefix` fail with an `Io`
    /// error. The call is still recorded.
    pub fn fail_on(&mut self, prefix: &str) {
        self.fail_prefixes.push(prefix.to_string());
    }

    /// Program the filesystem-type signature a device probe reports.
    pub fn set_fs_type(&mut self, device: &str, fs_type: &str) {
        self.fs_types.insert(device.to_string(), fs_type.to_string());
    }

    /// Program the GPT partition label a device probe reports.
    pub fn set_partition_label(&mut self, device: &str, label: &str) {
        self.partition_labels
            .insert(device.to_string(), label.to_string());
    }

    /// Queue one sanitize status log answer; answers are consumed in order.
    /// An exhausted queue reads as an unsupported controller.
    pub fn push_sanitize_status(&mut self, status: Option<SanitizeStatus>) {
        self.sanitize_statuses.push_back(status);
    }

    /// Override the reported device capacity (defaults to 512 GiB).
    pub fn set_capacity_mib(&mut self, capacity: u64) {
        self.capacity_mib = Some(capacity);
    }

    fn record(&mut self, call: String) -> Result<()> {
        let failing = self.fail_prefixes.iter().any(|p| call.starts_with(p));
        self.calls.push(call.clone());
        if failing {
            Err(RepairError::io(format!("injected failure: {call}")))
        } else {
            Ok(())
        }
    }
}

impl SystemOps for RecordingSystem {
    fn write_partition_table(&mut self, device: &Path, _script: &str) -> Result<()> {
        self.record(format!("write_partition_table {}", device.display()))
    }

    fn settle(&mut self) -> Result<()> {
        self.record("settle".to_string())
    }

    fn probe_fs_type(&mut self, device: &Path) -> Result<Option<String>> {
        let dev = device.display().to_string();
        self.record(format!("probe_fs_type {dev}"))?;
        Ok(self.fs_types.get(&dev).cloned())
    }

    fn probe_partition_label(&mut self, device: &Path) -> Result<Option<String>> {
        let dev = device.display().to_string();
        self.record(format!("probe_partition_label {dev}"))?;
        Ok(self.partition_labels.get(&dev).cloned())
    }

    fn device_capacity_mib(&mut self, device: &Path) -> Result<u64> {
        self.record(format!("device_capacity_mib {}", device.display()))?;
        Ok(self.capacity_mib.unwrap_or(512 * 1024))
    }

    fn format_vfat(&mut self, device: &Path, label: &str) -> Result<()> {
        self.record(format!("format_vfat {} {label}", device.display()))
    }

    fn format_ext4(&mut self, device: &Path, label: &str) -> Result<()> {
        self.record(format!("format_ext4 {} {label}", device.display()))
    }

    fn block_copy(&mut self, source: &Path, target: &Path, block_size_mib: u64) -> Result<()> {
        self.record(format!(
            "block_copy {} {} {block_size_mib}",
            source.display(),
            target.display()
        ))
    }

    fn freeze_fs(&mut self, mountpoint: &Path) -> Result<()> {
        self.record(format!("freeze_fs {}", mountpoint.display()))
    }

    fn thaw_fs(&mut self, mountpoint: &Path) -> Result<()> {
        self.record(format!("thaw_fs {}", mountpoint.display()))
    }

    fn regenerate_fs_uuid(&mut self, device: &Path) -> Result<()> {
        self.record(format!("regenerate_fs_uuid {}", device.display()))
    }

    fn check_fs(&mut self, device: &Path) -> Result<()> {
        self.record(format!("check_fs {}", device.display()))
    }

    fn mount(&mut self, device: &Path, mountpoint: &Path) -> Result<()> {
        self.record(format!(
            "mount {} {}",
            device.display(),
            mountpoint.display()
        ))
    }

    fn bind_mount(&mut self, source: &Path, mountpoint: &Path) -> Result<()> {
        self.record(format!(
            "bind_mount {} {}",
            source.display(),
            mountpoint.display()
        ))
    }

    fn unmount(&mut self, mountpoint: &Path) -> Result<()> {
        self.record(format!("unmount {}", mountpoint.display()))
    }

    fn sanitize_status(&mut self, device: &Path) -> Result<Option<SanitizeStatus>> {
        self.record(format!("sanitize_status {}", device.display()))?;
        Ok(self.sanitize_statuses.pop_front().unwrap_or(None))
    }

    fn sanitize_block_erase(&mut self, device: &Path) -> Result<()> {
        self.record(format!("sanitize_block_erase {}", device.display()))
    }

    fn secure_format(&mut self, device: &Path) -> Result<()> {
        self.record(format!("secure_format {}", device.display()))
    }

    fn stage_firmware(
        &mut self,
        tool: &Path,
        payload_dir: Option<&Path>,
        force: bool,
    ) -> Result<()> {
        let mut call = format!("stage_firmware {}", tool.display());
        if let Some(dir) = payload_dir {
            call.push_str(&format!(" {}", dir.display()));
        }
        if force {
            call.push_str(" --force");
        }
        self.record(call)
    }

    fn finalize_boot(&mut self, tool: &Path, root: &Path, esp: &Path) -> Result<()> {
        self.record(format!(
            "finalize_boot {} {} {}",
            tool.display(),
            root.display(),
            esp.display()
        ))
    }

    fn install_bootloader(&mut self, tool: &Path, root: &Path, esp: &Path) -> Result<()> {
        self.record(format!(
            "install_bootloader {} {} {}",
            tool.display(),
            root.display(),
            esp.display()
        ))
    }

    fn enter_chroot(&mut self, root: &Path) -> Result<()> {
        self.record(format!("enter_chroot {}", root.display()))
    }

    fn power_off(&mut self) -> Result<()> {
        self.record("power_off".to_string())
    }

    fn reboot(&mut self) -> Result<()> {
        self.record("reboot".to_string())
    }
}
