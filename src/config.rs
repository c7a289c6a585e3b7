//! Repair run configuration
//!
//! Everything that used to be ambient state (target device, vendored tool
//! directories, verification toggles) lives in an explicit [`RepairConfig`]
//! passed into the executor at construction. Values come from built-in
//! defaults, then an optional JSON config file, then environment variable
//! overrides — later sources win.

use crate::error::{RepairError, Result};
use crate::layout::{DeviceNaming, PartitionSeparator};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

/// Environment variable prefix for all overrides.
const ENV_PREFIX: &str = "REPAIRCTL_";

/// Action taken after a successful destructive run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum FinalAction {
    PowerOff,
    Reboot,
}

/// Action taken after a fatal failure.
///
/// The old behavior was to sleep forever so a technician could inspect the
/// frozen machine; that is now the explicit `AwaitOperator` choice instead
/// of a hardcoded hang.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum FailureAction {
    /// Leave the machine up with the diagnostic on screen.
    AwaitOperator,
    PowerOff,
    Reboot,
}

/// Complete configuration for one repair run.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Target block device (the internal drive).
    pub device: PathBuf,
    /// Partition-index separator override; `None` means detect from the
    /// device name.
    pub separator: Option<PartitionSeparator>,
    /// Whether partial repairs must verify live partitions first.
    /// Full reimages ignore this (the table is rewritten anyway).
    pub verify_partitions: bool,
    /// Block device backing the golden OS image (the booted rescue root).
    pub source_device: PathBuf,
    /// Mountpoint of the golden image filesystem, frozen during imaging.
    pub source_mount: PathBuf,
    /// Firmware staging tool.
    pub firmware_tool: PathBuf,
    /// Vendor-supplied firmware payload directory. When present it overrides
    /// the system-installed tool and redirects it to the vendored payload.
    pub firmware_payload_dir: Option<PathBuf>,
    /// Flash firmware even when the installed version is current.
    pub force_firmware: bool,
    /// Boot configuration finalizer (external collaborator).
    pub boot_finalize_tool: PathBuf,
    /// Bootloader installer (external collaborator).
    pub bootloader_tool: PathBuf,
    /// Staging mountpoint for the ESP.
    pub esp_mount: PathBuf,
    /// Staging mountpoint for a partition set's root during boot work.
    pub staging_root: PathBuf,
    /// Skip confirmation prompts.
    pub assume_yes: bool,
    pub final_action: FinalAction,
    pub failure_action: FailureAction,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/nvme0n1"),
            separator: None,
            verify_partitions: true,
            source_device: PathBuf::from("/dev/disk/by-partlabel/rescue-rootfs"),
            source_mount: PathBuf::from("/"),
            firmware_tool: PathBuf::from("biosupdate"),
            firmware_payload_dir: None,
            force_firmware: false,
            boot_finalize_tool: PathBuf::from("bootconf-sync"),
            bootloader_tool: PathBuf::from("bootloader-install"),
            esp_mount: PathBuf::from("/esp"),
            staging_root: PathBuf::from("/mnt/repair-root"),
            assume_yes: false,
            final_action: FinalAction::PowerOff,
            failure_action: FailureAction::AwaitOperator,
        }
    }
}

/// On-disk JSON form; every field optional so partial files merge cleanly.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct RepairConfigFile {
    pub device: Option<PathBuf>,
    pub partition_separator: Option<String>,
    pub verify_partitions: Option<bool>,
    pub source_device: Option<PathBuf>,
    pub source_mount: Option<PathBuf>,
    pub firmware_tool: Option<PathBuf>,
    pub firmware_payload_dir: Option<PathBuf>,
    pub force_firmware: Option<bool>,
    pub boot_finalize_tool: Option<PathBuf>,
    pub bootloader_tool: Option<PathBuf>,
    pub assume_yes: Option<bool>,
    pub final_action: Option<FinalAction>,
    pub failure_action: Option<FailureAction>,
}

fn parse_separator(value: &str) -> Result<PartitionSeparator> {
    match value {
        "p" => Ok(PartitionSeparator::Letter),
        "none" | "" => Ok(PartitionSeparator::None),
        other => Err(RepairError::config(format!(
            "invalid partition separator {other:?} (expected \"p\" or \"none\")"
        ))),
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn env_flag(name: &str) -> Option<bool> {
    env_var(name).map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

impl RepairConfig {
    /// Load configuration: defaults, then the JSON file (if given), then
    /// environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = config_file {
            config.apply_file(&RepairConfigFile::load(path)?)?;
        }
        config.apply_env()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: &RepairConfigFile) -> Result<()> {
        if let Some(v) = &file.device {
            self.device = v.clone();
        }
        if let Some(v) = &file.partition_separator {
            self.separator = Some(parse_separator(v)?);
        }
        if let Some(v) = file.verify_partitions {
            self.verify_partitions = v;
        }
        if let Some(v) = &file.source_device {
            self.source_device = v.clone();
        }
        if let Some(v) = &file.source_mount {
            self.source_mount = v.clone();
        }
        if let Some(v) = &file.firmware_tool {
            self.firmware_tool = v.clone();
        }
        if let Some(v) = &file.firmware_payload_dir {
            self.firmware_payload_dir = Some(v.clone());
        }
        if let Some(v) = file.force_firmware {
            self.force_firmware = v;
        }
        if let Some(v) = &file.boot_finalize_tool {
            self.boot_finalize_tool = v.clone();
        }
        if let Some(v) = &file.bootloader_tool {
            self.bootloader_tool = v.clone();
        }
        if let Some(v) = file.assume_yes {
            self.assume_yes = v;
        }
        if let Some(v) = file.final_action {
            self.final_action = v;
        }
        if let Some(v) = file.failure_action {
            self.failure_action = v;
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_var("DEVICE") {
            self.device = PathBuf::from(v);
        }
        if let Some(v) = env_var("PART_SEPARATOR") {
            self.separator = Some(parse_separator(&v)?);
        }
        if let Some(v) = env_flag("VERIFY") {
            self.verify_partitions = v;
        }
        if let Some(v) = env_var("SOURCE_DEVICE") {
            self.source_device = PathBuf::from(v);
        }
        if let Some(v) = env_var("SOURCE_MOUNT") {
            self.source_mount = PathBuf::from(v);
        }
        if let Some(v) = env_var("FIRMWARE_TOOL") {
            self.firmware_tool = PathBuf::from(v);
        }
        if let Some(v) = env_var("FIRMWARE_PAYLOAD") {
            self.firmware_payload_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env_flag("FORCE_FIRMWARE") {
            self.force_firmware = v;
        }
        if let Some(v) = env_flag("NO_PROMPT") {
            self.assume_yes = v;
        }
        if let Some(v) = env_var("FINAL_ACTION") {
            self.final_action = v
                .parse()
                .map_err(|_| RepairError::config(format!("invalid final action {v:?}")))?;
        }
        if let Some(v) = env_var("FAILURE_ACTION") {
            self.failure_action = v
                .parse()
                .map_err(|_| RepairError::config(format!("invalid failure action {v:?}")))?;
        }
        Ok(())
    }

    /// Resolved device naming for the target drive.
    pub fn naming(&self) -> DeviceNaming {
        match self.separator {
            Some(sep) => DeviceNaming::new(self.device.clone(), sep),
            None => DeviceNaming::detect(self.device.clone()),
        }
    }
}

impl RepairConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
