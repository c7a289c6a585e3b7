//! Layout Model
//!
//! Describes the expected on-disk partition table of the device: a fixed set
//! of eight GPT slots referenced by symbolic role everywhere else in the
//! system. The model is immutable once constructed and can render itself into
//! the line-oriented script format consumed by `sfdisk`.
//!
//! # Design
//!
//! - **Pure logic**: rendering has no side effects and no failure modes;
//!   invalid configuration is rejected at construction, not at call time
//! - **Role-addressed**: callers name slots by `PartitionRole`, never by raw
//!   index, so a layout revision cannot silently retarget a format or copy

use crate::error::{RepairError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, IntoEnumIterator};

/// GPT partition type GUIDs for the eight slots.
///
/// These are fixed constants of the layout, not configuration.
pub const GUID_ESP: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
pub const GUID_EFI_BOOT: &str = "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7";
pub const GUID_LINUX_ROOT: &str = "4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709";
pub const GUID_LINUX_VAR: &str = "4D21B016-B534-45C2-A9FB-5C16E091FD2D";
pub const GUID_LINUX_HOME: &str = "933AC7E1-2EB4-4F13-B844-0E14E2AEF915";

/// Symbolic role of a partition slot.
///
/// The on-disk index of each role is fixed; `index()` is the only place the
/// numbering lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum PartitionRole {
    Esp,
    EfiA,
    EfiB,
    RootA,
    RootB,
    VarA,
    VarB,
    Home,
}

impl PartitionRole {
    /// 1-based on-disk partition index for this role.
    pub fn index(self) -> u32 {
        match self {
            PartitionRole::Esp => 1,
            PartitionRole::EfiA => 2,
            PartitionRole::EfiB => 3,
            PartitionRole::RootA => 4,
            PartitionRole::RootB => 5,
            PartitionRole::VarA => 6,
            PartitionRole::VarB => 7,
            PartitionRole::Home => 8,
        }
    }

    /// All roles in fixed slot order.
    pub fn all() -> Vec<PartitionRole> {
        PartitionRole::iter().collect()
    }
}

/// One of the two redundant boot+root+var partition groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Partset {
    A,
    B,
}

impl Partset {
    pub fn efi(self) -> PartitionRole {
        match self {
            Partset::A => PartitionRole::EfiA,
            Partset::B => PartitionRole::EfiB,
        }
    }

    pub fn root(self) -> PartitionRole {
        match self {
            Partset::A => PartitionRole::RootA,
            Partset::B => PartitionRole::RootB,
        }
    }

    pub fn var(self) -> PartitionRole {
        match self {
            Partset::A => PartitionRole::VarA,
            Partset::B => PartitionRole::VarB,
        }
    }
}

/// Partition-index separator convention of the target device.
///
/// NVMe and MMC block devices insert a `p` between the device path and the
/// partition index (`/dev/nvme0n1p4`); whole-letter SCSI-style devices do not
/// (`/dev/sda4`). The layout is parameterized by this convention rather than
/// hardcoding either scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionSeparator {
    /// Index appended directly (`/dev/sda` -> `/dev/sda1`)
    None,
    /// `p` inserted before the index (`/dev/nvme0n1` -> `/dev/nvme0n1p1`)
    Letter,
}

impl PartitionSeparator {
    pub fn as_str(self) -> &'static str {
        match self {
            PartitionSeparator::None => "",
            PartitionSeparator::Letter => "p",
        }
    }

    /// Guess the convention from the device name.
    ///
    /// nvme, mmcblk and loop devices use the `p` scheme; everything else is
    /// assumed direct. Config can override the guess.
    pub fn detect(device: &Path) -> Self {
        let name = device
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if name.starts_with("nvme") || name.starts_with("mmcblk") || name.starts_with("loop") {
            PartitionSeparator::Letter
        } else {
            PartitionSeparator::None
        }
    }
}

/// Target device path plus its partition naming convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNaming {
    pub device: PathBuf,
    pub separator: PartitionSeparator,
}

impl DeviceNaming {
    pub fn new(device: impl Into<PathBuf>, separator: PartitionSeparator) -> Self {
        Self {
            device: device.into(),
            separator,
        }
    }

    /// Build with the separator guessed from the device name.
    pub fn detect(device: impl Into<PathBuf>) -> Self {
        let device = device.into();
        let separator = PartitionSeparator::detect(&device);
        Self { device, separator }
    }

    /// Device path of the partition holding the given role.
    pub fn partition(&self, role: PartitionRole) -> PathBuf {
        PathBuf::from(format!(
            "{}{}{}",
            self.device.display(),
            self.separator.as_str(),
            role.index()
        ))
    }
}

/// Immutable description of a single partition slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub role: PartitionRole,
    /// GPT partition label, also the name used in verification.
    pub name: String,
    /// Size in MiB; `None` means "remainder of the device" and is only legal
    /// for the final slot.
    pub size_mib: Option<u64>,
    pub type_guid: &'static str,
}

impl PartitionSpec {
    fn new(
        role: PartitionRole,
        name: &str,
        size_mib: Option<u64>,
        type_guid: &'static str,
    ) -> Self {
        Self {
            role,
            name: name.to_string(),
            size_mib,
            type_guid,
        }
    }
}

/// Ordered sequence of the eight partition slots covering the whole device.
///
/// Validated at construction; a `LayoutSpec` that exists is well-formed.
#[derive(Debug, Clone)]
pub struct LayoutSpec {
    slots: Vec<PartitionSpec>,
}

/// Alignment padding budget in MiB reserved for GPT headers and partition
/// alignment when checking the layout against device capacity.
const ALIGNMENT_PADDING_MIB: u64 = 16;

impl LayoutSpec {
    /// The stock eight-slot layout for the handheld's internal drive.
    ///
    /// ESP, redundant A/B efi+root+var sets, and home taking the remainder.
    pub fn standard() -> Self {
        // Construction of the standard layout cannot fail; the expect
        // documents that a broken constant table is a programming error.
        Self::from_slots(vec![
            PartitionSpec::new(PartitionRole::Esp, "esp", Some(256), GUID_ESP),
            PartitionSpec::new(PartitionRole::EfiA, "efi-A", Some(64), GUID_EFI_BOOT),
            PartitionSpec::new(PartitionRole::EfiB, "efi-B", Some(64), GUID_EFI_BOOT),
            PartitionSpec::new(PartitionRole::RootA, "rootfs-A", Some(5120), GUID_LINUX_ROOT),
            PartitionSpec::new(PartitionRole::RootB, "rootfs-B", Some(5120), GUID_LINUX_ROOT),
            PartitionSpec::new(PartitionRole::VarA, "var-A", Some(256), GUID_LINUX_VAR),
            PartitionSpec::new(PartitionRole::VarB, "var-B", Some(256), GUID_LINUX_VAR),
            PartitionSpec::new(PartitionRole::Home, "home", None, GUID_LINUX_HOME),
        ])
        .expect("standard layout must be valid")
    }

    /// Build a layout from explicit slots, validating shape eagerly.
    pub fn from_slots(slots: Vec<PartitionSpec>) -> Result<Self> {
        let expected_roles = PartitionRole::all();
        if slots.len() != expected_roles.len() {
            return Err(RepairError::config(format!(
                "layout must define exactly {} slots, got {}",
                expected_roles.len(),
                slots.len()
            )));
        }
        for (slot, role) in slots.iter().zip(expected_roles.iter()) {
            if slot.role != *role {
                return Err(RepairError::config(format!(
                    "slot {} must hold role {}, got {}",
                    role.index(),
                    role,
                    slot.role
                )));
            }
        }
        let mut names: Vec<&str> = slots.iter().map(|s| s.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != slots.len() {
            return Err(RepairError::config("duplicate partition names in layout"));
        }
        let last = slots.len() - 1;
        for (i, slot) in slots.iter().enumerate() {
            if slot.size_mib.is_none() && i != last {
                return Err(RepairError::config(format!(
                    "only the final slot may omit a size, but {} does",
                    slot.name
                )));
            }
        }
        Ok(Self { slots })
    }

    pub fn slots(&self) -> &[PartitionSpec] {
        &self.slots
    }

    pub fn slot(&self, role: PartitionRole) -> &PartitionSpec {
        // Roles and slot order are validated 1:1 at construction.
        &self.slots[(role.index() - 1) as usize]
    }

    /// Sum of all fixed slot sizes in MiB (the open-ended slot contributes 0).
    pub fn fixed_size_mib(&self) -> u64 {
        self.slots.iter().filter_map(|s| s.size_mib).sum()
    }

    /// Check the layout against the physical device capacity.
    ///
    /// The fixed sizes plus alignment padding must fit, and the remainder
    /// slot must be left with at least 1 MiB.
    pub fn fits_device(&self, capacity_mib: u64) -> Result<()> {
        let need = self.fixed_size_mib() + ALIGNMENT_PADDING_MIB + 1;
        if capacity_mib < need {
            return Err(RepairError::config(format!(
                "device capacity {capacity_mib} MiB is below the {need} MiB the layout requires"
            )));
        }
        Ok(())
    }

    /// Render the sfdisk-style partition-table script for the target device.
    ///
    /// One line per slot, in fixed slot order, with the device-path
    /// placeholder resolved against the naming convention on every line.
    pub fn render(&self, naming: &DeviceNaming) -> String {
        let mut out = String::from("label: gpt\n");
        for slot in &self.slots {
            let dev = naming.partition(slot.role);
            match slot.size_mib {
                Some(size) => {
                    out.push_str(&format!(
                        "{} : name=\"{}\", size={}MiB, type={}\n",
                        dev.display(),
                        slot.name,
                        size,
                        slot.type_guid
                    ));
                }
                None => {
                    out.push_str(&format!(
                        "{} : name=\"{}\", type={}\n",
                        dev.display(),
                        slot.name,
                        slot.type_guid
                    ));
                }
            }
        }
        out
    }
}

impl fmt::Display for LayoutSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for slot in &self.slots {
            match slot.size_mib {
                Some(size) => writeln!(f, "{} {} {}MiB", slot.role.index(), slot.name, size)?,
                None => writeln!(f, "{} {} remainder", slot.role.index(), slot.name)?,
            }
        }
        Ok(())
    }
}
