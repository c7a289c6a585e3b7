//! Partition Verifier
//!
//! Gate for partial repairs: before a home-only or system-only run touches
//! anything, every slot the scope relies on must carry the expected
//! filesystem-type signature and GPT partition label. A mismatch means the
//! drive does not hold the layout this tool maintains, and proceeding would
//! corrupt a differently-owned partition — so the whole run aborts.
//!
//! Verification is skippable by configuration only for the full-reimage
//! path, where the table is rewritten first and the old partitions are by
//! definition stale.

use crate::error::{MismatchKind, RepairError, Result};
use crate::layout::{DeviceNaming, LayoutSpec, PartitionRole};
use crate::system::SystemOps;
use log::{debug, info};

/// Expected filesystem kind for a slot.
///
/// Matched against the `TYPE` signature blkid reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    Vfat,
    Ext4,
    Btrfs,
}

impl FsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FsKind::Vfat => "vfat",
            FsKind::Ext4 => "ext4",
            FsKind::Btrfs => "btrfs",
        }
    }

    /// Filesystem each role is expected to carry.
    pub fn for_role(role: PartitionRole) -> Self {
        match role {
            PartitionRole::Esp | PartitionRole::EfiA | PartitionRole::EfiB => FsKind::Vfat,
            PartitionRole::RootA | PartitionRole::RootB => FsKind::Btrfs,
            PartitionRole::VarA | PartitionRole::VarB | PartitionRole::Home => FsKind::Ext4,
        }
    }
}

/// What one slot must look like before a partial repair may reuse it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationExpectation {
    pub role: PartitionRole,
    pub fs_kind: FsKind,
    pub label: String,
}

impl VerificationExpectation {
    /// Compile the expectation for one slot from the layout.
    pub fn for_slot(layout: &LayoutSpec, role: PartitionRole) -> Self {
        Self {
            role,
            fs_kind: FsKind::for_role(role),
            label: layout.slot(role).name.clone(),
        }
    }

    /// Compile expectations for a set of slots in layout order.
    pub fn for_slots(layout: &LayoutSpec, roles: &[PartitionRole]) -> Vec<Self> {
        roles
            .iter()
            .map(|&role| Self::for_slot(layout, role))
            .collect()
    }
}

/// Check one live partition against its expectation.
///
/// Fails fast on the first mismatched attribute, reporting the offending
/// device and whether the filesystem type or the label disagreed.
pub fn verify(
    ops: &mut dyn SystemOps,
    naming: &DeviceNaming,
    expectation: &VerificationExpectation,
) -> Result<()> {
    let device = naming.partition(expectation.role);
    debug!(
        "Verifying {} (expect {} / {})",
        device.display(),
        expectation.fs_kind.as_str(),
        expectation.label
    );

    let found_type = ops.probe_fs_type(&device)?.unwrap_or_default();
    if found_type != expectation.fs_kind.as_str() {
        return Err(RepairError::VerificationMismatch {
            device,
            kind: MismatchKind::FsType {
                expected: expectation.fs_kind.as_str().to_string(),
                found: found_type,
            },
        });
    }

    let found_label = ops.probe_partition_label(&device)?.unwrap_or_default();
    if found_label != expectation.label {
        return Err(RepairError::VerificationMismatch {
            device,
            kind: MismatchKind::Label {
                expected: expectation.label.clone(),
                found: found_label,
            },
        });
    }

    Ok(())
}

/// Verify every expectation, aborting on the first mismatch.
pub fn verify_all(
    ops: &mut dyn SystemOps,
    naming: &DeviceNaming,
    expectations: &[VerificationExpectation],
) -> Result<()> {
    info!("Verifying {} live partition(s)...", expectations.len());
    for expectation in expectations {
        verify(ops, naming, expectation)?;
    }
    info!("Partition verification passed");
    Ok(())
}
