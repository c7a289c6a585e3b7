//! Imaging Engine
//!
//! Duplicates the golden OS image into a target root partition and repairs
//! the copy's identity. The copy is byte-exact, uses a large transfer block
//! to saturate sequential throughput, and flushes synchronously so
//! completion implies durability.
//!
//! The source filesystem must already be quiescent (frozen) — that is the
//! executor's responsibility, paired with the Resource Guard so the thaw
//! runs on every exit path.

use crate::error::{RepairError, Result};
use crate::layout::{DeviceNaming, LayoutSpec, PartitionRole};
use crate::system::{COPY_BLOCK_SIZE_MIB, SystemOps};
use crate::verify::FsKind;
use log::info;
use std::path::Path;

/// Duplicate the source device into the target partition.
///
/// After the raw copy the target's filesystem UUID is regenerated — two
/// filesystems sharing one identity corrupts mount-by-UUID resolution and
/// copy-on-write metadata — and the result gets a read-only consistency
/// check. A failed check is fatal for that partition and is not retried: a
/// corrupt image means the run must stop.
pub fn duplicate(ops: &mut dyn SystemOps, source: &Path, target: &Path) -> Result<()> {
    info!(
        "Imaging {} onto {}",
        source.display(),
        target.display()
    );
    ops.block_copy(source, target, COPY_BLOCK_SIZE_MIB)?;
    ops.regenerate_fs_uuid(target)?;
    ops.check_fs(target)?;
    info!("Image verified on {}", target.display());
    Ok(())
}

/// Format one non-root slot with its expected filesystem and label.
///
/// Root slots are imaged, never formatted; asking for one is a programming
/// error surfaced as configuration.
pub fn format_slot(
    ops: &mut dyn SystemOps,
    layout: &LayoutSpec,
    naming: &DeviceNaming,
    role: PartitionRole,
) -> Result<()> {
    let slot = layout.slot(role);
    let device = naming.partition(role);
    match FsKind::for_role(role) {
        FsKind::Vfat => ops.format_vfat(&device, &slot.name),
        FsKind::Ext4 => ops.format_ext4(&device, &slot.name),
        FsKind::Btrfs => Err(RepairError::config(format!(
            "root slot {} is imaged, not formatted",
            slot.name
        ))),
    }
}
