//! Repair Plan Executor
//!
//! Top-level sequencer over a requested repair scope. Consults the layout
//! and verifier before mutating anything, delegates formatting and imaging,
//! registers every transient mount/freeze with the Resource Guard, and
//! enforces the fatal-vs-recoverable failure policy:
//!
//! | Scope        | Table write | Var fmt | Boot fmt | Home fmt | Freeze+Image | Boot finalize |
//! |--------------|-------------|---------|----------|----------|--------------|---------------|
//! | table+OS+home| yes         | yes     | yes      | yes      | yes          | yes           |
//! | OS only      | verify only | yes     | yes      | no       | yes          | yes           |
//! | home only    | verify only | yes     | no       | yes      | no           | no            |
//!
//! Execution is single-threaded and strictly sequential; each step depends
//! on the on-disk state left by the previous one. Any step failure aborts
//! the remaining sequence, runs the guard, and surfaces the typed error.
//! No step is retried: retrying destructive operations risks repeating
//! partial mutations.

use crate::config::RepairConfig;
use crate::error::{RepairError, Result};
use crate::firmware;
use crate::guard::ResourceGuard;
use crate::imaging;
use crate::layout::{DeviceNaming, LayoutSpec, PartitionRole, Partset};
use crate::system::SystemOps;
use crate::verify::{VerificationExpectation, verify_all};
use log::{info, warn};

/// The three repair intents.
///
/// Only the tuples produced by the constructors are recognized; anything
/// else is rejected before the run starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairScope {
    pub write_table: bool,
    pub rewrite_os: bool,
    pub rewrite_home: bool,
}

impl RepairScope {
    /// Full reimage: rewrite the table, both OS partition sets, and home.
    pub fn full() -> Self {
        Self {
            write_table: true,
            rewrite_os: true,
            rewrite_home: true,
        }
    }

    /// OS-only repair: reuse the table and home, rewrite both OS sets.
    pub fn system() -> Self {
        Self {
            write_table: false,
            rewrite_os: true,
            rewrite_home: false,
        }
    }

    /// Home-only repair: reuse the table and OS, rewrite home.
    pub fn home() -> Self {
        Self {
            write_table: false,
            rewrite_os: false,
            rewrite_home: true,
        }
    }

    /// A partial repair reuses the existing table and must verify it.
    pub fn is_partial(&self) -> bool {
        !self.write_table
    }

    fn validate(&self) -> Result<()> {
        if *self == Self::full() || *self == Self::system() || *self == Self::home() {
            Ok(())
        } else {
            Err(RepairError::config(format!(
                "unrecognized repair scope (table={}, os={}, home={})",
                self.write_table, self.rewrite_os, self.rewrite_home
            )))
        }
    }

    /// Slots a partial repair relies on and must verify before touching
    /// anything.
    fn verified_roles(&self) -> Vec<PartitionRole> {
        if self.rewrite_os {
            vec![
                PartitionRole::Esp,
                PartitionRole::EfiA,
                PartitionRole::EfiB,
                PartitionRole::RootA,
                PartitionRole::RootB,
                PartitionRole::VarA,
                PartitionRole::VarB,
            ]
        } else {
            vec![PartitionRole::VarA, PartitionRole::VarB, PartitionRole::Home]
        }
    }
}

/// Sequences a repair run against one exclusively-owned target device.
pub struct RepairPlanExecutor<'a> {
    config: &'a RepairConfig,
    layout: LayoutSpec,
    naming: DeviceNaming,
}

impl<'a> RepairPlanExecutor<'a> {
    pub fn new(config: &'a RepairConfig, layout: LayoutSpec) -> Self {
        let naming = config.naming();
        Self {
            config,
            layout,
            naming,
        }
    }

    /// Execute the requested scope.
    ///
    /// The guard runs on every exit path of the step sequence, so a frozen
    /// source root is always thawed and a staged ESP mount always unmounted
    /// even when a later step fails.
    pub fn run(&self, ops: &mut dyn SystemOps, scope: RepairScope) -> Result<()> {
        scope.validate()?;
        let mut guard = ResourceGuard::new();
        let result = self.run_steps(ops, &mut guard, scope);
        guard.run_all(ops);
        match &result {
            Ok(()) => info!("Repair run complete"),
            Err(e) => warn!(
                "Repair aborted: {e}. Retry with a narrower scope or run a full reimage."
            ),
        }
        result
    }

    fn run_steps(
        &self,
        ops: &mut dyn SystemOps,
        guard: &mut ResourceGuard,
        scope: RepairScope,
    ) -> Result<()> {
        // Step 1: rewrite the table, or gate on the existing one.
        if scope.write_table {
            info!("Step 1: writing partition table");
            let capacity = ops.device_capacity_mib(&self.config.device)?;
            self.layout.fits_device(capacity)?;
            let script = self.layout.render(&self.naming);
            ops.write_partition_table(&self.config.device, &script)?;
            ops.settle()?;
        } else if self.config.verify_partitions {
            info!("Step 1: verifying existing partitions");
            let expectations =
                VerificationExpectation::for_slots(&self.layout, &scope.verified_roles());
            verify_all(ops, &self.naming, &expectations)?;
        } else {
            warn!("Step 1: partition verification disabled by configuration");
        }

        // Step 2: var partitions are rebuilt for every scope.
        info!("Step 2: formatting var partitions");
        imaging::format_slot(ops, &self.layout, &self.naming, PartitionRole::VarA)?;
        imaging::format_slot(ops, &self.layout, &self.naming, PartitionRole::VarB)?;

        // Step 3: boot partitions, only when the OS is rewritten.
        if scope.rewrite_os {
            info!("Step 3: formatting boot partitions");
            imaging::format_slot(ops, &self.layout, &self.naming, PartitionRole::Esp)?;
            imaging::format_slot(ops, &self.layout, &self.naming, PartitionRole::EfiA)?;
            imaging::format_slot(ops, &self.layout, &self.naming, PartitionRole::EfiB)?;
        }

        // Step 4: home.
        if scope.rewrite_home {
            info!("Step 4: formatting home partition");
            imaging::format_slot(ops, &self.layout, &self.naming, PartitionRole::Home)?;
        }
        ops.settle()?;

        // Step 5: firmware staging (best-effort unless force mode).
        info!("Step 5: staging firmware update");
        firmware::stage(ops, self.config)?;

        if scope.rewrite_os {
            // Step 6: freeze the golden source for a consistent snapshot.
            // The thaw is registered before anything else can fail.
            info!("Step 6: freezing source root filesystem");
            let freeze_mount = self.config.source_mount.clone();
            let thaw_mount = self.config.source_mount.clone();
            guard.acquire(
                ops,
                "thaw source root",
                move |ops| ops.freeze_fs(&freeze_mount),
                move |ops| ops.thaw_fs(&thaw_mount),
            )?;

            // Step 7: duplicate into both redundant root slots, one after
            // another — a single point of failure and a single frozen-source
            // invariant.
            for partset in [Partset::A, Partset::B] {
                info!("Step 7: imaging root partition of set {partset}");
                let target = self.naming.partition(partset.root());
                imaging::duplicate(ops, &self.config.source_device, &target)?;
            }

            // Step 8: finalize boot configuration for both sets, with the
            // ESP staged through the guard.
            info!("Step 8: finalizing boot configuration");
            let esp_device = self.naming.partition(PartitionRole::Esp);
            let esp_mount = self.config.esp_mount.clone();
            let esp_unmount = self.config.esp_mount.clone();
            guard.acquire(
                ops,
                "unmount esp",
                move |ops| ops.mount(&esp_device, &esp_mount),
                move |ops| ops.unmount(&esp_unmount),
            )?;
            for partset in [Partset::A, Partset::B] {
                let root = self.naming.partition(partset.root());
                ops.finalize_boot(&self.config.boot_finalize_tool, &root, &self.config.esp_mount)?;
            }

            // Step 9: bootloader onto the primary set.
            info!("Step 9: installing bootloader on primary set");
            let primary_root = self.naming.partition(Partset::A.root());
            ops.install_bootloader(
                &self.config.bootloader_tool,
                &primary_root,
                &self.config.esp_mount,
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSystem;

    fn config() -> RepairConfig {
        RepairConfig::default()
    }

    #[test]
    fn test_scope_constructors_are_recognized() {
        assert!(RepairScope::full().validate().is_ok());
        assert!(RepairScope::system().validate().is_ok());
        assert!(RepairScope::home().validate().is_ok());
    }

    #[test]
    fn test_arbitrary_scope_tuple_is_rejected() {
        let scope = RepairScope {
            write_table: true,
            rewrite_os: false,
            rewrite_home: true,
        };
        assert!(scope.validate().is_err());

        let cfg = config();
        let executor = RepairPlanExecutor::new(&cfg, LayoutSpec::standard());
        let mut sys = RecordingSystem::new();
        let err = executor.run(&mut sys, scope).unwrap_err();
        assert!(matches!(err, RepairError::Config(_)));
        assert!(sys.calls().is_empty());
    }

    #[test]
    fn test_partial_scopes_verify_their_slots() {
        assert_eq!(RepairScope::system().verified_roles().len(), 7);
        assert!(
            !RepairScope::system()
                .verified_roles()
                .contains(&PartitionRole::Home)
        );
        assert_eq!(
            RepairScope::home().verified_roles(),
            vec![PartitionRole::VarA, PartitionRole::VarB, PartitionRole::Home]
        );
    }

    #[test]
    fn test_full_run_step_ordering() {
        let cfg = config();
        let executor = RepairPlanExecutor::new(&cfg, LayoutSpec::standard());
        let mut sys = RecordingSystem::new();
        executor.run(&mut sys, RepairScope::full()).unwrap();

        let calls = sys.calls();
        let pos = |needle: &str| {
            calls
                .iter()
                .position(|c| c.starts_with(needle))
                .unwrap_or_else(|| panic!("missing call: {needle}"))
        };

        // Table before formats, formats before freeze, freeze before copy,
        // copies before finalize, finalize before bootloader, thaw last.
        assert!(pos("write_partition_table") < pos("format_ext4 /dev/nvme0n1p6"));
        assert!(pos("format_vfat /dev/nvme0n1p1") < pos("freeze_fs /"));
        assert!(pos("freeze_fs /") < pos("block_copy"));
        assert!(pos("block_copy") < pos("finalize_boot"));
        assert!(pos("finalize_boot") < pos("install_bootloader"));
        assert!(pos("install_bootloader") < pos("thaw_fs /"));

        // Both roots imaged, sequentially
        assert_eq!(sys.count_calls("block_copy"), 2);
        let first_copy = pos("block_copy /dev/disk/by-partlabel/rescue-rootfs /dev/nvme0n1p4");
        let second_copy = pos("block_copy /dev/disk/by-partlabel/rescue-rootfs /dev/nvme0n1p5");
        assert!(first_copy < second_copy);

        // Full reimage never probes the stale partitions
        assert_eq!(sys.count_calls("probe_fs_type"), 0);

        // Guard drained: freeze thawed, esp unmounted
        assert_eq!(sys.count_exact("thaw_fs /"), 1);
        assert_eq!(sys.count_exact("unmount /esp"), 1);
    }

    #[test]
    fn test_capacity_check_runs_before_table_write() {
        let cfg = config();
        let executor = RepairPlanExecutor::new(&cfg, LayoutSpec::standard());
        let mut sys = RecordingSystem::new();
        sys.set_capacity_mib(1024); // far too small for the layout
        let err = executor.run(&mut sys, RepairScope::full()).unwrap_err();
        assert!(matches!(err, RepairError::Config(_)));
        assert_eq!(sys.count_calls("write_partition_table"), 0);
    }

    #[test]
    fn test_verification_can_be_disabled_for_partial_runs() {
        let mut cfg = config();
        cfg.verify_partitions = false;
        let executor = RepairPlanExecutor::new(&cfg, LayoutSpec::standard());
        let mut sys = RecordingSystem::new();
        executor.run(&mut sys, RepairScope::home()).unwrap();
        assert_eq!(sys.count_calls("probe_fs_type"), 0);
        assert_eq!(sys.count_calls("format_ext4 /dev/nvme0n1p8"), 1);
    }
}
