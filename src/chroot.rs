//! Interactive chroot entry
//!
//! Convenience target for technicians: mounts the primary (A) partition set
//! plus the kernel pseudo-filesystems, drops into a shell inside it, and
//! unwinds every mount through the Resource Guard when the shell exits —
//! including when a mount step fails halfway.
//!
//! No partition state is mutated.

use crate::config::RepairConfig;
use crate::error::Result;
use crate::guard::ResourceGuard;
use crate::layout::{PartitionRole, Partset};
use crate::system::SystemOps;
use log::info;
use std::path::PathBuf;

/// Mount partset A, enter a shell, and unwind.
pub fn enter(ops: &mut dyn SystemOps, config: &RepairConfig) -> Result<()> {
    let naming = config.naming();
    let root = config.staging_root.clone();
    info!(
        "Entering chroot of partition set A at {}",
        root.display()
    );

    let mut guard = ResourceGuard::new();
    let result = mount_and_enter(ops, &mut guard, &root, naming);
    guard.run_all(ops);
    result
}

fn mount_and_enter(
    ops: &mut dyn SystemOps,
    guard: &mut ResourceGuard,
    root: &PathBuf,
    naming: crate::layout::DeviceNaming,
) -> Result<()> {
    let root_dev = naming.partition(Partset::A.root());
    let var_dev = naming.partition(Partset::A.var());
    let esp_dev = naming.partition(PartitionRole::Esp);

    mount_guarded(ops, guard, "root", &root_dev, root.clone())?;
    mount_guarded(ops, guard, "var", &var_dev, root.join("var"))?;
    mount_guarded(ops, guard, "esp", &esp_dev, root.join("esp"))?;

    for pseudo in ["dev", "proc", "sys"] {
        let source = PathBuf::from("/").join(pseudo);
        let target = root.join(pseudo);
        let release_target = target.clone();
        guard.acquire(
            ops,
            format!("unmount {pseudo}"),
            |ops| ops.bind_mount(&source, &target),
            move |ops| ops.unmount(&release_target),
        )?;
    }

    ops.enter_chroot(root)
}

fn mount_guarded(
    ops: &mut dyn SystemOps,
    guard: &mut ResourceGuard,
    what: &str,
    device: &PathBuf,
    target: PathBuf,
) -> Result<()> {
    let mount_dev = device.clone();
    let mount_target = target.clone();
    guard.acquire(
        ops,
        format!("unmount {what}"),
        move |ops| ops.mount(&mount_dev, &mount_target),
        move |ops| ops.unmount(&target),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSystem;

    #[test]
    fn test_mounts_unwind_in_reverse_after_shell() {
        let mut sys = RecordingSystem::new();
        let config = RepairConfig::default();
        enter(&mut sys, &config).unwrap();

        let calls = sys.calls();
        assert_eq!(calls[0], "mount /dev/nvme0n1p4 /mnt/repair-root");
        assert!(calls.contains(&"enter_chroot /mnt/repair-root".to_string()));

        // All six mounts released, in reverse order
        let enter_idx = calls
            .iter()
            .position(|c| c.starts_with("enter_chroot"))
            .unwrap();
        let releases: Vec<_> = calls[enter_idx + 1..].to_vec();
        assert_eq!(
            releases,
            vec![
                "unmount /mnt/repair-root/sys",
                "unmount /mnt/repair-root/proc",
                "unmount /mnt/repair-root/dev",
                "unmount /mnt/repair-root/esp",
                "unmount /mnt/repair-root/var",
                "unmount /mnt/repair-root",
            ]
        );
    }

    #[test]
    fn test_failed_mount_unwinds_earlier_mounts() {
        let mut sys = RecordingSystem::new();
        sys.fail_on("mount /dev/nvme0n1p1");
        let config = RepairConfig::default();
        assert!(enter(&mut sys, &config).is_err());

        // Shell never entered, the two successful mounts were released.
        // Exact matches: the staging root is a path prefix of every other
        // mountpoint under it.
        assert_eq!(sys.count_calls("enter_chroot"), 0);
        assert_eq!(sys.count_exact("unmount /mnt/repair-root/var"), 1);
        assert_eq!(sys.count_exact("unmount /mnt/repair-root"), 1);
        assert_eq!(sys.count_exact("unmount /mnt/repair-root/esp"), 0);
    }
}
