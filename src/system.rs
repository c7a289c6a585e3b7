//! System operations seam
//!
//! Every external effect the orchestrator performs goes through the
//! [`SystemOps`] trait: partition-table writes, filesystem probes and
//! formats, block copies, freeze/thaw, sanitize commands and the
//! collaborator tools (firmware staging, boot finalization, bootloader
//! install, chroot entry). `ToolRunner` is the real implementation and the
//! ONLY sanctioned way to spawn external tools:
//!
//! - children run in their own process group (death pact compliance)
//! - every child PID is registered for cleanup on parent exit
//! - a missing binary surfaces as `ToolUnavailable`, distinct from a tool
//!   that ran and failed

use crate::error::{RepairError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use log::{debug, info};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Transfer block size for root-image duplication, in MiB.
///
/// Large enough to saturate sequential throughput on the internal drive.
pub const COPY_BLOCK_SIZE_MIB: u64 = 128;

/// Raw sanitize status snapshot read from the drive's sanitize status log.
///
/// Decoding the fields into a state is the job of the sanitize module; this
/// struct is the hardware-specific wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeStatus {
    /// Status field; the low-order bits encode active-vs-idle.
    pub sstat: u32,
    /// Progress field, scaled against `u16::MAX`.
    pub sprog: u32,
}

/// External effects of the repair pipeline.
///
/// `&mut self` so a recording fake can log calls without interior
/// mutability.
pub trait SystemOps {
    // --- partition table ---

    /// Write a rendered partition-table script to the device.
    fn write_partition_table(&mut self, device: &Path, script: &str) -> Result<()>;

    /// Wait for device nodes to appear after a table write or format.
    fn settle(&mut self) -> Result<()>;

    // --- probing ---

    /// Filesystem-type signature of a partition, `None` if unformatted.
    fn probe_fs_type(&mut self, device: &Path) -> Result<Option<String>>;

    /// GPT partition label, `None` if absent.
    fn probe_partition_label(&mut self, device: &Path) -> Result<Option<String>>;

    /// Physical capacity of the whole device in MiB.
    fn device_capacity_mib(&mut self, device: &Path) -> Result<u64>;

    // --- formatting ---

    fn format_vfat(&mut self, device: &Path, label: &str) -> Result<()>;
    fn format_ext4(&mut self, device: &Path, label: &str) -> Result<()>;

    // --- imaging ---

    /// Byte-exact block copy with synchronous flush on completion.
    fn block_copy(&mut self, source: &Path, target: &Path, block_size_mib: u64) -> Result<()>;

    /// Suspend writes to a mounted filesystem for a consistent snapshot.
    fn freeze_fs(&mut self, mountpoint: &Path) -> Result<()>;

    fn thaw_fs(&mut self, mountpoint: &Path) -> Result<()>;

    /// Regenerate the filesystem UUID so the copy does not share identity
    /// with its source.
    fn regenerate_fs_uuid(&mut self, device: &Path) -> Result<()>;

    /// Read-only consistency check; an inconsistent filesystem is an error.
    fn check_fs(&mut self, device: &Path) -> Result<()>;

    // --- mounts ---

    fn mount(&mut self, device: &Path, mountpoint: &Path) -> Result<()>;
    fn bind_mount(&mut self, source: &Path, mountpoint: &Path) -> Result<()>;
    fn unmount(&mut self, mountpoint: &Path) -> Result<()>;

    // --- sanitize (hardware adapter) ---

    /// Read the sanitize status log. `Ok(None)` means the device does not
    /// support the sanitize operation at all.
    fn sanitize_status(&mut self, device: &Path) -> Result<Option<SanitizeStatus>>;

    /// Issue the block-erase sanitize command (asynchronous on the device).
    fn sanitize_block_erase(&mut self, device: &Path) -> Result<()>;

    /// Fallback secure format for devices without sanitize support
    /// (synchronous: the device returns to a normal state on completion).
    fn secure_format(&mut self, device: &Path) -> Result<()>;

    // --- external collaborators ---

    /// Invoke the firmware staging tool, optionally redirected at a vendored
    /// payload directory.
    fn stage_firmware(&mut self, tool: &Path, payload_dir: Option<&Path>, force: bool)
    -> Result<()>;

    /// Finalize boot configuration for one partition set.
    fn finalize_boot(&mut self, tool: &Path, root: &Path, esp: &Path) -> Result<()>;

    /// Install the bootloader onto one partition set.
    fn install_bootloader(&mut self, tool: &Path, root: &Path, esp: &Path) -> Result<()>;

    /// Interactive shell inside a mounted partition set. Blocks until the
    /// operator exits.
    fn enter_chroot(&mut self, root: &Path) -> Result<()>;

    // --- power ---

    fn power_off(&mut self) -> Result<()>;
    fn reboot(&mut self) -> Result<()>;
}

/// Real `SystemOps` backed by external tools.
#[derive(Debug, Default)]
pub struct ToolRunner;

impl ToolRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run a tool to completion, capturing output.
    ///
    /// Spawns in a new process group and registers the PID so the death
    /// pact covers destructive children.
    fn run(&mut self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        self.run_with_stdin(program, args, None)
    }

    fn run_with_stdin(
        &mut self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<ToolOutput> {
        debug!("Running tool: {program} {args:?}");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RepairError::ToolUnavailable(program.to_string())
            } else {
                RepairError::io(format!("failed to spawn {program}: {e}"))
            }
        })?;
        let pid = child.id();

        {
            let registry = ChildRegistry::global();
            // Lock is held briefly, panic is acceptable if poisoned
            let mut guard = registry.lock().expect("ChildRegistry mutex poisoned");
            guard.register(pid);
        }

        if let Some(input) = stdin {
            // take() so the pipe closes and the child sees EOF
            if let Some(mut handle) = child.stdin.take() {
                handle
                    .write_all(input.as_bytes())
                    .map_err(|e| RepairError::io(format!("failed to feed {program} stdin: {e}")))?;
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| RepairError::io(format!("failed waiting for {program}: {e}")))?;

        {
            let registry = ChildRegistry::global();
            let mut guard = registry.lock().expect("ChildRegistry mutex poisoned");
            guard.unregister(pid);
        }

        Ok(ToolOutput {
            program: program.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        })
    }

    /// Run a tool with the operator's terminal attached (chroot shell).
    fn run_interactive(&mut self, program: &str, args: &[&str]) -> Result<ToolOutput> {
        debug!("Running interactive tool: {program} {args:?}");
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RepairError::ToolUnavailable(program.to_string())
                } else {
                    RepairError::io(format!("failed to spawn {program}: {e}"))
                }
            })?;
        Ok(ToolOutput {
            program: program.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: status.code(),
            success: status.success(),
        })
    }
}

/// Captured result of a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub program: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl ToolOutput {
    /// Turn a non-zero exit into an `Io` error with context.
    pub fn ensure_success(self, context: &str) -> Result<ToolOutput> {
        if self.success {
            Ok(self)
        } else {
            let code = self.exit_code.unwrap_or(-1);
            Err(RepairError::io(format!(
                "{context} failed (exit code {code}): {}",
                self.stderr.trim()
            )))
        }
    }
}

impl SystemOps for ToolRunner {
    fn write_partition_table(&mut self, device: &Path, script: &str) -> Result<()> {
        info!("Writing partition table to {}", device.display());
        let dev = device.display().to_string();
        self.run_with_stdin("sfdisk", &[dev.as_str()], Some(script))?
            .ensure_success("partition table write")?;
        Ok(())
    }

    fn settle(&mut self) -> Result<()> {
        self.run("udevadm", &["settle"])?
            .ensure_success("udev settle")?;
        Ok(())
    }

    fn probe_fs_type(&mut self, device: &Path) -> Result<Option<String>> {
        let dev = device.display().to_string();
        let out = self.run("blkid", &["-o", "value", "-s", "TYPE", dev.as_str()])?;
        // blkid exits 2 when the requested tag has no value
        if !out.success {
            return Ok(None);
        }
        let value = out.stdout.trim().to_string();
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    fn probe_partition_label(&mut self, device: &Path) -> Result<Option<String>> {
        let dev = device.display().to_string();
        let out = self.run("blkid", &["-o", "value", "-s", "PARTLABEL", dev.as_str()])?;
        if !out.success {
            return Ok(None);
        }
        let value = out.stdout.trim().to_string();
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    fn device_capacity_mib(&mut self, device: &Path) -> Result<u64> {
        let dev = device.display().to_string();
        let out = self
            .run("blockdev", &["--getsize64", dev.as_str()])?
            .ensure_success("capacity query")?;
        let bytes: u64 = out.stdout.trim().parse().map_err(|e| {
            RepairError::io(format!(
                "unparseable capacity for {}: {e}",
                device.display()
            ))
        })?;
        Ok(bytes / (1024 * 1024))
    }

    fn format_vfat(&mut self, device: &Path, label: &str) -> Result<()> {
        info!("Formatting {} as vfat ({label})", device.display());
        let dev = device.display().to_string();
        self.run("mkfs.vfat", &["-F", "32", "-n", label, dev.as_str()])?
            .ensure_success("vfat format")?;
        Ok(())
    }

    fn format_ext4(&mut self, device: &Path, label: &str) -> Result<()> {
        info!("Formatting {} as ext4 ({label})", device.display());
        let dev = device.display().to_string();
        self.run("mkfs.ext4", &["-F", "-L", label, dev.as_str()])?
            .ensure_success("ext4 format")?;
        Ok(())
    }

    fn block_copy(&mut self, source: &Path, target: &Path, block_size_mib: u64) -> Result<()> {
        info!(
            "Duplicating {} -> {} ({}MiB blocks)",
            source.display(),
            target.display(),
            block_size_mib
        );
        let if_arg = format!("if={}", source.display());
        let of_arg = format!("of={}", target.display());
        let bs_arg = format!("bs={block_size_mib}M");
        self.run(
            "dd",
            &[
                if_arg.as_str(),
                of_arg.as_str(),
                bs_arg.as_str(),
                "oflag=sync",
                "status=none",
            ],
        )?
        .ensure_success("block copy")?;
        Ok(())
    }

    fn freeze_fs(&mut self, mountpoint: &Path) -> Result<()> {
        info!("Freezing filesystem at {}", mountpoint.display());
        let mp = mountpoint.display().to_string();
        self.run("fsfreeze", &["--freeze", mp.as_str()])?
            .ensure_success("filesystem freeze")?;
        Ok(())
    }

    fn thaw_fs(&mut self, mountpoint: &Path) -> Result<()> {
        info!("Thawing filesystem at {}", mountpoint.display());
        let mp = mountpoint.display().to_string();
        self.run("fsfreeze", &["--unfreeze", mp.as_str()])?
            .ensure_success("filesystem thaw")?;
        Ok(())
    }

    fn regenerate_fs_uuid(&mut self, device: &Path) -> Result<()> {
        info!("Regenerating filesystem UUID on {}", device.display());
        let dev = device.display().to_string();
        self.run("btrfstune", &["-f", "-u", dev.as_str()])?
            .ensure_success("UUID regeneration")?;
        Ok(())
    }

    fn check_fs(&mut self, device: &Path) -> Result<()> {
        info!("Checking filesystem on {}", device.display());
        let dev = device.display().to_string();
        self.run("btrfs", &["check", "--readonly", dev.as_str()])?
            .ensure_success("filesystem check")?;
        Ok(())
    }

    fn mount(&mut self, device: &Path, mountpoint: &Path) -> Result<()> {
        std::fs::create_dir_all(mountpoint)?;
        let dev = device.display().to_string();
        let mp = mountpoint.display().to_string();
        self.run("mount", &[dev.as_str(), mp.as_str()])?
            .ensure_success("mount")?;
        Ok(())
    }

    fn bind_mount(&mut self, source: &Path, mountpoint: &Path) -> Result<()> {
        std::fs::create_dir_all(mountpoint)?;
        let src = source.display().to_string();
        let mp = mountpoint.display().to_string();
        self.run("mount", &["--bind", src.as_str(), mp.as_str()])?
            .ensure_success("bind mount")?;
        Ok(())
    }

    fn unmount(&mut self, mountpoint: &Path) -> Result<()> {
        let mp = mountpoint.display().to_string();
        self.run("umount", &[mp.as_str()])?
            .ensure_success("unmount")?;
        Ok(())
    }

    fn sanitize_status(&mut self, device: &Path) -> Result<Option<SanitizeStatus>> {
        let dev = device.display().to_string();
        let out = self.run(
            "nvme",
            &["sanitize-log", dev.as_str(), "--output-format=json"],
        )?;
        if !out.success {
            // Controller without sanitize support rejects the log page
            debug!(
                "sanitize-log unavailable on {}: {}",
                device.display(),
                out.stderr.trim()
            );
            return Ok(None);
        }
        let value: serde_json::Value = serde_json::from_str(&out.stdout)
            .map_err(|e| RepairError::hardware(format!("unparseable sanitize log: {e}")))?;
        let sstat = value
            .get("sstat")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RepairError::hardware("sanitize log missing sstat field"))?;
        let sprog = value
            .get("sprog")
            .and_then(|v| v.as_u64())
            .unwrap_or(u64::from(u16::MAX));
        Ok(Some(SanitizeStatus {
            sstat: sstat as u32,
            sprog: sprog as u32,
        }))
    }

    fn sanitize_block_erase(&mut self, device: &Path) -> Result<()> {
        info!("Issuing block-erase sanitize on {}", device.display());
        let dev = device.display().to_string();
        self.run("nvme", &["sanitize", dev.as_str(), "--sanact=2"])?
            .ensure_success("sanitize command")?;
        Ok(())
    }

    fn secure_format(&mut self, device: &Path) -> Result<()> {
        info!("Issuing secure format on {}", device.display());
        let dev = device.display().to_string();
        self.run("nvme", &["format", dev.as_str(), "--ses=1", "--force"])?
            .ensure_success("secure format")?;
        Ok(())
    }

    fn stage_firmware(
        &mut self,
        tool: &Path,
        payload_dir: Option<&Path>,
        force: bool,
    ) -> Result<()> {
        let prog = tool.display().to_string();
        let mut args: Vec<String> = Vec::new();
        if let Some(dir) = payload_dir {
            args.push("--payload".to_string());
            args.push(dir.display().to_string());
        }
        if force {
            args.push("--force".to_string());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(prog.as_str(), &arg_refs)?
            .ensure_success("firmware staging")?;
        Ok(())
    }

    fn finalize_boot(&mut self, tool: &Path, root: &Path, esp: &Path) -> Result<()> {
        let prog = tool.display().to_string();
        let root_arg = root.display().to_string();
        let esp_arg = esp.display().to_string();
        self.run(
            prog.as_str(),
            &["--root", root_arg.as_str(), "--esp", esp_arg.as_str()],
        )?
        .ensure_success("boot finalization")?;
        Ok(())
    }

    fn install_bootloader(&mut self, tool: &Path, root: &Path, esp: &Path) -> Result<()> {
        let prog = tool.display().to_string();
        let root_arg = root.display().to_string();
        let esp_arg = esp.display().to_string();
        self.run(
            prog.as_str(),
            &[
                "--install",
                "--root",
                root_arg.as_str(),
                "--esp",
                esp_arg.as_str(),
            ],
        )?
        .ensure_success("bootloader install")?;
        Ok(())
    }

    fn enter_chroot(&mut self, root: &Path) -> Result<()> {
        let root_arg = root.display().to_string();
        self.run_interactive("chroot", &[root_arg.as_str(), "/bin/bash"])?
            .ensure_success("chroot shell")?;
        Ok(())
    }

    fn power_off(&mut self) -> Result<()> {
        self.run("systemctl", &["poweroff"])?
            .ensure_success("power off")?;
        Ok(())
    }

    fn reboot(&mut self) -> Result<()> {
        self.run("systemctl", &["reboot"])?
            .ensure_success("reboot")?;
        Ok(())
    }
}
