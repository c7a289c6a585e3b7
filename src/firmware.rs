//! Firmware staging collaborator
//!
//! Thin policy layer over the vendor firmware tool. When a vendored payload
//! directory is configured it overrides the system-installed tool (the
//! vendored copy ships next to the payload) and redirects staging at that
//! payload.
//!
//! Staging is best-effort: a device with old firmware still boots the
//! repaired OS, so failures are logged and swallowed — unless force mode is
//! requested, which both reflashes up-to-date firmware and makes failures
//! fatal.

use crate::config::RepairConfig;
use crate::error::Result;
use crate::system::SystemOps;
use log::{info, warn};
use std::path::PathBuf;

/// Pick the tool binary and payload for this run.
///
/// A vendored payload directory containing its own copy of the tool wins
/// over the system-installed one.
fn resolve_tool(config: &RepairConfig) -> (PathBuf, Option<PathBuf>) {
    if let Some(dir) = &config.firmware_payload_dir {
        if let Some(tool_name) = config.firmware_tool.file_name() {
            let vendored = dir.join(tool_name);
            if vendored.exists() {
                info!("Using vendored firmware tool {}", vendored.display());
                return (vendored, Some(dir.clone()));
            }
        }
        return (config.firmware_tool.clone(), Some(dir.clone()));
    }
    (config.firmware_tool.clone(), None)
}

/// Stage a firmware update, applying the best-effort/force policy.
pub fn stage(ops: &mut dyn SystemOps, config: &RepairConfig) -> Result<()> {
    let (tool, payload) = resolve_tool(config);
    info!("Staging firmware update via {}", tool.display());
    match ops.stage_firmware(&tool, payload.as_deref(), config.force_firmware) {
        Ok(()) => {
            info!("Firmware staged");
            Ok(())
        }
        Err(e) if !config.force_firmware => {
            warn!("Firmware staging failed (continuing): {e}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSystem;

    #[test]
    fn test_failure_is_swallowed_without_force() {
        let mut sys = RecordingSystem::new();
        sys.fail_on("stage_firmware");
        let config = RepairConfig::default();
        assert!(stage(&mut sys, &config).is_ok());
        assert_eq!(sys.count_calls("stage_firmware"), 1);
    }

    #[test]
    fn test_failure_is_fatal_with_force() {
        let mut sys = RecordingSystem::new();
        sys.fail_on("stage_firmware");
        let config = RepairConfig {
            force_firmware: true,
            ..RepairConfig::default()
        };
        assert!(stage(&mut sys, &config).is_err());
    }

    #[test]
    fn test_vendored_payload_overrides_tool() {
        let dir = tempfile::tempdir().unwrap();
        let vendored = dir.path().join("biosupdate");
        std::fs::write(&vendored, b"#!/bin/sh\n").unwrap();

        let config = RepairConfig {
            firmware_payload_dir: Some(dir.path().to_path_buf()),
            ..RepairConfig::default()
        };
        let (tool, payload) = resolve_tool(&config);
        assert_eq!(tool, vendored);
        assert_eq!(payload.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_payload_without_vendored_tool_keeps_system_tool() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepairConfig {
            firmware_payload_dir: Some(dir.path().to_path_buf()),
            ..RepairConfig::default()
        };
        let (tool, payload) = resolve_tool(&config);
        assert_eq!(tool, config.firmware_tool);
        assert!(payload.is_some());
    }

    #[test]
    fn test_no_payload_uses_system_tool() {
        let config = RepairConfig::default();
        let (tool, payload) = resolve_tool(&config);
        assert_eq!(tool, config.firmware_tool);
        assert!(payload.is_none());
    }
}
