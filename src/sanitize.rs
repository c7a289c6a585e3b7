//! Sanitize State Machine
//!
//! Drives the drive-wide secure-erase operation through its hardware state
//! machine. The state is derived from the device's sanitize status log on
//! every poll and never stored: `Ready`, `InProgress(percent)` or
//! `Unsupported` (controller without sanitize support, which takes the
//! synchronous secure-format fallback instead).
//!
//! The status decoding is a hardware-specific heuristic (low-order bits of
//! the vendor status field) kept behind [`decode`], so it can be validated
//! against real device logs without touching the rest of the machine.

use crate::error::{RepairError, Result};
use crate::system::{SanitizeStatus, SystemOps};
use log::{info, warn};
use std::path::Path;
use std::time::Duration;

/// Interval between status polls while a sanitize operation runs.
///
/// The loop has no timeout of its own; it is bounded only by the hardware
/// operation.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Derived sanitize state of the drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeState {
    /// No sanitize operation active (never sanitized, or last one finished).
    Ready,
    /// Block erase running, with completion percentage 0..=100.
    InProgress(u8),
    /// The controller does not implement the sanitize operation.
    Unsupported,
}

/// What `start` actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Block-erase sanitize command issued.
    Started,
    /// An operation was already running; nothing was reissued.
    AlreadyRunning,
    /// Unsupported controller: synchronous secure-format fallback ran.
    FallbackFormatted,
}

/// Idle values of the low status bits: never sanitized, or completed.
const STATUS_IDLE: [u32; 2] = [0, 1];
/// Low-bits value reported while a sanitize operation is active.
const STATUS_ACTIVE: u32 = 2;

/// Decode a raw status log snapshot into a state.
///
/// Any status value outside the modeled set is a distinct fatal condition,
/// never silently mapped onto a known state.
pub fn decode(status: Option<SanitizeStatus>) -> Result<SanitizeState> {
    let Some(status) = status else {
        return Ok(SanitizeState::Unsupported);
    };
    let low = status.sstat % 8;
    if STATUS_IDLE.contains(&low) {
        Ok(SanitizeState::Ready)
    } else if low == STATUS_ACTIVE {
        Ok(SanitizeState::InProgress(progress_percent(status.sprog)))
    } else {
        Err(RepairError::hardware(format!(
            "unrecognized sanitize status {:#06x} (low bits {low})",
            status.sstat
        )))
    }
}

/// Scale the raw progress field against its maximum representable value.
fn progress_percent(sprog: u32) -> u8 {
    let pct = (u64::from(sprog) * 100) / u64::from(u16::MAX);
    pct.min(100) as u8
}

/// Query the current sanitize state of the device.
pub fn query(ops: &mut dyn SystemOps, device: &Path) -> Result<SanitizeState> {
    decode(ops.sanitize_status(device)?)
}

/// Start a sanitize operation, honoring the current hardware state.
pub fn start(ops: &mut dyn SystemOps, device: &Path) -> Result<StartOutcome> {
    match query(ops, device)? {
        SanitizeState::Ready => {
            ops.sanitize_block_erase(device)?;
            info!("Block-erase sanitize started on {}", device.display());
            Ok(StartOutcome::Started)
        }
        SanitizeState::InProgress(pct) => {
            info!("Sanitize already running ({pct}%), not reissuing");
            Ok(StartOutcome::AlreadyRunning)
        }
        SanitizeState::Unsupported => {
            warn!(
                "{} does not support sanitize, falling back to secure format",
                device.display()
            );
            ops.secure_format(device)?;
            Ok(StartOutcome::FallbackFormatted)
        }
    }
}

/// Blocking wait between polls, injectable for tests.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Real sleeper backed by the OS clock.
#[derive(Debug, Default)]
pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Start a sanitize and poll until the device leaves `InProgress`.
///
/// Progress is logged on change. The fallback secure-format path is
/// synchronous and returns without entering the poll loop.
pub fn run_to_completion(
    ops: &mut dyn SystemOps,
    device: &Path,
    sleeper: &mut dyn Sleeper,
    interval: Duration,
) -> Result<StartOutcome> {
    let outcome = start(ops, device)?;
    if outcome == StartOutcome::FallbackFormatted {
        info!("Secure format complete on {}", device.display());
        return Ok(outcome);
    }

    let mut last_percent: Option<u8> = None;
    loop {
        sleeper.sleep(interval);
        match query(ops, device)? {
            SanitizeState::InProgress(pct) => {
                if last_percent != Some(pct) {
                    info!("Sanitize progress: {pct}%");
                    last_percent = Some(pct);
                }
            }
            SanitizeState::Ready => {
                info!("Sanitize complete on {}", device.display());
                return Ok(outcome);
            }
            SanitizeState::Unsupported => {
                // The device answered the log page moments ago; losing it
                // mid-operation is not a modeled transition.
                return Err(RepairError::hardware(
                    "sanitize status log disappeared while operation was running",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSystem;
    use std::path::PathBuf;

    struct CountingSleeper {
        sleeps: usize,
        last: Option<Duration>,
    }

    impl CountingSleeper {
        fn new() -> Self {
            Self {
                sleeps: 0,
                last: None,
            }
        }
    }

    impl Sleeper for CountingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.sleeps += 1;
            self.last = Some(duration);
        }
    }

    fn dev() -> PathBuf {
        PathBuf::from("/dev/nvme0n1")
    }

    fn status(sstat: u32, sprog: u32) -> Option<SanitizeStatus> {
        Some(SanitizeStatus { sstat, sprog })
    }

    #[test]
    fn test_decode_idle_values_are_ready() {
        assert_eq!(decode(status(0, 0)).unwrap(), SanitizeState::Ready);
        assert_eq!(decode(status(1, 0xFFFF)).unwrap(), SanitizeState::Ready);
        // Only the low three bits matter
        assert_eq!(decode(status(0x0101, 0)).unwrap(), SanitizeState::Ready);
    }

    #[test]
    fn test_decode_active_bit_is_in_progress() {
        assert_eq!(decode(status(2, 0)).unwrap(), SanitizeState::InProgress(0));
        assert_eq!(
            decode(status(2, 0xFFFF)).unwrap(),
            SanitizeState::InProgress(100)
        );
        assert_eq!(
            decode(status(0x010A, 0x8000)).unwrap(),
            SanitizeState::InProgress(50)
        );
    }

    #[test]
    fn test_decode_missing_log_is_unsupported() {
        assert_eq!(decode(None).unwrap(), SanitizeState::Unsupported);
    }

    #[test]
    fn test_decode_unrecognized_status_is_hardware_error() {
        for low in [3u32, 4, 5, 6, 7] {
            let err = decode(status(low, 0)).unwrap_err();
            assert!(matches!(err, RepairError::HardwareState(_)), "low={low}");
            assert_eq!(err.exit_code(), 4);
        }
    }

    #[test]
    fn test_progress_monotonic_across_synthetic_values() {
        let mut last = 0u8;
        for sprog in (0..=0xFFFFu32).step_by(1111) {
            let SanitizeState::InProgress(pct) = decode(status(2, sprog)).unwrap() else {
                panic!("expected in-progress");
            };
            assert!(pct >= last, "percent regressed at sprog={sprog}");
            assert!(pct <= 100);
            last = pct;
        }
    }

    #[test]
    fn test_start_from_ready_issues_block_erase() {
        let mut sys = RecordingSystem::new();
        sys.push_sanitize_status(status(1, 0));
        let outcome = start(&mut sys, &dev()).unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(sys.count_calls("sanitize_block_erase"), 1);
        assert_eq!(sys.count_calls("secure_format"), 0);
    }

    #[test]
    fn test_start_from_in_progress_is_noop() {
        let mut sys = RecordingSystem::new();
        sys.push_sanitize_status(status(2, 0x1000));
        let outcome = start(&mut sys, &dev()).unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyRunning);
        assert_eq!(sys.count_calls("sanitize_block_erase"), 0);
        assert_eq!(sys.count_calls("secure_format"), 0);
    }

    #[test]
    fn test_start_unsupported_takes_fallback() {
        let mut sys = RecordingSystem::new();
        sys.push_sanitize_status(None);
        let outcome = start(&mut sys, &dev()).unwrap();
        assert_eq!(outcome, StartOutcome::FallbackFormatted);
        assert_eq!(sys.count_calls("secure_format"), 1);
        assert_eq!(sys.count_calls("sanitize_block_erase"), 0);
    }

    #[test]
    fn test_run_to_completion_polls_until_ready() {
        let mut sys = RecordingSystem::new();
        sys.push_sanitize_status(status(1, 0)); // start query: ready
        sys.push_sanitize_status(status(2, 0x4000)); // 25%
        sys.push_sanitize_status(status(2, 0x8000)); // 50%
        sys.push_sanitize_status(status(2, 0xC000)); // 75%
        sys.push_sanitize_status(status(1, 0xFFFF)); // done

        let mut sleeper = CountingSleeper::new();
        let outcome =
            run_to_completion(&mut sys, &dev(), &mut sleeper, Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(sleeper.sleeps, 4);
        assert_eq!(sleeper.last, Some(Duration::from_secs(5)));
        assert_eq!(sys.count_calls("sanitize_block_erase"), 1);
    }

    #[test]
    fn test_run_to_completion_fallback_never_polls() {
        let mut sys = RecordingSystem::new();
        sys.push_sanitize_status(None);
        let mut sleeper = CountingSleeper::new();
        let outcome =
            run_to_completion(&mut sys, &dev(), &mut sleeper, POLL_INTERVAL).unwrap();
        assert_eq!(outcome, StartOutcome::FallbackFormatted);
        assert_eq!(sleeper.sleeps, 0);
        assert_eq!(sys.count_calls("secure_format"), 1);
    }

    #[test]
    fn test_run_to_completion_surfaces_hardware_error() {
        let mut sys = RecordingSystem::new();
        sys.push_sanitize_status(status(1, 0));
        sys.push_sanitize_status(status(2, 0x1000));
        sys.push_sanitize_status(status(7, 0)); // failed-state pattern
        let mut sleeper = CountingSleeper::new();
        let err =
            run_to_completion(&mut sys, &dev(), &mut sleeper, POLL_INTERVAL).unwrap_err();
        assert!(matches!(err, RepairError::HardwareState(_)));
    }
}
