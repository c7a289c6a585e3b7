//! repairctl library
//!
//! Core functionality of the factory repair orchestrator: the fixed
//! partition layout model, the verifier gating partial repairs, the imaging
//! engine, the sanitize state machine, and the executor that sequences a
//! repair run over the `SystemOps` seam.

pub mod chroot;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod firmware;
pub mod guard;
pub mod imaging;
pub mod layout;
pub mod process_guard;
pub mod sanitize;
pub mod sanity;
pub mod system;
pub mod testing;
pub mod verify;

// Re-export main types for convenience
pub use config::{FailureAction, FinalAction, RepairConfig};
pub use error::{MismatchKind, RepairError, Result};
pub use executor::{RepairPlanExecutor, RepairScope};
pub use guard::ResourceGuard;
pub use layout::{DeviceNaming, LayoutSpec, PartitionRole, PartitionSeparator, Partset};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use sanitize::{SanitizeState, Sleeper, StartOutcome};
pub use system::{SanitizeStatus, SystemOps, ToolRunner};
pub use verify::{FsKind, VerificationExpectation};
