//! Resource Guard
//!
//! Scoped registry of cleanup actions for transiently-held resources (frozen
//! filesystems, staging mounts). Every acquisition that could leave the
//! device in an inconsistent state registers exactly one matching release;
//! releases run in reverse-acquisition order on every exit path of the
//! executor, success or failure.
//!
//! A failed release is logged and does not prevent the remaining releases
//! from running: a stuck unmount must not leave the source root frozen.
//!
//! Releases act through the same [`SystemOps`] seam as acquisitions, so the
//! owner passes its ops handle to `run_all`. Dropping a guard with pending
//! releases is a bug and is logged loudly.

use crate::error::Result;
use crate::system::SystemOps;
use log::{debug, error, info};

/// A named release action, run with the system seam it needs.
pub struct CleanupAction {
    name: String,
    release: Box<dyn FnOnce(&mut dyn SystemOps) -> Result<()>>,
}

/// Stack of cleanup actions, run in reverse order of registration.
#[derive(Default)]
pub struct ResourceGuard {
    actions: Vec<CleanupAction>,
}

impl ResourceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of releases still pending.
    pub fn pending(&self) -> usize {
        self.actions.len()
    }

    /// Register a release for a resource acquired by the caller.
    pub fn push<F>(&mut self, name: impl Into<String>, release: F)
    where
        F: FnOnce(&mut dyn SystemOps) -> Result<()> + 'static,
    {
        let name = name.into();
        debug!("Registered cleanup action: {name}");
        self.actions.push(CleanupAction {
            name,
            release: Box::new(release),
        });
    }

    /// Perform `action`, and register `release` only if it succeeded.
    ///
    /// On acquisition failure nothing is registered; the resource was never
    /// held, so there is nothing to unwind.
    pub fn acquire<A, F>(
        &mut self,
        ops: &mut dyn SystemOps,
        name: impl Into<String>,
        action: A,
        release: F,
    ) -> Result<()>
    where
        A: FnOnce(&mut dyn SystemOps) -> Result<()>,
        F: FnOnce(&mut dyn SystemOps) -> Result<()> + 'static,
    {
        action(ops)?;
        self.push(name, release);
        Ok(())
    }

    /// Run all registered releases in reverse-acquisition order.
    ///
    /// Individual failures are logged and swallowed. Idempotent: once the
    /// stack is drained, further calls do nothing.
    pub fn run_all(&mut self, ops: &mut dyn SystemOps) {
        if self.actions.is_empty() {
            return;
        }
        info!("Releasing {} held resource(s)...", self.actions.len());
        while let Some(action) = self.actions.pop() {
            match (action.release)(ops) {
                Ok(()) => debug!("Released: {}", action.name),
                Err(e) => error!("Failed to release {}: {e}", action.name),
            }
        }
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        // Releases need the ops seam, so they cannot run here; a non-empty
        // stack at drop means an exit path skipped run_all.
        for action in &self.actions {
            error!(
                "Resource guard dropped with pending release: {}",
                action.name
            );
        }
    }
}
