//! GPU context loss bookkeeping.
//!
//! ```text
//!            lost                restore ok
//! Active ──────────► Lost ──► Restoring ──────────► Active
//!                     ▲           │
//!                     └───────────┘ restore failed (fatal, no retry)
//! ```
//!
//! The coordinator only tracks state and the context generation. The scene
//! performs the actual restore walk (see
//! [`Scene::handle_context_restored`](crate::Scene::handle_context_restored))
//! between [`begin_restore`](ContextRecoveryCoordinator::begin_restore) and
//! [`finish_restore`](ContextRecoveryCoordinator::finish_restore).

use crate::error::DrapeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextState {
    Active,
    Lost,
    Restoring,
}

#[derive(Debug)]
pub struct ContextRecoveryCoordinator {
    state: ContextState,
    generation: u64,
    losses: u32,
    last_failure: Option<String>,
}

impl Default for ContextRecoveryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRecoveryCoordinator {
    pub fn new() -> Self {
        Self {
            state: ContextState::Active,
            generation: 0,
            losses: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Incremented by every restore. GPU handles from an older generation
    /// are invalid.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        self.state == ContextState::Active
    }

    /// Draw submission is suppressed unless the context is active.
    pub fn draws_allowed(&self) -> bool {
        self.is_active()
    }

    pub fn losses(&self) -> u32 {
        self.losses
    }

    /// Reason of the last failed restore.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    /// Returns `false` when the context was already lost.
    pub fn on_lost(&mut self) -> bool {
        match self.state {
            ContextState::Lost => false,
            ContextState::Active | ContextState::Restoring => {
                log::warn!("gpu context lost (generation {})", self.generation);
                self.state = ContextState::Lost;
                self.losses += 1;
                true
            }
        }
    }

    /// Enter `Restoring` and return the generation the restore uploads into.
    ///
    /// `None` unless the context is currently lost.
    pub fn begin_restore(&mut self) -> Option<u64> {
        if self.state != ContextState::Lost {
            log::debug!("restore requested while {:?}, ignoring", self.state);
            return None;
        }
        self.state = ContextState::Restoring;
        self.generation += 1;
        Some(self.generation)
    }

    pub fn finish_restore(&mut self) {
        if self.state == ContextState::Restoring {
            self.state = ContextState::Active;
            self.last_failure = None;
            log::info!("gpu context restored (generation {})", self.generation);
        }
    }

    /// Back to `Lost`. The returned error is meant for the caller; no retry
    /// is scheduled.
    pub fn fail_restore(&mut self, reason: impl Into<String>) -> DrapeError {
        let reason = reason.into();
        log::error!("gpu context restoration failed: {reason}");
        self.state = ContextState::Lost;
        self.last_failure = Some(reason.clone());
        DrapeError::ContextLossFatal(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_bumps_generation() {
        let mut ctx = ContextRecoveryCoordinator::new();
        assert!(ctx.draws_allowed());
        assert!(ctx.on_lost());
        assert!(!ctx.on_lost());
        assert!(!ctx.draws_allowed());

        assert_eq!(ctx.begin_restore(), Some(1));
        assert_eq!(ctx.state(), ContextState::Restoring);
        assert!(!ctx.draws_allowed());
        ctx.finish_restore();
        assert!(ctx.is_active());
        assert_eq!(ctx.generation(), 1);
        assert_eq!(ctx.losses(), 1);
    }

    #[test]
    fn restore_requires_lost_state() {
        let mut ctx = ContextRecoveryCoordinator::new();
        assert_eq!(ctx.begin_restore(), None);
        assert_eq!(ctx.generation(), 0);
    }

    #[test]
    fn failure_returns_to_lost() {
        let mut ctx = ContextRecoveryCoordinator::new();
        ctx.on_lost();
        ctx.begin_restore();
        let err = ctx.fail_restore("driver unavailable");
        assert!(matches!(err, DrapeError::ContextLossFatal(_)));
        assert_eq!(ctx.state(), ContextState::Lost);
        assert_eq!(ctx.last_failure(), Some("driver unavailable"));
        assert!(ctx.begin_restore().is_some());
    }
}
