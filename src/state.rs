//! Shared playback-control state
//!
//! The manual-stop and manual-skip flags are set by user-driven operations
//! and consulted by the end-of-session decision; cancellation is cooperative,
//! so an in-flight resolve or transcode runs to its own completion and its
//! result is discarded once a flag is up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flags shared between the control surface and the stream session tasks
#[derive(Debug, Default)]
pub struct SharedState {
    manual_stop: AtomicBool,
    manual_skip: AtomicBool,
    /// Single mutual-exclusion flag serializing all queue advances
    transition_busy: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn manual_stop(&self) -> bool {
        self.manual_stop.load(Ordering::Acquire)
    }

    pub fn set_manual_stop(&self, value: bool) {
        self.manual_stop.store(value, Ordering::Release);
    }

    pub fn manual_skip(&self) -> bool {
        self.manual_skip.load(Ordering::Acquire)
    }

    pub fn set_manual_skip(&self, value: bool) {
        self.manual_skip.store(value, Ordering::Release);
    }

    /// Clear both manual flags; called after the end-of-session decision has
    /// consumed them.
    pub fn reset_manual_flags(&self) {
        self.set_manual_stop(false);
        self.set_manual_skip(false);
    }

    /// Attempt to begin a queue transition. At most one may be in flight
    /// process-wide; acquisition is try-only, so a busy guard means the
    /// caller drops its operation rather than queueing or retrying it.
    pub fn begin_transition(state: &Arc<Self>) -> Option<TransitionPermit> {
        if state
            .transition_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(TransitionPermit {
                state: Arc::clone(state),
            })
        } else {
            None
        }
    }

    pub fn transition_in_progress(&self) -> bool {
        self.transition_busy.load(Ordering::Acquire)
    }
}

/// RAII permit: the guard clears when the permit drops, i.e. only after the
/// playback handoff succeeded or the attempt definitively failed.
pub struct TransitionPermit {
    state: Arc<SharedState>,
}

impl Drop for TransitionPermit {
    fn drop(&mut self) {
        self.state.transition_busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permit_is_exclusive_and_releases_on_drop() {
        let state = SharedState::new();
        let permit = SharedState::begin_transition(&state).expect("first acquisition");
        assert!(state.transition_in_progress());
        assert!(SharedState::begin_transition(&state).is_none());
        drop(permit);
        assert!(!state.transition_in_progress());
        assert!(SharedState::begin_transition(&state).is_some());
    }

    #[test]
    fn manual_flags_roundtrip() {
        let state = SharedState::new();
        assert!(!state.manual_stop());
        assert!(!state.manual_skip());
        state.set_manual_stop(true);
        state.set_manual_skip(true);
        assert!(state.manual_stop());
        assert!(state.manual_skip());
        state.reset_manual_flags();
        assert!(!state.manual_stop());
        assert!(!state.manual_skip());
    }
}
