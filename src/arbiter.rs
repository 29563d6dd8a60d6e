//! Master arbitration: transient acquisition of exclusive display control.
//!
//! The DRM master lock is kernel-enforced, singly-owned, and not
//! queueable, so the only robust policy is optimistic transient
//! acquisition with immediate release: acquire, commit, release, every
//! time. The peer front-end periodically needs the lock for its own
//! modesetting; when cooperating with it, a bounded holdoff window
//! suppresses our attempts so the two processes cannot livelock.
//!
//! Never assume mastership persists across calls; the peer may seize it
//! at any moment between our operations.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::DisplayBackend;
use crate::utils::Throttle;

/// Failure logs for prolonged contention collapse within this window.
const THROTTLE_WINDOW: Duration = Duration::from_secs(5);

/// Result of a presentation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Surface committed to the output.
    Presented,
    /// A holdoff window is active; the update stays in surface memory and
    /// is coalesced into the pending deferred commit (last write wins).
    Deferred,
    /// Could not acquire display control; the update stays in surface
    /// memory and becomes visible once a commit later succeeds.
    ControlBusy,
    /// Control was acquired but binding the surface to the pipeline failed.
    CommitFailed,
}

#[derive(Debug, Clone, Copy)]
struct Holdoff {
    deadline: Instant,
    /// Whether control has been observed unavailable since the window
    /// started; required before an availability edge can end it early.
    saw_unavailable: bool,
}

/// The arbitration state machine: Idle -> Acquiring -> Committing ->
/// Releasing -> Idle, with a cross-cutting holdoff sub-state.
pub struct MasterArbiter {
    holdoff: Option<Holdoff>,
    holdoff_interval: Duration,
    throttle: Throttle,
}

impl MasterArbiter {
    pub fn new(holdoff_interval: Duration) -> Self {
        MasterArbiter {
            holdoff: None,
            holdoff_interval,
            throttle: Throttle::new(THROTTLE_WINDOW),
        }
    }

    /// Deadline of the active holdoff window, if any.
    pub fn holdoff_deadline(&self) -> Option<Instant> {
        self.holdoff.map(|h| h.deadline)
    }

    pub fn in_holdoff(&self) -> bool {
        self.holdoff.is_some()
    }

    /// Try to make the current surface contents visible.
    ///
    /// With `peer_expected`, a holdoff window is armed keyed off this
    /// update: the peer's own initialization may override our commit, so
    /// one deferred recommit is scheduled after the window regardless of
    /// this attempt's outcome. Updates arriving while the window is open
    /// only touch surface memory and return [`PresentOutcome::Deferred`].
    pub fn present(
        &mut self,
        backend: &mut dyn DisplayBackend,
        peer_expected: bool,
    ) -> PresentOutcome {
        if !peer_expected {
            // A stale window from a previous affinity must not block us.
            self.holdoff = None;
        } else if self.holdoff.is_some() {
            debug!("holdoff active; update coalesced into pending commit");
            return PresentOutcome::Deferred;
        }

        let outcome = self.cycle(backend);
        if peer_expected {
            self.arm(outcome == PresentOutcome::ControlBusy);
        }
        outcome
    }

    /// Operator override: drop any holdoff and run a full cycle now.
    pub fn force_present(&mut self, backend: &mut dyn DisplayBackend) -> PresentOutcome {
        self.holdoff = None;
        self.cycle(backend)
    }

    /// Service the holdoff window. Call once per loop iteration.
    ///
    /// Ends the window on deadline expiry, or early when a probe observes
    /// the unavailable-to-available edge, then retries the deferred commit
    /// once. A failed retry re-enters holdoff.
    pub fn tick(&mut self, backend: &mut dyn DisplayBackend) -> Option<PresentOutcome> {
        let holdoff = self.holdoff?;

        if Instant::now() >= holdoff.deadline {
            debug!("holdoff expired; retrying deferred commit");
            self.holdoff = None;
            return Some(self.retry(backend));
        }

        // Non-committing availability probe: acquire and release
        // immediately, just to observe the peer's state.
        match backend.acquire_control() {
            Ok(()) => {
                backend.release_control();
                if holdoff.saw_unavailable {
                    info!("display control available again; ending holdoff early");
                    self.holdoff = None;
                    return Some(self.retry(backend));
                }
                None
            }
            Err(_) => {
                if let Some(h) = self.holdoff.as_mut() {
                    h.saw_unavailable = true;
                }
                None
            }
        }
    }

    fn retry(&mut self, backend: &mut dyn DisplayBackend) -> PresentOutcome {
        let outcome = self.cycle(backend);
        if outcome != PresentOutcome::Presented {
            self.arm(outcome == PresentOutcome::ControlBusy);
        }
        outcome
    }

    /// One full arbitration cycle. Release is unconditional: a peer must
    /// never find the lock stuck with us, whatever the commit outcome.
    fn cycle(&mut self, backend: &mut dyn DisplayBackend) -> PresentOutcome {
        match backend.acquire_control() {
            Err(e) => {
                if let Some(suppressed) = self.throttle.admit("acquire") {
                    warn!(suppressed, "cannot acquire display control: {e}");
                }
                PresentOutcome::ControlBusy
            }
            Ok(()) => {
                let committed = backend.commit();
                backend.release_control();
                match committed {
                    Ok(()) => {
                        debug!("surface committed to output");
                        PresentOutcome::Presented
                    }
                    Err(e) => {
                        if let Some(suppressed) = self.throttle.admit("commit") {
                            warn!(suppressed, "commit failed: {e}");
                        }
                        PresentOutcome::CommitFailed
                    }
                }
            }
        }
    }

    fn arm(&mut self, saw_unavailable: bool) {
        let deadline = Instant::now() + self.holdoff_interval;
        debug!(
            secs = self.holdoff_interval.as_secs_f64(),
            "entering holdoff for peer"
        );
        self.holdoff = Some(Holdoff {
            deadline,
            saw_unavailable,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DisplayBackend, HeadlessBackend};

    fn backend() -> HeadlessBackend {
        let mut b = HeadlessBackend::new(64, 32);
        b.select_output(None).unwrap();
        b.create_surface().unwrap();
        b
    }

    #[test]
    fn acquire_and_release_always_paired() {
        let mut b = backend();
        let mut arbiter = MasterArbiter::new(Duration::from_secs(5));

        // Success path.
        assert_eq!(arbiter.present(&mut b, false), PresentOutcome::Presented);
        assert!(!b.holding_control());

        // Commit failure still releases.
        b.fail_commit = true;
        assert_eq!(arbiter.present(&mut b, false), PresentOutcome::CommitFailed);
        assert!(!b.holding_control());

        // Contention never leaves the lock held.
        b.fail_commit = false;
        b.control_available = false;
        assert_eq!(arbiter.present(&mut b, false), PresentOutcome::ControlBusy);
        assert!(!b.holding_control());
    }

    #[test]
    fn peer_update_arms_holdoff_even_on_success() {
        let mut b = backend();
        let mut arbiter = MasterArbiter::new(Duration::from_secs(5));
        assert_eq!(arbiter.present(&mut b, true), PresentOutcome::Presented);
        assert!(arbiter.in_holdoff());
    }

    #[test]
    fn non_peer_mode_never_holds_off() {
        let mut b = backend();
        let mut arbiter = MasterArbiter::new(Duration::from_secs(5));
        b.control_available = false;
        assert_eq!(arbiter.present(&mut b, false), PresentOutcome::ControlBusy);
        assert!(!arbiter.in_holdoff());
    }

    #[test]
    fn updates_during_holdoff_are_coalesced() {
        let mut b = backend();
        let mut arbiter = MasterArbiter::new(Duration::from_secs(60));
        b.control_available = false;
        arbiter.present(&mut b, true);
        let deadline = arbiter.holdoff_deadline().unwrap();

        assert_eq!(arbiter.present(&mut b, true), PresentOutcome::Deferred);
        assert_eq!(arbiter.present(&mut b, true), PresentOutcome::Deferred);
        // Last write wins in surface memory; the pending window is shared.
        assert_eq!(arbiter.holdoff_deadline(), Some(deadline));
    }

    #[test]
    fn no_commit_happens_during_holdoff() {
        let mut b = backend();
        let mut arbiter = MasterArbiter::new(Duration::from_secs(60));
        b.control_available = false;
        arbiter.present(&mut b, true);

        let commits_before = b.commits;
        for _ in 0..5 {
            assert_eq!(arbiter.tick(&mut b), None);
        }
        assert_eq!(b.commits, commits_before);
        assert!(arbiter.in_holdoff());
    }

    #[test]
    fn availability_edge_ends_holdoff_early() {
        let mut b = backend();
        let mut arbiter = MasterArbiter::new(Duration::from_secs(60));
        b.control_available = false;
        arbiter.present(&mut b, true);

        // Probe observes "unavailable".
        assert_eq!(arbiter.tick(&mut b), None);

        // Peer finished; next probe sees the edge and retries immediately.
        b.control_available = true;
        assert_eq!(arbiter.tick(&mut b), Some(PresentOutcome::Presented));
        assert!(!arbiter.in_holdoff());
        assert_eq!(b.commits, 1);
        assert!(!b.holding_control());
    }

    #[test]
    fn no_edge_without_prior_unavailability() {
        let mut b = backend();
        let mut arbiter = MasterArbiter::new(Duration::from_secs(60));
        // Armed off a successful peer-mode update: control stayed
        // available the whole time, so probes see no edge.
        arbiter.present(&mut b, true);
        assert_eq!(arbiter.tick(&mut b), None);
        assert!(arbiter.in_holdoff());
        assert_eq!(b.commits, 1);
    }

    #[test]
    fn expired_holdoff_retry_failure_rearms() {
        let mut b = backend();
        let mut arbiter = MasterArbiter::new(Duration::ZERO);
        b.control_available = false;
        arbiter.present(&mut b, true);

        // Deadline already passed; retry runs and fails, window re-arms.
        assert_eq!(arbiter.tick(&mut b), Some(PresentOutcome::ControlBusy));
        assert!(arbiter.in_holdoff());

        // Once the peer lets go, the next expiry retry succeeds for good.
        b.control_available = true;
        assert_eq!(arbiter.tick(&mut b), Some(PresentOutcome::Presented));
        assert!(!arbiter.in_holdoff());
    }

    #[test]
    fn force_present_bypasses_holdoff() {
        let mut b = backend();
        let mut arbiter = MasterArbiter::new(Duration::from_secs(60));
        b.control_available = false;
        arbiter.present(&mut b, true);

        b.control_available = true;
        assert_eq!(arbiter.force_present(&mut b), PresentOutcome::Presented);
        assert!(!arbiter.in_holdoff());
    }

    #[test]
    fn affinity_change_clears_stale_holdoff() {
        let mut b = backend();
        let mut arbiter = MasterArbiter::new(Duration::from_secs(60));
        b.control_available = false;
        arbiter.present(&mut b, true);
        assert!(arbiter.in_holdoff());

        b.control_available = true;
        assert_eq!(arbiter.present(&mut b, false), PresentOutcome::Presented);
        assert!(!arbiter.in_holdoff());
    }
}
