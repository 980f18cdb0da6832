//! Clear-all-data coordinator.
//!
//! `Idle -> Armed -> TearingDownRemote -> PurgingLocal -> Broadcasting -> Idle`.
//! Once the gate says proceed, every phase runs to completion in order; remote
//! failures are absorbed, purge failures become an advisory warning, and the
//! broadcast always fires after the purge.

use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::bus::{InvalidationBroadcaster, InvalidationBus};
use crate::config::ResetConfig;
use crate::error::PurgeError;
use crate::gate::{ConfirmationGate, GateDecision};
use crate::purge::{LocalPurger, PreservationAllowlist, PurgeSummary};
use crate::remote::{RemoteTeardown, TeardownBackend, TeardownReport};
use crate::storage::{LocalCache, SecureStorage, SessionIdentity};

/// Where the coordinator currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResetPhase {
    Idle = 0,
    Armed = 1,
    TearingDownRemote = 2,
    PurgingLocal = 3,
    Broadcasting = 4,
}

impl ResetPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => ResetPhase::TearingDownRemote,
            3 => ResetPhase::PurgingLocal,
            4 => ResetPhase::Broadcasting,
            1 => ResetPhase::Armed,
            _ => ResetPhase::Idle,
        }
    }
}

/// Result of one user trigger
#[derive(Debug)]
pub enum ResetOutcome {
    /// First trigger; warn the user and wait for confirmation
    AwaitingConfirmation { window: Duration },
    /// A reset is already running; the trigger was ignored
    InProgress,
    /// The reset ran to completion
    Completed(ResetReport),
}

impl ResetOutcome {
    /// Text to surface to the user
    pub fn user_message(&self) -> String {
        match self {
            ResetOutcome::AwaitingConfirmation { window } => format!(
                "This will permanently delete all app data. Tap again within {} seconds to confirm.",
                window.as_secs().max(1)
            ),
            ResetOutcome::InProgress => "Clearing app data...".to_string(),
            ResetOutcome::Completed(report) if report.purge_warning.is_none() => {
                "All app data has been cleared.".to_string()
            }
            ResetOutcome::Completed(_) => {
                "Something went wrong while clearing app data. Please try again.".to_string()
            }
        }
    }
}

/// Details of a completed reset
#[derive(Debug)]
pub struct ResetReport {
    pub remote: TeardownReport,
    pub purged: Option<PurgeSummary>,
    /// Set when the local purge was incomplete; advisory only
    pub purge_warning: Option<PurgeError>,
    pub completed_at: DateTime<Utc>,
}

/// Entry point invoked by the settings screen's "clear all data" action
pub struct ResetCoordinator {
    gate: ConfirmationGate,
    secure: Arc<dyn SecureStorage>,
    remote: RemoteTeardown,
    purger: LocalPurger,
    broadcaster: InvalidationBroadcaster,
    phase: AtomicU8,
}

/// Returns the coordinator to idle when the teardown finishes or its future is dropped
struct TeardownClaim<'a>(&'a AtomicU8);

impl Drop for TeardownClaim<'_> {
    fn drop(&mut self) {
        self.0.store(ResetPhase::Idle as u8, Ordering::Release);
    }
}

impl std::fmt::Debug for ResetCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetCoordinator")
            .field("phase", &self.phase())
            .field("gate", &self.gate)
            .field("remote", &self.remote)
            .field("purger", &self.purger)
            .finish_non_exhaustive()
    }
}

impl ResetCoordinator {
    pub fn new(
        gate: ConfirmationGate,
        secure: Arc<dyn SecureStorage>,
        remote: RemoteTeardown,
        purger: LocalPurger,
        broadcaster: InvalidationBroadcaster,
    ) -> Self {
        Self {
            gate,
            secure,
            remote,
            purger,
            broadcaster,
            phase: AtomicU8::new(ResetPhase::Idle as u8),
        }
    }

    /// Wire a coordinator from configuration and its collaborators
    pub fn from_config(
        config: &ResetConfig,
        secure: Arc<dyn SecureStorage>,
        cache: Arc<dyn LocalCache>,
        backend: Arc<dyn TeardownBackend>,
        bus: InvalidationBus,
    ) -> Self {
        let purger = LocalPurger::new(
            Arc::clone(&secure),
            cache,
            config.storage.secure_keys.clone(),
            PreservationAllowlist::new(config.storage.preserved_cache_keys.iter().cloned()),
        );

        Self::new(
            ConfirmationGate::new(config.arming_window()),
            secure,
            RemoteTeardown::new(backend, config.teardown_deadline()),
            purger,
            InvalidationBroadcaster::new(bus),
        )
    }

    pub fn phase(&self) -> ResetPhase {
        let phase = ResetPhase::from_u8(self.phase.load(Ordering::Acquire));
        if phase == ResetPhase::Armed && !self.gate.is_armed() {
            return ResetPhase::Idle;
        }
        phase
    }

    fn set_phase(&self, phase: ResetPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn teardown_running(&self) -> bool {
        self.phase.load(Ordering::Acquire) >= ResetPhase::TearingDownRemote as u8
    }

    /// Handle one "clear all data" trigger
    pub async fn request_reset(&self) -> ResetOutcome {
        if self.teardown_running() {
            info!("Reset already in progress, ignoring trigger");
            return ResetOutcome::InProgress;
        }

        match self.gate.request_reset() {
            GateDecision::Armed { window } => {
                // Fails only when a teardown already owns the phase
                self.phase
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                        (p <= ResetPhase::Armed as u8).then_some(ResetPhase::Armed as u8)
                    })
                    .ok();
                ResetOutcome::AwaitingConfirmation { window }
            }
            GateDecision::Proceed => {
                // Claim the teardown; a concurrent claim loses and reports in-progress
                let claimed = self
                    .phase
                    .fetch_max(ResetPhase::TearingDownRemote as u8, Ordering::AcqRel);
                if claimed >= ResetPhase::TearingDownRemote as u8 {
                    return ResetOutcome::InProgress;
                }
                let _claim = TeardownClaim(&self.phase);
                ResetOutcome::Completed(self.run_teardown().await)
            }
        }
    }

    #[instrument(skip(self))]
    async fn run_teardown(&self) -> ResetReport {
        info!("Reset confirmed, tearing down session");

        // Identity must be read before the purge deletes it
        let identity = match SessionIdentity::load(self.secure.as_ref()).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "Worker id unreadable, skipping remote teardown");
                None
            }
        };
        info!(session_present = identity.is_some(), "Session identity read");

        self.set_phase(ResetPhase::TearingDownRemote);
        let remote = self
            .remote
            .request_teardown(identity.as_ref().map(|id| &id.worker_id))
            .await;

        self.set_phase(ResetPhase::PurgingLocal);
        let (purged, purge_warning) = match self.purger.purge_local().await {
            Ok(summary) => (Some(summary), None),
            Err(e) => {
                warn!(error = %e, "Local purge incomplete, continuing");
                (None, Some(e))
            }
        };

        self.set_phase(ResetPhase::Broadcasting);
        self.broadcaster.broadcast_reset();

        counter!("session_reset_completed_total", 1);
        info!(
            remote_ok = remote.fully_succeeded(),
            purge_ok = purge_warning.is_none(),
            "Session reset complete"
        );

        ResetReport {
            remote,
            purged,
            purge_warning,
            completed_at: Utc::now(),
        }
    }
}
