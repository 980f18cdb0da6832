//! Two-trigger confirmation gate guarding the destructive reset.
//!
//! The gate is an explicit state value behind one lock plus a cancellable
//! disarm timer. Every transition happens under the lock, and the timer only
//! disarms the arming generation it was scheduled for, so a user-driven
//! proceed and a timeout-driven disarm can never both consume the same arming.

use metrics::counter;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Outcome of a single trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// First trigger: nothing destructive happened, confirm within `window`
    Armed { window: Duration },
    /// Second trigger inside the window: the reset may run
    Proceed,
}

#[derive(Debug)]
enum GateState {
    Disarmed,
    Armed {
        generation: u64,
        deadline: Instant,
        disarm_timer: AbortHandle,
    },
}

#[derive(Debug)]
struct GateInner {
    state: GateState,
    next_generation: u64,
}

/// Arm/disarm state machine; never persisted, no storage or network access.
///
/// Must be driven from within a Tokio runtime: arming schedules the disarm
/// timer on the current runtime.
#[derive(Debug)]
pub struct ConfirmationGate {
    window: Duration,
    inner: Arc<Mutex<GateInner>>,
}

fn lock(inner: &Mutex<GateInner>) -> MutexGuard<'_, GateInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConfirmationGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            inner: Arc::new(Mutex::new(GateInner {
                state: GateState::Disarmed,
                next_generation: 0,
            })),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Register one user trigger.
    ///
    /// A trigger at or past the deadline is a fresh first trigger even if the
    /// disarm timer has not run yet.
    pub fn request_reset(&self) -> GateDecision {
        let now = Instant::now();
        let mut inner = lock(&self.inner);

        match std::mem::replace(&mut inner.state, GateState::Disarmed) {
            GateState::Armed {
                generation,
                deadline,
                disarm_timer,
            } if now < deadline => {
                disarm_timer.abort();
                debug!(generation, "Confirmation received, gate consumed");
                GateDecision::Proceed
            }
            GateState::Armed { disarm_timer, .. } => {
                disarm_timer.abort();
                self.arm(&mut inner, now)
            }
            GateState::Disarmed => self.arm(&mut inner, now),
        }
    }

    fn arm(&self, inner: &mut GateInner, now: Instant) -> GateDecision {
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let deadline = now + self.window;

        let shared = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut inner = lock(&shared);
            if matches!(inner.state, GateState::Armed { generation: g, .. } if g == generation) {
                inner.state = GateState::Disarmed;
                debug!(generation, "Arming window elapsed, gate disarmed");
            }
        });

        inner.state = GateState::Armed {
            generation,
            deadline,
            disarm_timer: timer.abort_handle(),
        };

        counter!("session_reset_armed_total", 1);
        info!(
            window_ms = self.window.as_millis() as u64,
            "Reset armed, awaiting confirmation"
        );

        GateDecision::Armed {
            window: self.window,
        }
    }

    /// Whether a confirming trigger right now would proceed
    pub fn is_armed(&self) -> bool {
        match lock(&self.inner).state {
            GateState::Armed { deadline, .. } => Instant::now() < deadline,
            GateState::Disarmed => false,
        }
    }

    /// Cancel a pending arming, e.g. when the settings screen is left
    pub fn disarm(&self) {
        let mut inner = lock(&self.inner);
        if let GateState::Armed { disarm_timer, .. } =
            std::mem::replace(&mut inner.state, GateState::Disarmed)
        {
            disarm_timer.abort();
            debug!("Gate disarmed explicitly");
        }
    }
}

impl Drop for ConfirmationGate {
    fn drop(&mut self) {
        if let GateState::Armed { disarm_timer, .. } = &lock(&self.inner).state {
            disarm_timer.abort();
        }
    }
}
