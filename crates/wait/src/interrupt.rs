//! Two-stage interrupt handling: the first signal cancels, a second one close behind it exits.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::info;

use fluxr_core::CancelCause;

use crate::RunContext;

/// Two signals closer than this escalate to a forced exit.
pub const INTERRUPT_WINDOW: Duration = Duration::from_secs(2);

/// Exit status used for a forced exit (128 + SIGINT).
pub const FORCED_EXIT_CODE: i32 = 130;

/// What the caller must do about a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Cancel the run and let everything unwind.
    Cancel,
    /// Exit now with [`FORCED_EXIT_CODE`].
    ForceExit,
}

/// Process-wide interrupt state.
///
/// The last signal is stored as nanoseconds since `origin` plus one, so that
/// zero means "no signal yet". The window decision compares against the value
/// swapped out by this signal, so two racing signals never both see a stale
/// timestamp.
#[derive(Debug)]
pub struct InterruptCoordinator {
    origin: Instant,
    window: Duration,
    last_signal: AtomicU64,
    count: AtomicU32,
}

impl Default for InterruptCoordinator {
    fn default() -> Self {
        Self::with_window(INTERRUPT_WINDOW)
    }
}

impl InterruptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(window: Duration) -> Self {
        Self { origin: Instant::now(), window, last_signal: AtomicU64::new(0), count: AtomicU32::new(0) }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Signals seen in the current window.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn on_signal(&self) -> InterruptAction {
        self.on_signal_at(Instant::now())
    }

    pub fn on_signal_at(&self, now: Instant) -> InterruptAction {
        let stamp = (now.saturating_duration_since(self.origin).as_nanos() as u64).saturating_add(1);
        let prev = self.last_signal.swap(stamp, Ordering::AcqRel);
        let window = self.window.as_nanos() as u64;
        if prev != 0 && stamp.saturating_sub(prev) < window {
            let count = self.count.fetch_add(1, Ordering::AcqRel).saturating_add(1);
            info!(count, "repeated interrupt inside window");
            InterruptAction::ForceExit
        } else {
            self.count.store(1, Ordering::Release);
            InterruptAction::Cancel
        }
    }

    /// Record a signal and cancel `ctx` when it is the first of its window.
    pub fn handle(&self, ctx: &RunContext) -> InterruptAction {
        let action = self.on_signal();
        if action == InterruptAction::Cancel {
            ctx.cancel(CancelCause::Interrupted);
        }
        action
    }
}
