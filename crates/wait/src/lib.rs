//! fluxr wait: everything that runs between "reconcile requested" and "Ready".
//!
//! - [`WaitEngine`] polls readiness on a fast ticker and reports progress on a slow one.
//! - [`EventDeduplicator`] surfaces new lifecycle events, never the same batch twice in a row.
//! - [`InterruptCoordinator`] turns a first interrupt into cancellation and a quick second one into an exit.
//!
//! All loops observe one [`RunContext`].

#![forbid(unsafe_code)]

pub mod context;
pub mod engine;
pub mod events;
pub mod interrupt;
pub mod prober;

pub use context::RunContext;
pub use engine::{format_duration, WaitConfig, WaitEngine, WaitState};
pub use events::{fingerprint, EventDeduplicator};
pub use interrupt::{InterruptAction, InterruptCoordinator, FORCED_EXIT_CODE, INTERRUPT_WINDOW};
pub use prober::StatusProber;

/// Read a whole-seconds knob from the environment, falling back to `default`.
pub(crate) fn env_secs(key: &str, default: u64) -> std::time::Duration {
    let secs = std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).filter(|s| *s > 0).unwrap_or(default);
    std::time::Duration::from_secs(secs)
}
