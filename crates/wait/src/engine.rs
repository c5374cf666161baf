//! The wait engine: poll until Ready, the deadline passes, or the run is cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use fluxr_core::{FluxrError, FluxrResult, Reporter, ResourceCoordinates, WatchTarget};
use fluxr_kubehub::{locator, ClusterApi};

use crate::{RunContext, StatusProber};

/// Cadences of the engine's tickers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Readiness probe and deadline check.
    pub poll_interval: Duration,
    /// Progress line with the condition summary.
    pub status_interval: Duration,
    /// Minimum gap between two reports of a failing readiness probe.
    pub error_report_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            status_interval: Duration::from_secs(10),
            error_report_interval: Duration::from_secs(10),
        }
    }
}

impl WaitConfig {
    /// Defaults, overridable with `FLUXR_POLL_SECS` and `FLUXR_STATUS_SECS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval: crate::env_secs("FLUXR_POLL_SECS", d.poll_interval.as_secs()),
            status_interval: crate::env_secs("FLUXR_STATUS_SECS", d.status_interval.as_secs()),
            ..d
        }
    }
}

/// Where a wait ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Waiting,
    Ready,
    TimedOut,
    Cancelled,
    FatalResolutionError,
}

impl WaitState {
    fn of(result: &FluxrResult<()>) -> Self {
        match result {
            Ok(()) => Self::Ready,
            Err(FluxrError::Timeout(_)) => Self::TimedOut,
            Err(FluxrError::Cancelled(_)) => Self::Cancelled,
            Err(_) => Self::FatalResolutionError,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::FatalResolutionError => "resolution_error",
        }
    }
}

/// `42s`, `5m`, `1.5h`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        format!("{:.0}m", secs / 60.0)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

/// Run `fut` unless the context is cancelled first.
async fn guarded<F: Future>(ctx: &RunContext, fut: F) -> FluxrResult<F::Output> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(FluxrError::Cancelled(ctx.cause())),
        out = fut => Ok(out),
    }
}

pub struct WaitEngine {
    api: Arc<dyn ClusterApi>,
    target: WatchTarget,
    prober: StatusProber,
    reporter: Arc<dyn Reporter>,
    config: WaitConfig,
}

impl WaitEngine {
    pub fn new(api: Arc<dyn ClusterApi>, target: WatchTarget, reporter: Arc<dyn Reporter>) -> Self {
        let prober = StatusProber::new(api.clone(), target.clone());
        Self { api, target, prober, reporter, config: WaitConfig::default() }
    }

    pub fn with_config(mut self, config: WaitConfig) -> Self {
        self.config = config;
        self
    }

    /// Block until the target reports `Ready=True`.
    ///
    /// Coordinates are resolved once up front. Readiness is probed every
    /// `poll_interval`; once `timeout` has passed, the last known status is
    /// reported and `Timeout` returned. Probe errors are retried until then.
    pub async fn wait_for_ready(&self, ctx: &RunContext, timeout: Duration) -> FluxrResult<()> {
        let t0 = Instant::now();
        debug!(resource = %self.target, state = WaitState::Waiting.as_str(), "wait started");
        let resolved = guarded(ctx, locator::resolve(self.api.as_ref(), &self.target)).await.and_then(|r| r);
        let result = match resolved {
            Ok(coords) => {
                info!(resource = %self.target, coords = %coords, "resolved coordinates");
                self.poll_until_ready(ctx, &coords, timeout).await
            }
            Err(e) => Err(e),
        };
        let state = WaitState::of(&result);
        histogram!("fluxr_wait_seconds", t0.elapsed().as_secs_f64());
        counter!("fluxr_wait_outcomes_total", 1u64, "outcome" => state.as_str());
        match &result {
            Ok(()) => info!(resource = %self.target, state = state.as_str(), "wait finished"),
            Err(e) => warn!(resource = %self.target, state = state.as_str(), error = %e, "wait finished"),
        }
        result
    }

    async fn poll_until_ready(&self, ctx: &RunContext, coords: &ResourceCoordinates, timeout: Duration) -> FluxrResult<()> {
        let cfg = self.config;
        let start = Instant::now();
        let deadline = start + timeout;
        let mut poll = interval_at(start + cfg.poll_interval, cfg.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut status = interval_at(start + cfg.status_interval, cfg.status_interval);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_error_report = start;

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(FluxrError::Cancelled(ctx.cause())),
                _ = poll.tick() => {
                    if Instant::now() > deadline {
                        let snap = guarded(ctx, self.prober.probe_summary(coords)).await?;
                        self.reporter.status(&format!("Timeout reached. Last known status: {}", snap.summary));
                        return Err(FluxrError::Timeout(self.target.kind));
                    }
                    match guarded(ctx, self.prober.probe_ready(coords)).await? {
                        Ok(true) => return Ok(()),
                        Ok(false) => {}
                        Err(e) => {
                            counter!("fluxr_probe_errors_total", 1u64);
                            if last_error_report.elapsed() > cfg.error_report_interval {
                                self.reporter.status(&format!("Unable to check status: {} (will retry)", e));
                                last_error_report = Instant::now();
                            } else {
                                debug!(error = %e, "readiness probe failed");
                            }
                        }
                    }
                }
                _ = status.tick() => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(start);
                    let remaining = deadline.saturating_duration_since(now);
                    let snap = guarded(ctx, self.prober.probe_summary(coords)).await?;
                    self.reporter.status(&format!(
                        "Still waiting... (elapsed: {}, remaining: {})",
                        format_duration(elapsed),
                        format_duration(remaining)
                    ));
                    self.reporter.status(&format!("Current status: {}", snap.summary));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_durations_like_progress_lines() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(290)), "5m");
        assert_eq!(format_duration(Duration::from_secs(60)), "1m");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1.5h");
    }

    #[test]
    fn state_of_results() {
        use fluxr_core::{CancelCause, ResourceKind};
        assert_eq!(WaitState::of(&Ok(())), WaitState::Ready);
        assert_eq!(WaitState::of(&Err(FluxrError::Timeout(ResourceKind::HelmRelease))), WaitState::TimedOut);
        assert_eq!(WaitState::of(&Err(FluxrError::Cancelled(CancelCause::Interrupted))), WaitState::Cancelled);
        assert_eq!(WaitState::of(&Err(FluxrError::Resolution("x".into()))), WaitState::FatalResolutionError);
    }
}
