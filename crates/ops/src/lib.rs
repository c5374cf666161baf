//! fluxr ops: trigger a reconciliation with the `flux` CLI.
//! Stdout is relayed verbatim, stderr is scanned for client-go warnings.

#![forbid(unsafe_code)]

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fluxr_core::{ResourceKind, Reporter, WatchTarget};

/// client-go warning, e.g. `W1123 13:40:53.387945   52532 warnings.go:70] message`
static KUBE_WARNING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^W\d+\s+\d+:\d+:\d+\.\d+\s+\d+\s+\S+:\d+\]\s+(.+)$").expect("static regex")
});

/// How long relays may keep draining after the child was killed.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// A fully built `flux` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TriggerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }

    /// `flux reconcile …` for the target. The binary can be overridden with `FLUXR_FLUX_BIN`.
    pub fn reconcile(target: &WatchTarget) -> Self {
        let program = std::env::var("FLUXR_FLUX_BIN").unwrap_or_else(|_| "flux".to_string());
        Self::new(program, reconcile_args(target))
    }

    /// Program and arguments joined by spaces, for echoing to the operator.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn reconcile_args(target: &WatchTarget) -> Vec<String> {
    let mut args = vec!["reconcile".to_string()];
    match target.kind.source_type() {
        Some(st) => {
            args.push("source".into());
            args.push(st.as_str().into());
        }
        None => args.push(target.kind.label().into()),
    }
    args.push(target.name.clone());
    args.push("-n".into());
    args.push(target.namespace.clone());
    if matches!(target.kind, ResourceKind::Kustomization | ResourceKind::HelmRelease) {
        args.push("--with-source".into());
    }
    args
}

/// Classification of one stderr line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrLine<'a> {
    /// client-go warning; carries the message part only
    Warning(&'a str),
    Passthrough(&'a str),
    Blank,
}

pub fn classify_stderr(line: &str) -> StderrLine<'_> {
    if let Some(m) = KUBE_WARNING.captures(line).and_then(|c| c.get(1)) {
        return StderrLine::Warning(m.as_str());
    }
    if line.trim().is_empty() {
        StderrLine::Blank
    } else {
        StderrLine::Passthrough(line)
    }
}

/// How the trigger ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerExit {
    Success,
    /// Non-zero exit; killed-by-signal maps to 1.
    Failed { code: i32 },
    Cancelled,
}

/// Hand every line of `reader` to `sink` until EOF. Lines are split on raw
/// bytes and decoded lossily, so invalid UTF-8 never stops the pipe from draining.
async fn relay_lines<R, F>(reader: R, stream: &'static str, mut sink: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink(line.trim_end_matches(|c: char| c == '\n' || c == '\r'));
            }
            Err(e) => {
                warn!(stream, error = %e, "relay error");
                break;
            }
        }
    }
}

async fn relay_stdout<R: AsyncRead + Unpin>(reader: R, reporter: Arc<dyn Reporter>) {
    relay_lines(reader, "stdout", |line| reporter.stdout_line(line)).await
}

async fn relay_stderr<R: AsyncRead + Unpin>(reader: R, reporter: Arc<dyn Reporter>) {
    relay_lines(reader, "stderr", |line| match classify_stderr(line) {
        StderrLine::Warning(msg) => reporter.warning(msg),
        StderrLine::Passthrough(l) => reporter.stderr_line(l),
        StderrLine::Blank => {}
    })
    .await
}

/// Run the trigger to completion, or kill it once `cancel` fires.
///
/// Stderr is fully drained before the exit status is returned. Failing to
/// spawn the program is an `Err`.
pub async fn run_trigger(cmd: &TriggerCommand, cancel: CancellationToken, reporter: Arc<dyn Reporter>) -> Result<TriggerExit> {
    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("starting {}", cmd.program))?;
    info!(cmd = %cmd.command_line(), pid = ?child.id(), "trigger started");

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("failed to capture stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("failed to capture stderr"))?;
    let out_task = tokio::spawn(relay_stdout(stdout, reporter.clone()));
    let err_task = tokio::spawn(relay_stderr(stderr, reporter));

    let status = tokio::select! {
        status = child.wait() => Some(status.context("waiting for trigger")?),
        _ = cancel.cancelled() => {
            warn!(cmd = %cmd.program, "cancelled; killing trigger");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "kill failed");
            }
            None
        }
    };

    let exit = match status {
        Some(status) => {
            let _ = err_task.await;
            let _ = out_task.await;
            if status.success() {
                TriggerExit::Success
            } else {
                TriggerExit::Failed { code: status.code().unwrap_or(1) }
            }
        }
        None => {
            let _ = tokio::time::timeout(DRAIN_GRACE, err_task).await;
            out_task.abort();
            TriggerExit::Cancelled
        }
    };
    let result = match exit {
        TriggerExit::Success => "success",
        TriggerExit::Failed { .. } => "failed",
        TriggerExit::Cancelled => "cancelled",
    };
    counter!("fluxr_trigger_runs_total", 1u64, "result" => result);
    info!(?exit, "trigger finished");
    Ok(exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxr_core::testing::{Line, RecordingReporter};

    #[test]
    fn reconcile_args_for_kustomization() {
        let t = WatchTarget::new(ResourceKind::Kustomization, "app", "flux-system");
        let cmd = TriggerCommand::new("flux", reconcile_args(&t));
        assert_eq!(cmd.command_line(), "flux reconcile kustomization app -n flux-system --with-source");
    }

    #[test]
    fn reconcile_args_for_helmrelease() {
        let t = WatchTarget::new(ResourceKind::HelmRelease, "podinfo", "apps");
        assert_eq!(
            reconcile_args(&t),
            vec!["reconcile", "helmrelease", "podinfo", "-n", "apps", "--with-source"]
        );
    }

    #[test]
    fn reconcile_args_for_sources() {
        let t = WatchTarget::new(ResourceKind::OciSource, "manifests", "flux-system");
        assert_eq!(reconcile_args(&t), vec!["reconcile", "source", "oci", "manifests", "-n", "flux-system"]);
        let t = WatchTarget::new(ResourceKind::GitSource, "flux-system", "flux-system");
        assert_eq!(reconcile_args(&t), vec!["reconcile", "source", "git", "flux-system", "-n", "flux-system"]);
    }

    #[test]
    fn classifies_client_go_warnings() {
        let line = "W1123 13:40:53.387945   52532 warnings.go:70] v2beta1 HelmRelease is deprecated, upgrade to v2";
        assert_eq!(classify_stderr(line), StderrLine::Warning("v2beta1 HelmRelease is deprecated, upgrade to v2"));
    }

    #[test]
    fn other_stderr_passes_through() {
        assert_eq!(classify_stderr("✗ reconciliation failed"), StderrLine::Passthrough("✗ reconciliation failed"));
        // info-level klog lines are not reformatted
        let info = "I1123 13:40:53.387945   52532 loader.go:10] loaded";
        assert_eq!(classify_stderr(info), StderrLine::Passthrough(info));
        assert_eq!(classify_stderr("   "), StderrLine::Blank);
        assert_eq!(classify_stderr(""), StderrLine::Blank);
    }

    #[tokio::test]
    async fn stderr_relay_reformats_and_drops_blanks() {
        let rec = Arc::new(RecordingReporter::new());
        let input: &[u8] = b"W0101 00:00:01.000001 1 warnings.go:70] deprecated\n\n\xe2\x97\x8e waiting\nlast";
        relay_stderr(input, rec.clone()).await;
        assert_eq!(
            rec.lines(),
            vec![
                Line::Warning("deprecated".into()),
                Line::Stderr("◎ waiting".into()),
                Line::Stderr("last".into()),
            ]
        );
    }

    #[tokio::test]
    async fn stderr_relay_survives_invalid_utf8() {
        let rec = Arc::new(RecordingReporter::new());
        let input: &[u8] = b"bad \xff line\n\xe2\x9c\x97 real failure\r\n";
        relay_stderr(input, rec.clone()).await;
        assert_eq!(
            rec.lines(),
            vec![Line::Stderr("bad \u{fffd} line".into()), Line::Stderr("✗ real failure".into())]
        );
    }

    #[tokio::test]
    async fn stdout_relay_survives_invalid_utf8() {
        let rec = Arc::new(RecordingReporter::new());
        let input: &[u8] = b"caf\xe9\nafter\n";
        relay_stdout(input, rec.clone()).await;
        assert_eq!(rec.lines(), vec![Line::Stdout("caf\u{fffd}".into()), Line::Stdout("after".into())]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_utf8_does_not_fail_a_successful_trigger() {
        let rec = Arc::new(RecordingReporter::new());
        let script = r"printf 'caf\351\n'; echo after; echo err-after >&2; exit 0";
        let cmd = TriggerCommand::new("sh", vec!["-c".into(), script.into()]);
        let exit = run_trigger(&cmd, CancellationToken::new(), rec.clone()).await.unwrap();
        assert_eq!(exit, TriggerExit::Success);
        let lines = rec.lines();
        assert!(lines.contains(&Line::Stdout("caf\u{fffd}".into())), "{:?}", lines);
        assert!(lines.contains(&Line::Stdout("after".into())));
        assert!(lines.contains(&Line::Stderr("err-after".into())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn propagates_exit_code_after_draining_stderr() {
        let rec = Arc::new(RecordingReporter::new());
        let script = "echo '► annotating Kustomization app'; \
                      echo 'W1123 13:40:53.387945   52532 warnings.go:70] slow down' >&2; \
                      echo '✗ boom' >&2; exit 3";
        let cmd = TriggerCommand::new("sh", vec!["-c".into(), script.into()]);
        let exit = run_trigger(&cmd, CancellationToken::new(), rec.clone()).await.unwrap();
        assert_eq!(exit, TriggerExit::Failed { code: 3 });
        let lines = rec.lines();
        assert!(lines.contains(&Line::Stdout("► annotating Kustomization app".into())));
        assert!(lines.contains(&Line::Warning("slow down".into())));
        assert!(lines.contains(&Line::Stderr("✗ boom".into())));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn success_exit() {
        let rec = Arc::new(RecordingReporter::new());
        let cmd = TriggerCommand::new("sh", vec!["-c".into(), "echo ok".into()]);
        let exit = run_trigger(&cmd, CancellationToken::new(), rec.clone()).await.unwrap();
        assert_eq!(exit, TriggerExit::Success);
        assert_eq!(rec.lines(), vec![Line::Stdout("ok".into())]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let rec = Arc::new(RecordingReporter::new());
        let cancel = CancellationToken::new();
        let cmd = TriggerCommand::new("sh", vec!["-c".into(), "exec sleep 30".into()]);
        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            c2.cancel();
        });
        let exit = tokio::time::timeout(Duration::from_secs(5), run_trigger(&cmd, cancel, rec))
            .await
            .expect("trigger did not stop")
            .unwrap();
        assert_eq!(exit, TriggerExit::Cancelled);
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let rec = Arc::new(RecordingReporter::new());
        let cmd = TriggerCommand::new("fluxr-definitely-not-installed", vec![]);
        assert!(run_trigger(&cmd, CancellationToken::new(), rec).await.is_err());
    }
}
