use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing::{info, warn};

use fluxr_core::{FluxrError, FluxrResult, ResourceKind, WatchTarget};
use fluxr_kubehub::{ClusterApi, KubeClusterApi};
use fluxr_ops::{run_trigger, TriggerCommand, TriggerExit};
use fluxr_wait::{
    EventDeduplicator, InterruptAction, InterruptCoordinator, RunContext, WaitConfig, WaitEngine, FORCED_EXIT_CODE,
    INTERRUPT_WINDOW,
};

mod output;

use output::Terminal;

#[derive(Parser, Debug)]
#[command(name = "fluxrctl", version, about = "Reconcile a Flux resource and wait until it is Ready")]
struct Cli {
    /// Resource kind: kustomization, helmrelease or source
    #[arg(long)]
    kind: String,

    /// Resource name
    #[arg(long)]
    name: String,

    /// Resource namespace
    #[arg(short = 'n', long, default_value = "flux-system")]
    namespace: String,

    /// Wait for the resource to become Ready (`--wait=false` to only trigger)
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_value_t = true, default_missing_value = "true")]
    wait: bool,

    /// How long to wait, e.g. 90s, 5m, 1h30m
    #[arg(long, default_value = "5m", value_parser = parse_timeout)]
    timeout: Duration,

    /// Source type when --kind=source: git or oci
    #[arg(long = "source-type", default_value = "git")]
    source_type: String,

    /// Disable colored output
    #[arg(long = "no-color", action = ArgAction::SetTrue)]
    no_color: bool,
}

/// Go-style durations: one or more `<number><unit>` pairs, units `ms`, `s`, `m`, `h`.
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    let invalid = || format!("invalid duration '{}'", s);
    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
        if num_len == 0 {
            return Err(invalid());
        }
        let value = f64::from_str(&rest[..num_len]).map_err(|_| invalid())?;
        let after = &rest[num_len..];
        let unit_len = after.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(after.len());
        let scale = match &after[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(format!("missing unit in duration '{}'", s)),
            unit => return Err(format!("unknown unit '{}' in duration '{}'", unit, s)),
        };
        total += Duration::from_secs_f64(value * scale);
        rest = &after[unit_len..];
    }
    Ok(total)
}

fn init_tracing() {
    let env = std::env::var("FLUXR_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FLUXR_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FLUXR_METRICS_ADDR; expected host:port");
        }
    }
}

fn on_interrupt(coordinator: &InterruptCoordinator, ctx: &RunContext) {
    match coordinator.handle(ctx) {
        InterruptAction::Cancel => eprintln!(
            "\n⚠️  Interrupt received. Cancelling... (Press Ctrl+C again within {}s to force exit)",
            INTERRUPT_WINDOW.as_secs()
        ),
        InterruptAction::ForceExit => {
            eprintln!("\n⚠️  Force exit requested. Exiting immediately.");
            std::process::exit(FORCED_EXIT_CODE);
        }
    }
}

#[cfg(unix)]
async fn listen_for_interrupts(coordinator: InterruptCoordinator, ctx: RunContext) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        on_interrupt(&coordinator, &ctx);
    }
}

#[cfg(not(unix))]
async fn listen_for_interrupts(coordinator: InterruptCoordinator, ctx: RunContext) -> std::io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        on_interrupt(&coordinator, &ctx);
    }
}

fn spawn_interrupt_listener(ctx: RunContext) {
    tokio::spawn(async move {
        if let Err(e) = listen_for_interrupts(InterruptCoordinator::new(), ctx).await {
            warn!(error = %e, "signal handler unavailable");
        }
    });
}

/// Trigger the reconciliation, then wait for it if asked to.
async fn reconcile(
    cli: &Cli,
    ctx: &RunContext,
    target: &WatchTarget,
    cmd: &TriggerCommand,
    api: Option<Arc<dyn ClusterApi>>,
    term: Arc<Terminal>,
) -> FluxrResult<()> {
    term.command(&cmd.command_line());
    match run_trigger(cmd, ctx.child_token(), term.clone()).await {
        Ok(TriggerExit::Success) => {}
        // flux has already explained itself on stderr
        Ok(TriggerExit::Failed { code }) => return Err(FluxrError::TriggerFailed { code }),
        Ok(TriggerExit::Cancelled) => {
            let err = FluxrError::Cancelled(ctx.cause());
            eprintln!("Error running flux: {}", err);
            return Err(err);
        }
        Err(e) => {
            eprintln!("Error starting flux: {:#}", e);
            return Err(FluxrError::TriggerFailed { code: 1 });
        }
    }
    if !cli.wait {
        return Ok(());
    }

    term.waiting(target.kind);
    let result = match api {
        Some(api) => {
            WaitEngine::new(api, target.clone(), term.clone())
                .with_config(WaitConfig::from_env())
                .wait_for_ready(ctx, cli.timeout)
                .await
        }
        None => Err(FluxrError::Resolution("no Kubernetes client available".to_string())),
    };
    match &result {
        Ok(()) => term.success(target.kind),
        Err(e) => term.error(&format!("Reconciliation failed or timed out: {}", e)),
    }
    result
}

async fn run(cli: Cli) -> FluxrResult<()> {
    let kind = ResourceKind::parse(&cli.kind, &cli.source_type).map_err(|e| {
        eprintln!("Error: {}", e);
        e
    })?;
    let target = WatchTarget::new(kind, cli.name.clone(), cli.namespace.clone());
    let term = Arc::new(Terminal::detect(cli.no_color));
    info!(resource = %target, timeout = ?cli.timeout, wait = cli.wait, "reconcile requested");

    let ctx = RunContext::with_timeout(cli.timeout);
    spawn_interrupt_listener(ctx.clone());

    let api = match KubeClusterApi::try_default().await {
        Ok(api) => Some(Arc::new(api) as Arc<dyn ClusterApi>),
        Err(e) => {
            warn!(error = %e, "kube client unavailable");
            eprintln!("Warning: Could not start event monitoring: {:#}", e);
            None
        }
    };

    let watcher_stop = ctx.child_token();
    let watcher = api
        .clone()
        .map(|api| Arc::new(EventDeduplicator::new(api, target.clone(), term.clone())).spawn(watcher_stop.clone()));

    let cmd = TriggerCommand::reconcile(&target);
    let result = reconcile(&cli, &ctx, &target, &cmd, api, term).await;

    watcher_stop.cancel();
    if let Some(handle) = watcher {
        let _ = handle.await;
    }
    result
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    init_tracing();
    init_metrics();

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => e.exit_code(),
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("fluxrctl").chain(args.iter().copied()))
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults() {
        let cli = parse(&["--kind", "kustomization", "--name", "app"]).unwrap();
        assert_eq!(cli.namespace, "flux-system");
        assert!(cli.wait);
        assert_eq!(cli.timeout, Duration::from_secs(300));
        assert_eq!(cli.source_type, "git");
        assert!(!cli.no_color);
    }

    #[test]
    fn wait_can_be_disabled() {
        let cli = parse(&["--kind", "helmrelease", "--name", "podinfo", "--wait=false"]).unwrap();
        assert!(!cli.wait);
        let cli = parse(&["--kind", "helmrelease", "--name", "podinfo", "--wait"]).unwrap();
        assert!(cli.wait);
    }

    #[test]
    fn source_flags() {
        let cli = parse(&["--kind", "source", "--source-type", "oci", "--name", "manifests", "-n", "apps", "--timeout", "90s"])
            .unwrap();
        assert_eq!(cli.namespace, "apps");
        assert_eq!(cli.timeout, Duration::from_secs(90));
        assert_eq!(ResourceKind::parse(&cli.kind, &cli.source_type).unwrap(), ResourceKind::OciSource);
    }

    #[test]
    fn kind_and_name_are_required() {
        assert!(parse(&["--kind", "kustomization"]).is_err());
        assert!(parse(&["--name", "app"]).is_err());
    }

    #[test]
    fn parses_timeouts() {
        assert_eq!(parse_timeout("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_timeout("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_timeout("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_timeout("2m30s").unwrap(), Duration::from_secs(150));
        assert_eq!(parse_timeout("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_timeout("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_timeout("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn rejects_bad_timeouts() {
        assert!(parse_timeout("").is_err());
        assert!(parse_timeout("300").is_err());
        assert!(parse_timeout("5x").is_err());
        assert!(parse_timeout("m5").is_err());
        assert!(parse_timeout("1..5s").is_err());
    }

    /// Cluster that counts reads and always reports `Ready=True`.
    #[derive(Default)]
    struct CountingCluster {
        gets: std::sync::atomic::AtomicUsize,
    }

    impl CountingCluster {
        fn gets(&self) -> usize {
            self.gets.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ClusterApi for CountingCluster {
        async fn get_object(
            &self,
            _coords: &fluxr_core::ResourceCoordinates,
            _ns: &str,
            _name: &str,
        ) -> anyhow::Result<serde_json::Value> {
            self.gets.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(serde_json::json!({ "status": { "conditions": [{ "type": "Ready", "status": "True" }] } }))
        }

        async fn list_events(&self, _ns: &str, _name: &str, _limit: u32) -> anyhow::Result<Vec<fluxr_core::EventRecord>> {
            Ok(Vec::new())
        }
    }

    fn app() -> WatchTarget {
        WatchTarget::new(ResourceKind::Kustomization, "app", "flux-system")
    }

    fn sh(script: &str) -> TriggerCommand {
        TriggerCommand::new("sh", vec!["-c".into(), script.into()])
    }

    async fn reconcile_with(
        args: &[&str],
        ctx: &RunContext,
        cmd: &TriggerCommand,
        cluster: Option<Arc<CountingCluster>>,
    ) -> FluxrResult<()> {
        let mut full = vec!["--kind", "kustomization", "--name", "app"];
        full.extend_from_slice(args);
        let cli = parse(&full).unwrap();
        let api = cluster.map(|c| c as Arc<dyn ClusterApi>);
        reconcile(&cli, ctx, &app(), cmd, api, Arc::new(Terminal::new(false))).await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_trigger_skips_the_wait() {
        let cluster = Arc::new(CountingCluster::default());
        let err = reconcile_with(&[], &RunContext::new(), &sh("exit 3"), Some(cluster.clone())).await.unwrap_err();
        assert!(matches!(err, FluxrError::TriggerFailed { code: 3 }));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(cluster.gets(), 0);
    }

    #[tokio::test]
    async fn trigger_that_cannot_start_exits_one() {
        let cluster = Arc::new(CountingCluster::default());
        let cmd = TriggerCommand::new("fluxr-definitely-not-installed", vec![]);
        let err = reconcile_with(&[], &RunContext::new(), &cmd, Some(cluster.clone())).await.unwrap_err();
        assert!(matches!(err, FluxrError::TriggerFailed { code: 1 }));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(cluster.gets(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_trigger_skips_the_wait() {
        let cluster = Arc::new(CountingCluster::default());
        let ctx = RunContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel(fluxr_core::CancelCause::Interrupted);
        });
        let err = reconcile_with(&[], &ctx, &sh("exec sleep 30"), Some(cluster.clone())).await.unwrap_err();
        assert!(matches!(err, FluxrError::Cancelled(fluxr_core::CancelCause::Interrupted)));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(cluster.gets(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn waiting_without_a_client_is_a_resolution_error() {
        let err = reconcile_with(&[], &RunContext::new(), &sh("exit 0"), None).await.unwrap_err();
        assert!(matches!(err, FluxrError::Resolution(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn no_wait_succeeds_after_the_trigger() {
        let cluster = Arc::new(CountingCluster::default());
        reconcile_with(&["--wait=false"], &RunContext::new(), &sh("exit 0"), Some(cluster.clone())).await.unwrap();
        assert_eq!(cluster.gets(), 0);
        reconcile_with(&["--wait=false"], &RunContext::new(), &sh("exit 0"), None).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_trigger_then_waits_for_ready() {
        let cluster = Arc::new(CountingCluster::default());
        reconcile_with(&[], &RunContext::new(), &sh("exit 0"), Some(cluster.clone())).await.unwrap();
        assert!(cluster.gets() >= 1);
    }
}
