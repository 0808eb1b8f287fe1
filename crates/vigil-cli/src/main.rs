//! Vigil CLI - platform liveness for agent session hooks
//!
//! Usage:
//!   vigil init                          Write default config and state dir
//!   vigil probe --session N             Probe closed/half-open platforms
//!   vigil repair                        Repair open circuits
//!   vigil sweep                         Recheck defunct platforms
//!   vigil tick --session N              Run whichever jobs are due
//!   vigil status                        Show circuits
//!   vigil eligible [--claim]            List usable platforms
//!   vigil trends [--hours H]            Uptime trends from probe history
//!
//! Exit codes: 0 completed, 1 failure, 124 probe budget exceeded.
//! Logs go to stderr; stdout carries the (cacheable) report.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vigil_core::fail_open::fail_open;
use vigil_core::{
    eligible_platforms, CachedRun, CircuitStatus, Eligibility, IntervalScheduler, JobSchedule,
    Scheduler, SessionClock, StatusCounts, VigilConfig, EXIT_FAILURE, EXIT_OK, EXIT_TIMEOUT,
};
use vigil_probe::{BatchLimits, HttpProber, LivenessProbe};
use vigil_recovery::{DefunctRechecker, RecoveryWorkflow, SweepSummary};
use vigil_store::{
    analyze_trends, CircuitStore, HistoryStore, ProbeCache, ScheduleState, Trend, TrendReport,
    MAX_TREND_HOURS,
};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(author, version, about = "Platform liveness and circuit breaking for agent sessions")]
struct Cli {
    /// Directory containing `.vigil/`
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config and create the state directory
    Init,

    /// Probe every closed and half-open platform
    Probe {
        /// Monotonic session counter
        #[arg(long)]
        session: u64,

        #[command(flatten)]
        cache: CacheArgs,
    },

    /// Repair open circuits, demoting platforms that never recover
    Repair {
        #[arg(long, default_value = "0")]
        session: u64,

        #[command(flatten)]
        cache: CacheArgs,
    },

    /// Give defunct platforms one more probe
    Sweep {
        #[arg(long, default_value = "0")]
        session: u64,
    },

    /// Run the probe, repair and sweep jobs that are due this session
    Tick {
        #[arg(long)]
        session: u64,

        /// Session type tag (jobs may be restricted to some types)
        #[arg(long)]
        session_type: Option<String>,
    },

    /// Show the circuit of every known platform
    Status {
        /// Print the raw circuit snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// List platforms consumers may use under the configured policy
    Eligible {
        /// Claim the single trial of returned half-open platforms
        #[arg(long)]
        claim: bool,

        #[arg(long)]
        json: bool,
    },

    /// Uptime trends from the probe history
    Trends {
        /// Lookback window (at most one year)
        #[arg(
            long,
            default_value = "24",
            value_parser = clap::value_parser!(u64).range(1..=MAX_TREND_HOURS)
        )]
        hours: u64,

        /// Only platforms whose id contains this
        #[arg(long)]
        platform: Option<String>,

        #[arg(long)]
        json: bool,
    },
}

/// Route a run through the probe cache
#[derive(Args, Debug, Clone, Default)]
struct CacheArgs {
    /// Cache key of this use site; replays a fresh run instead of probing
    #[arg(long)]
    cache_key: Option<String>,

    /// Cache TTL (defaults to `cache.default_ttl_minutes`)
    #[arg(long, requires = "cache_key")]
    ttl_minutes: Option<u64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("vigil: failed to install logger: {}", e);
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Init => cmd_init(&cli.root),
        command => {
            let ws = Workspace::load(&cli.root)?;
            dispatch(&ws, command).await
        }
    }
}

async fn dispatch(ws: &Workspace, command: Commands) -> Result<i32> {
    match command {
        Commands::Init => cmd_init(&ws.root),
        Commands::Probe { session, cache } => cmd_probe(ws, session, &cache).await,
        Commands::Repair { session, cache } => cmd_repair(ws, session, &cache).await,
        Commands::Sweep { session } => cmd_sweep(ws, session).await,
        Commands::Tick {
            session,
            session_type,
        } => cmd_tick(ws, session, session_type.as_deref()).await,
        Commands::Status { json } => cmd_status(ws, json),
        Commands::Eligible { claim, json } => cmd_eligible(ws, claim, json),
        Commands::Trends {
            hours,
            platform,
            json,
        } => cmd_trends(ws, hours, platform.as_deref(), json),
    }
}

/// Loaded config plus the state files it points at
struct Workspace {
    root: PathBuf,
    config: VigilConfig,
    state_dir: PathBuf,
}

impl Workspace {
    fn load(root: &Path) -> Result<Self> {
        let config = VigilConfig::load_or_default(root).with_context(|| {
            format!(
                "Failed to load {}",
                VigilConfig::config_path(root).display()
            )
        })?;
        let state_dir = config.state_dir(root);
        debug!(state_dir = %state_dir.display(), platforms = config.platforms.len(), "Loaded config");
        Ok(Self {
            root: root.to_path_buf(),
            config,
            state_dir,
        })
    }

    fn lock_timeout(&self) -> Duration {
        self.config.store.lock_timeout()
    }

    fn circuits(&self) -> CircuitStore {
        CircuitStore::in_dir(
            &self.state_dir,
            self.config.thresholds.clone(),
            self.lock_timeout(),
        )
    }

    fn cache(&self) -> ProbeCache {
        ProbeCache::in_dir(&self.state_dir, self.lock_timeout())
    }

    fn history(&self) -> HistoryStore {
        HistoryStore::in_dir(
            &self.state_dir,
            self.config.history.max_entries,
            self.lock_timeout(),
        )
    }

    fn schedule(&self) -> ScheduleState {
        ScheduleState::in_dir(&self.state_dir, self.lock_timeout())
    }

    fn limits(&self) -> BatchLimits {
        BatchLimits::from(&self.config.probe)
    }

    fn prober(&self) -> Result<HttpProber> {
        HttpProber::new(&self.config.probe).context("Failed to build HTTP prober")
    }
}

fn cmd_init(root: &Path) -> Result<i32> {
    let config_path = VigilConfig::config_path(root);
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
    } else {
        let written = VigilConfig::write_default(root).context("Failed to write default config")?;
        println!("Created {}", written.display());
    }

    let config = VigilConfig::load_or_default(root)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let state_dir = config.state_dir(root);
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;
    println!("State directory: {}", state_dir.display());

    if config.platforms.is_empty() {
        println!("\nAdd platforms to track, e.g.:");
        println!("  [[platforms]]");
        println!("  id = \"chatr\"");
        println!("  url = \"https://chatr.example\"");
        println!("  health_paths = [\"/agent.json\", \"/.well-known/agent.json\"]");
    }
    Ok(EXIT_OK)
}

async fn cmd_probe(ws: &Workspace, session: u64, cache: &CacheArgs) -> Result<i32> {
    let liveness =
        LivenessProbe::new(ws.prober()?, ws.circuits(), ws.limits()).with_history(ws.history());
    let liveness = &liveness;
    let platforms = ws.config.platforms.as_slice();

    Ok(run_cached(ws, cache, session, || async move {
        let report = liveness.probe_all(platforms, session).await;
        CachedRun::new(report.render(), report.exit_code())
    })
    .await)
}

async fn cmd_repair(ws: &Workspace, session: u64, cache: &CacheArgs) -> Result<i32> {
    let workflow = RecoveryWorkflow::new(ws.prober()?, ws.circuits(), ws.limits());
    let workflow = &workflow;
    let platforms = ws.config.platforms.as_slice();

    Ok(run_cached(ws, cache, session, || async move {
        let summary = workflow.repair_open_circuits(platforms).await;
        CachedRun::new(summary.render(), summary.exit_code())
    })
    .await)
}

async fn cmd_sweep(ws: &Workspace, session: u64) -> Result<i32> {
    let store = ws.circuits();

    // Nothing defunct: answer without building an HTTP client
    if store.ids_with_status(CircuitStatus::Defunct).is_empty() {
        let idle = SweepSummary {
            counts: StatusCounts::from_snapshot(&store.snapshot()),
            ..Default::default()
        };
        println!("{}", idle.render());
        return Ok(EXIT_OK);
    }

    info!(session, "Running defunct sweep");
    let sweeper = DefunctRechecker::new(ws.prober()?, store, ws.limits());
    let summary = sweeper.sweep_defunct(&ws.config.platforms).await;
    println!("{}", summary.render());
    Ok(summary.exit_code())
}

/// Execute `job` directly, or through the probe cache when a key is given
async fn run_cached<F, Fut>(ws: &Workspace, cache: &CacheArgs, session: u64, job: F) -> i32
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = CachedRun>,
{
    let Some(key) = cache.cache_key.as_deref() else {
        let run = job().await;
        println!("{}", run.output);
        warn_if_stale(&run);
        return run.exit_code;
    };

    let ttl_minutes = cache
        .ttl_minutes
        .unwrap_or(ws.config.cache.default_ttl_minutes);
    let ttl = Duration::from_secs(ttl_minutes * 60);
    let timeout = ws.config.probe.total_budget() + ws.config.probe.per_probe_timeout();

    let outcome = ws.cache().run(key, ttl, session, timeout, job).await;
    println!("{}", outcome.payload().output);
    if outcome.from_cache {
        let age = outcome.entry.age(Utc::now());
        let counts = StatusCounts::from_snapshot(&ws.circuits().snapshot());
        println!(
            "[cached: {} from session {}, {}m ago; circuits now {}]",
            key,
            outcome.entry.session_id,
            age.num_minutes(),
            counts
        );
    }
    warn_if_stale(outcome.payload());
    outcome.payload().exit_code
}

fn warn_if_stale(run: &CachedRun) {
    if run.timed_out() {
        warn!("Probe budget exceeded; used cached/stale state");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Probe,
    Repair,
    Sweep,
}

impl Job {
    const ALL: [Job; 3] = [Job::Probe, Job::Repair, Job::Sweep];

    fn name(&self) -> &'static str {
        match self {
            Job::Probe => "probe",
            Job::Repair => "repair",
            Job::Sweep => "sweep",
        }
    }

    fn schedule<'a>(&self, config: &'a VigilConfig) -> &'a JobSchedule {
        match self {
            Job::Probe => &config.schedule.probe,
            Job::Repair => &config.schedule.repair,
            Job::Sweep => &config.schedule.sweep,
        }
    }
}

async fn cmd_tick(ws: &Workspace, session: u64, session_type: Option<&str>) -> Result<i32> {
    Ok(run_due_jobs(ws, session, session_type, |job| async move {
        match job {
            Job::Probe => cmd_probe(ws, session, &CacheArgs::default()).await,
            Job::Repair => cmd_repair(ws, session, &CacheArgs::default()).await,
            Job::Sweep => cmd_sweep(ws, session).await,
        }
    })
    .await)
}

/// Run every due job in order
///
/// A job that fails is logged and left unmarked, so it is due again next
/// session; the remaining jobs still run. Any failure makes the tick exit
/// with `EXIT_FAILURE`, otherwise a budget overrun exits with `EXIT_TIMEOUT`.
async fn run_due_jobs<F, Fut>(
    ws: &Workspace,
    session: u64,
    session_type: Option<&str>,
    mut run_job: F,
) -> i32
where
    F: FnMut(Job) -> Fut,
    Fut: Future<Output = Result<i32>>,
{
    let scheduler = IntervalScheduler;
    let state = ws.schedule();
    let clock = SessionClock::new(Utc::now(), session);
    let mut failed = false;
    let mut timed_out = false;
    let mut ran = 0;

    for job in Job::ALL {
        let schedule = job.schedule(&ws.config);
        if !schedule.applies_to(session_type) {
            debug!(job = job.name(), ?session_type, "Not scheduled for this session type");
            continue;
        }

        let last = state.last_run(job.name());
        if !scheduler.should_run(&clock, last.as_ref(), schedule.interval) {
            debug!(
                job = job.name(),
                session,
                last_session = last.map(|m| m.session_id),
                interval = %schedule.interval,
                "Not due"
            );
            continue;
        }

        info!(job = job.name(), session, "Running scheduled job");
        ran += 1;
        match run_job(job).await {
            Ok(job_code) => {
                fail_open("schedule_mark", || state.mark(job.name(), clock.mark()));
                timed_out |= job_code == EXIT_TIMEOUT;
            }
            Err(e) => {
                error!(job = job.name(), "Scheduled job failed: {:#}", e);
                failed = true;
            }
        }
    }

    if ran == 0 {
        println!("tick (session {}): nothing due", session);
    }
    if failed {
        EXIT_FAILURE
    } else if timed_out {
        EXIT_TIMEOUT
    } else {
        EXIT_OK
    }
}

fn cmd_status(ws: &Workspace, json: bool) -> Result<i32> {
    let snapshot = ws.circuits().snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(EXIT_OK);
    }

    println!(
        "{:<20} {:<10} {:>8} {:<22} {}",
        "PLATFORM", "STATUS", "FAILURES", "LAST PROBE", "LAST FAILURE"
    );
    for platform in &ws.config.platforms {
        if !snapshot.contains_key(&platform.id) {
            println!(
                "{:<20} {:<10} {:>8} {:<22} -",
                platform.id, "closed", 0, "never"
            );
        }
    }
    for circuit in snapshot.values() {
        let last_probe = circuit
            .last_probe_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<20} {:<10} {:>8} {:<22} {}",
            circuit.platform_id,
            circuit.status,
            circuit.failure_count,
            last_probe,
            circuit.last_failure_reason.as_deref().unwrap_or("-")
        );
    }
    println!("\n{}", StatusCounts::from_snapshot(&snapshot));
    Ok(EXIT_OK)
}

fn cmd_eligible(ws: &Workspace, claim: bool, json: bool) -> Result<i32> {
    let store = ws.circuits();
    let snapshot = store.snapshot();
    let mut candidates = eligible_platforms(
        &snapshot,
        ws.config.platforms.iter().map(|p| p.id.as_str()),
        ws.config.policy.half_open,
    );

    if claim {
        let now = Utc::now();
        candidates.retain(|(id, eligibility)| match eligibility {
            Eligibility::Trial => match store.claim_trial(id, now) {
                Ok(claimed) => claimed,
                Err(e) => {
                    warn!(platform = %id, "Could not claim half-open trial: {}", e);
                    false
                }
            },
            _ => true,
        });
    }

    if json {
        let entries: Vec<serde_json::Value> = candidates
            .iter()
            .map(|(id, e)| serde_json::json!({ "platform": id, "eligibility": e }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for (id, e) in &candidates {
            println!("{}\t{}", id, e);
        }
    }
    Ok(EXIT_OK)
}

fn cmd_trends(ws: &Workspace, hours: u64, platform: Option<&str>, json: bool) -> Result<i32> {
    let history = ws.history().load();
    let report = analyze_trends(&history, hours, platform, Utc::now());

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_trends(&report);
    }
    Ok(EXIT_OK)
}

fn print_trends(report: &TrendReport) {
    println!(
        "Uptime trends (last {}h: {} of {} samples)",
        report.period_hours, report.recent_probes, report.total_probes
    );
    if report.platforms.is_empty() {
        println!("No probe history yet");
        return;
    }

    println!(
        "{:<20} {:>7} {:>7} {:<18} {:<5} {}",
        "PLATFORM", "ALL%", "RECENT%", "TREND", "LAST", "HOURLY"
    );
    for (id, t) in &report.platforms {
        let marker = match t.trend {
            Trend::Improving => "+",
            Trend::Declining => "-",
            Trend::Stable => "=",
            Trend::InsufficientData => "?",
        };
        println!(
            "{:<20} {:>7.1} {:>7.1} {:<18} {:<5} {}",
            id,
            t.uptime_all,
            t.uptime_recent,
            format!("{} {}", marker, t.trend),
            t.last_status,
            sparkline(&t.hourly_uptime)
        );
    }
}

/// One character per hourly bucket
fn sparkline(buckets: &[Option<u32>]) -> String {
    buckets
        .iter()
        .map(|b| match b {
            None => ' ',
            Some(100) => '#',
            Some(p) if *p >= 50 => '+',
            Some(0) => '.',
            Some(_) => '-',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cached_probe() {
        let cli = Cli::try_parse_from([
            "vigil",
            "--root",
            "/tmp/agent",
            "probe",
            "--session",
            "42",
            "--cache-key",
            "service-liveness",
            "--ttl-minutes",
            "120",
        ])
        .unwrap();

        assert_eq!(cli.root, PathBuf::from("/tmp/agent"));
        match cli.command {
            Commands::Probe { session, cache } => {
                assert_eq!(session, 42);
                assert_eq!(cache.cache_key.as_deref(), Some("service-liveness"));
                assert_eq!(cache.ttl_minutes, Some(120));
            }
            _ => panic!("expected probe"),
        }
    }

    #[test]
    fn test_ttl_requires_cache_key() {
        assert!(Cli::try_parse_from(["vigil", "repair", "--ttl-minutes", "60"]).is_err());
    }

    #[test]
    fn test_trend_hours_are_bounded() {
        assert!(Cli::try_parse_from(["vigil", "trends", "--hours", "18446744073709551615"]).is_err());
        assert!(Cli::try_parse_from(["vigil", "trends", "--hours", "0"]).is_err());
        assert!(Cli::try_parse_from(["vigil", "trends", "--hours", "168"]).is_ok());
    }

    #[tokio::test]
    async fn test_failing_job_does_not_stop_the_tick() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::load(dir.path()).unwrap();
        let seen = std::sync::Mutex::new(Vec::new());
        let seen_ref = &seen;

        let code = run_due_jobs(&ws, 1, None, |job| async move {
            seen_ref.lock().unwrap().push(job);
            match job {
                Job::Probe => Err(anyhow::anyhow!("Failed to build HTTP prober")),
                Job::Repair => Ok(EXIT_OK),
                Job::Sweep => Ok(EXIT_TIMEOUT),
            }
        })
        .await;

        assert_eq!(code, EXIT_FAILURE);
        assert_eq!(*seen.lock().unwrap(), vec![Job::Probe, Job::Repair, Job::Sweep]);
        let state = ws.schedule();
        assert!(state.last_run("probe").is_none());
        assert!(state.last_run("repair").is_some());
        assert!(state.last_run("sweep").is_some());
    }

    #[test]
    fn test_sparkline() {
        assert_eq!(sparkline(&[None, Some(100), Some(60), Some(10), Some(0)]), " #+-.");
    }
}
