use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use stresslab_error::{Result, StressLabError};
use stresslab_harness::digest::Digest;
use stresslab_harness::export::TelemetryExport;
use stresslab_harness::lab::{DEEP_MIN_SEEDS, DEFAULT_SEEDS, QUICK_SEEDS};
use stresslab_harness::{
    AlertThresholds, Collaborators, MutationRegistry, PipelineRunner, RunnerConfig, StressConfig,
    StressLab, check_alerts, cluster_failures, compare_digests, compute_aggregate_stats,
    generate_digest, render_stress_report, replay_command, write_report,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const DEFAULT_REPORT_PATH: &str = "stress-lab-report.md";
const DEFAULT_LOG_LEVEL: &str = "warn";
const ENV_SEEDS: &str = "STRESS_LAB_SEEDS";
const ENV_JOBS: &str = "STRESS_LAB_JOBS";
const ENV_LOG: &str = "STRESS_LAB_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    seeds: Option<u32>,
    seed: Option<u32>,
    deep: bool,
    quick: bool,
    report_path: PathBuf,
    json_path: Option<PathBuf>,
    digest_path: Option<PathBuf>,
    baseline_path: Option<PathBuf>,
    thresholds_path: Option<PathBuf>,
    jobs: Option<usize>,
    top: Option<usize>,
    log_level: String,
    time_budget: Option<Duration>,
    show_help: bool,
}

impl CliOptions {
    /// Seed count after `--quick`/`--deep` adjustments.
    fn seed_count(&self) -> u32 {
        let base = self
            .seeds
            .unwrap_or(if self.quick { QUICK_SEEDS } else { DEFAULT_SEEDS });
        if self.deep {
            base.max(DEEP_MIN_SEEDS)
        } else {
            base
        }
    }

    fn registry(&self) -> MutationRegistry {
        if self.quick {
            MutationRegistry::quick()
        } else {
            MutationRegistry::standard()
        }
    }

    fn stress_config(&self) -> StressConfig {
        let defaults = StressConfig::default();
        StressConfig {
            seeds: self.seed_count(),
            jobs: self.jobs.unwrap_or(defaults.jobs),
            top_n: self.top.unwrap_or(defaults.top_n),
            time_budget: self.time_budget,
            ..defaults
        }
    }
}

fn main() {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    let exit_code = run(
        std::env::args_os(),
        &|key: &str| std::env::var(key).ok(),
        &mut stdout,
        &mut stderr,
    );
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run<I, W, E>(args: I, env: &dyn Fn(&str) -> Option<String>, out: &mut W, err: &mut E) -> i32
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let options = match parse_args(args, env) {
        Ok(options) => options,
        Err(error) => {
            let _ = writeln!(err, "error: {error}");
            let _ = write_usage(err);
            return error.exit_code();
        }
    };

    if options.show_help {
        if write_usage(out).is_err() {
            return 2;
        }
        return 0;
    }

    init_tracing(&options.log_level);

    let result = match options.seed {
        Some(seed) => run_replay(&options, seed, out),
        None => run_stress(&options, out, err),
    };
    match result {
        Ok(code) => code,
        Err(error) => {
            let _ = writeln!(err, "error: {error}");
            if let Some(hint) = error.suggestion() {
                let _ = writeln!(err, "hint: {hint}");
            }
            error.exit_code()
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    // A second init (tests run the CLI repeatedly in one process) is a no-op.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .try_init();
}

// ── Argument parsing ────────────────────────────────────────────────────

/// Split `--flag=value` into its parts; `--flag` has no inline value.
fn split_flag(arg: &str) -> (&str, Option<&str>) {
    match arg.split_once('=') {
        Some((flag, value)) if flag.starts_with("--") => (flag, Some(value)),
        _ => (arg, None),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| StressLabError::invalid_argument(flag, format!("invalid integer `{value}`")))
}

fn parse_positive<T>(value: &str, flag: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let number: T = parse_number(value, flag)?;
    if number <= T::default() {
        return Err(StressLabError::invalid_argument(
            flag,
            format!("expected a positive integer, got `{value}`"),
        ));
    }
    Ok(number)
}

#[allow(clippy::too_many_lines)]
fn parse_args<I>(args: I, env: &dyn Fn(&str) -> Option<String>) -> Result<CliOptions>
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter();
    let _argv0 = iter.next();

    let mut options = CliOptions {
        seeds: None,
        seed: None,
        deep: false,
        quick: false,
        report_path: PathBuf::from(DEFAULT_REPORT_PATH),
        json_path: None,
        digest_path: None,
        baseline_path: None,
        thresholds_path: None,
        jobs: None,
        top: None,
        log_level: String::new(),
        time_budget: None,
        show_help: false,
    };
    let mut log_level: Option<String> = None;

    while let Some(argument) = iter.next() {
        let arg = argument.to_string_lossy().into_owned();
        let (flag, inline) = split_flag(&arg);

        match flag {
            "-h" | "--help" | "--deep" | "--nightly" | "--quick" => {
                if inline.is_some() {
                    return Err(StressLabError::invalid_argument(flag, "takes no value"));
                }
                match flag {
                    "--deep" | "--nightly" => options.deep = true,
                    "--quick" => options.quick = true,
                    _ => options.show_help = true,
                }
                continue;
            }
            "--seeds" | "--seed" | "--report" | "--json" | "--digest" | "--baseline"
            | "--thresholds" | "--jobs" | "--top" | "--log-level" | "--time-budget" => {}
            _ => return Err(StressLabError::UnknownArgument(arg.clone())),
        }

        let value = match inline {
            Some(value) => value.to_owned(),
            None => iter
                .next()
                .map(|v| v.to_string_lossy().into_owned())
                .ok_or_else(|| StressLabError::invalid_argument(flag, "missing value"))?,
        };
        if value.is_empty() {
            return Err(StressLabError::invalid_argument(flag, "empty value"));
        }

        match flag {
            "--seeds" => options.seeds = Some(parse_positive(&value, flag)?),
            "--seed" => options.seed = Some(parse_positive(&value, flag)?),
            "--report" => options.report_path = PathBuf::from(value),
            "--json" => options.json_path = Some(PathBuf::from(value)),
            "--digest" => options.digest_path = Some(PathBuf::from(value)),
            "--baseline" => options.baseline_path = Some(PathBuf::from(value)),
            "--thresholds" => options.thresholds_path = Some(PathBuf::from(value)),
            "--jobs" => options.jobs = Some(parse_positive(&value, flag)?),
            "--top" => options.top = Some(parse_positive(&value, flag)?),
            "--log-level" => log_level = Some(value),
            "--time-budget" => {
                let secs: u64 = parse_positive(&value, flag)?;
                options.time_budget = Some(Duration::from_secs(secs));
            }
            _ => return Err(StressLabError::internal(format!("unhandled flag {flag}"))),
        }
    }

    if options.deep && options.quick {
        return Err(StressLabError::invalid_argument(
            "--quick",
            "cannot be combined with --deep/--nightly",
        ));
    }

    if options.seeds.is_none() {
        if let Some(value) = env(ENV_SEEDS) {
            options.seeds = Some(parse_positive(&value, ENV_SEEDS)?);
        }
    }
    if options.jobs.is_none() {
        if let Some(value) = env(ENV_JOBS) {
            options.jobs = Some(parse_positive(&value, ENV_JOBS)?);
        }
    }
    options.log_level = log_level
        .or_else(|| env(ENV_LOG))
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_owned());

    Ok(options)
}

// ── Commands ────────────────────────────────────────────────────────────

/// Replay one seed and print its telemetry. 0 on pass, 1 on fail.
fn run_replay<W: Write>(options: &CliOptions, seed: u32, out: &mut W) -> Result<i32> {
    let collaborators = Collaborators::reference();
    let registry = options.registry();
    let runner = PipelineRunner::new(&collaborators, &registry, RunnerConfig::default());
    let telemetry = runner.run_seed(seed);

    let json = serde_json::to_string_pretty(&telemetry)?;
    writeln!(out, "{json}")?;
    Ok(i32::from(!telemetry.passed()))
}

fn load_baseline(path: &Path) -> Result<Digest> {
    let digest = Digest::load(path)?;
    info!(path = %path.display(), "loaded baseline digest");
    Ok(digest)
}

/// Full stress run. 1 when any seed crashed at runtime, else 0.
///
/// Progress lines go to `err` as seeds complete, independent of the log
/// filter.
fn run_stress<W: Write, E: Write>(options: &CliOptions, out: &mut W, err: &mut E) -> Result<i32> {
    let thresholds = match &options.thresholds_path {
        Some(path) => AlertThresholds::load(path)?,
        None => AlertThresholds::default(),
    };
    let baseline = options
        .baseline_path
        .as_deref()
        .map(load_baseline)
        .transpose()?;

    let config = options.stress_config();
    let top_n = config.top_n;
    let (progress_tx, progress_rx) = mpsc::channel::<String>();
    let lab = StressLab::new(config, options.registry(), Collaborators::reference())?
        .with_progress(move |progress| {
            let _ = progress_tx.send(progress.line());
        });
    // The lab owns the sender; the drain ends once the worker drops it.
    let run = std::thread::scope(|scope| {
        let worker = scope.spawn(move || lab.run());
        for line in progress_rx {
            let _ = writeln!(err, "{line}");
        }
        worker.join()
    })
    .map_err(|_| StressLabError::internal("stress run panicked"))??;

    let stats = compute_aggregate_stats(&run.results);
    let clusters = cluster_failures(&run.results);
    let mut digest = generate_digest(&run, None, top_n);
    if let Some(previous) = &baseline {
        let comparison = compare_digests(Some(previous), &digest);
        digest = digest.attach_comparison(comparison);
    }
    let alerts = check_alerts(&digest, &thresholds);

    let markdown = render_stress_report(&run, &stats, &clusters, &digest, &alerts);
    write_report(&options.report_path, &markdown)?;
    if let Some(path) = &options.json_path {
        TelemetryExport::new(&run.results).write(path)?;
    }
    if let Some(path) = &options.digest_path {
        digest.write(path)?;
    }

    writeln!(
        out,
        "stress-lab: {} seeds, {} passed, {} failed ({} runtime crashes, {} data-gate)",
        stats.total, stats.passed, stats.failed, stats.runtime_crashes, stats.data_gate
    )?;
    if let Some(comparison) = &digest.baseline {
        writeln!(
            out,
            "baseline: crash rate {}, {} new failures, {} fixed",
            comparison.crash_rate_trend,
            comparison.new_failures.len(),
            comparison.fixed_failures.len()
        )?;
    }
    for alert in &alerts {
        writeln!(out, "alert [{}] {}: {}", alert.level, alert.metric, alert.message)?;
    }
    for crash in run.runtime_crashes().take(5) {
        writeln!(
            out,
            "crash: seed {} in {}: replay with `{}`",
            crash.seed,
            crash
                .failed_phase
                .map_or("unknown phase", |phase| phase.as_str()),
            replay_command(crash.seed, run.quick)
        )?;
    }
    writeln!(out, "report: {}", options.report_path.display())?;

    Ok(i32::from(run.has_runtime_crash()))
}

fn write_usage<W>(out: &mut W) -> io::Result<()>
where
    W: Write,
{
    writeln!(
        out,
        "Usage: stress-lab [--seeds=N] [--seed=N] [--deep|--nightly] [--quick] [--report=PATH]\n\
         \n\
         Options:\n\
         \n\
         --seeds N          Seeds to run (default {DEFAULT_SEEDS}, env {ENV_SEEDS})\n\
         --seed N           Replay one seed and print its telemetry as JSON\n\
         --deep, --nightly  Run at least {DEEP_MIN_SEEDS} seeds\n\
         --quick            {QUICK_SEEDS} seeds with the reduced mutation set\n\
         --report PATH      Markdown report (default {DEFAULT_REPORT_PATH})\n\
         --json PATH        Write telemetry JSON\n\
         --digest PATH      Write the digest JSON\n\
         --baseline PATH    Compare against a previous digest JSON\n\
         --thresholds PATH  Alert thresholds JSON\n\
         --jobs N           Worker threads (env {ENV_JOBS})\n\
         --top N            Blockers listed in the digest\n\
         --time-budget SECS Stop starting seeds after SECS seconds\n\
         --log-level LEVEL  Log filter (env {ENV_LOG}, default {DEFAULT_LOG_LEVEL})\n\
         \n\
         Exit codes: 0 clean, 1 runtime crash (or failed replay), 2 usage or internal error.\n",
    )
}
