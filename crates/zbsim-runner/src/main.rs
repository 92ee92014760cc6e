//! # zbsim
//!
//! CLI runner for the zbsim link-quality simulator.
//!
//! Runs a single scenario, sweeps a grid of scenarios into a CSV file, or
//! samples one link repeatedly to show its outcome distribution.

use zbsim_runner::metric_defs;
use zbsim_runner::metrics_export;
use zbsim_runner::{
    evaluate_link_distribution, export, run_sweep, InMemoryRecorder, RunnerError, ScenarioResult,
    ScenarioRun, SweepGrid, TraceRecorder,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zbsim_channel::ChannelConfig;
use zbsim_model::{load_scenarios, RoutingMode, ScenarioConfig};

// ============================================================================
// Duration Parsing
// ============================================================================

/// Parse a duration such as `120`, `90s`, `2m` or `1m30s` into seconds.
fn parse_duration(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return Ok(secs);
    }

    let mut total_seconds = 0.0;
    let mut number = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        if number.is_empty() {
            return Err(format!("Invalid duration '{}': unexpected '{}'", s, c));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("Invalid number '{}' in duration '{}'", number, s))?;
        let multiplier = match c {
            's' => 1.0,
            'm' => 60.0,
            'h' => 3600.0,
            _ => return Err(format!("Unknown duration unit '{}' in '{}'. Use s, m or h.", c, s)),
        };
        total_seconds += value * multiplier;
        number.clear();
    }
    if !number.is_empty() {
        let value: f64 = number
            .parse()
            .map_err(|_| format!("Invalid number '{}' in duration '{}'", number, s))?;
        total_seconds += value;
    }
    if total_seconds == 0.0 {
        return Err(format!("Invalid duration '{}'", s));
    }
    Ok(total_seconds)
}

// ============================================================================
// CLI Configuration
// ============================================================================

/// Output format for metrics at end of a run.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum MetricsOutputFormat {
    /// JSON format for programmatic consumption.
    Json,
    /// Prometheus text exposition format.
    Prometheus,
}

/// Routing strategy selectable on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Routing {
    /// Every node routes to the coordinator.
    ManyToOne,
    /// The coordinator discovers a route to one target.
    Mesh,
}

impl From<Routing> for RoutingMode {
    fn from(routing: Routing) -> Self {
        match routing {
            Routing::ManyToOne => RoutingMode::ManyToOne,
            Routing::Mesh => RoutingMode::Mesh,
        }
    }
}

/// zbsim - indoor ZigBee link-quality simulator
#[derive(Parser, Debug)]
#[command(name = "zbsim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scenario
    Run(RunConfig),
    /// Run a grid of scenarios and append one CSV row per scenario
    Sweep(SweepConfig),
    /// Sample one link repeatedly and report the outcome distribution
    Evaluate(EvaluateConfig),
    /// List all available metrics with descriptions and labels
    Metrics,
}

/// Channel parameters that override the scenario files.
#[derive(Args, Debug, Default, Clone)]
pub struct ChannelOverrides {
    /// Enable or disable AWGN noise
    #[arg(long)]
    pub noise: Option<bool>,
    /// Enable or disable Rayleigh fading
    #[arg(long)]
    pub fading: Option<bool>,
    /// Path loss exponent
    #[arg(long)]
    pub path_loss_exponent: Option<f64>,
    /// Minimum SNR for reception, dB
    #[arg(long)]
    pub snr_threshold: Option<f64>,
    /// In-band noise power, dBm
    #[arg(long)]
    pub noise_floor: Option<f64>,
}

impl ChannelOverrides {
    fn apply(&self, channel: &mut ChannelConfig) {
        if let Some(noise) = self.noise {
            channel.noise_enabled = noise;
        }
        if let Some(fading) = self.fading {
            channel.fading_enabled = fading;
        }
        if let Some(exponent) = self.path_loss_exponent {
            channel.path_loss_exponent = exponent;
        }
        if let Some(threshold) = self.snr_threshold {
            channel.snr_threshold_db = threshold;
        }
        if let Some(floor) = self.noise_floor {
            channel.noise_floor_dbm = floor;
        }
    }
}

/// Scenario parameters that override the scenario files.
#[derive(Args, Debug, Default, Clone)]
pub struct ScenarioOverrides {
    /// Path(s) to YAML scenario file(s). Multiple files are merged in order (later overrides earlier).
    #[arg(short, long = "config", value_name = "FILE")]
    pub configs: Vec<PathBuf>,
    /// Simulated duration (e.g. 120, 90s, 2m)
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<f64>,
    /// Random seed
    #[arg(short, long)]
    pub seed: Option<u64>,
    /// Readings sent by the primary sensor
    #[arg(long)]
    pub packets: Option<u32>,
    /// Seconds between readings
    #[arg(long)]
    pub interval: Option<f64>,
    /// Reading payload size, bytes
    #[arg(long)]
    pub payload_bytes: Option<u32>,
    /// Routing strategy
    #[arg(long, value_enum)]
    pub routing: Option<Routing>,
    /// Route target in mesh mode
    #[arg(long)]
    pub mesh_target: Option<u32>,
    #[command(flatten)]
    pub channel: ChannelOverrides,
}

impl ScenarioOverrides {
    /// Load the layered scenario files, or defaults when none are given, and
    /// apply the command-line overrides.
    fn resolve(&self) -> Result<ScenarioConfig, RunnerError> {
        let mut config = load_config_files(&self.configs)?;
        if let Some(duration) = self.duration {
            config.duration_s = duration;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(packets) = self.packets {
            config.workload.packets = packets;
        }
        if let Some(interval) = self.interval {
            config.workload.interval_s = interval;
        }
        if let Some(bytes) = self.payload_bytes {
            config.workload.payload_bytes = bytes;
        }
        if let Some(routing) = self.routing {
            config.routing = routing.into();
        }
        if let Some(target) = self.mesh_target {
            config.mesh_target = Some(target);
        }
        self.channel.apply(&mut config.channel);
        Ok(config)
    }
}

/// Configuration for the run command.
#[derive(Parser, Debug)]
pub struct RunConfig {
    #[command(flatten)]
    pub scenario: ScenarioOverrides,
    /// Scenario name (derived from the parameters if not set)
    #[arg(long)]
    pub name: Option<String>,
    /// Number of nodes including the coordinator
    #[arg(short, long)]
    pub nodes: Option<usize>,
    /// Node spacing, m
    #[arg(long)]
    pub distance: Option<f64>,
    /// Append the result row to this CSV file
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,
    /// Write a JSON event trace to this file
    #[arg(long, value_name = "FILE")]
    pub trace: Option<PathBuf>,
    /// Export metrics at end of the run
    #[arg(long, value_enum)]
    pub metrics_output: Option<MetricsOutputFormat>,
    /// Write metrics to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    pub metrics_file: Option<PathBuf>,
    /// Print a per-node summary table to stderr
    #[arg(long)]
    pub verbose_summary: bool,
}

/// Configuration for the sweep command.
#[derive(Parser, Debug)]
pub struct SweepConfig {
    #[command(flatten)]
    pub scenario: ScenarioOverrides,
    /// Node spacings to sweep, m
    #[arg(long, value_delimiter = ',', default_values_t = [5.0, 10.0, 15.0, 20.0])]
    pub distances: Vec<f64>,
    /// Node counts to sweep
    #[arg(long, value_delimiter = ',', default_values_t = [4, 6, 8, 10])]
    pub nodes: Vec<usize>,
    /// Noise settings to sweep (defaults to --noise if given, else false,true)
    #[arg(long, value_delimiter = ',')]
    pub noise_modes: Option<Vec<bool>>,
    /// Fading settings to sweep (defaults to --fading if given, else false,true)
    #[arg(long, value_delimiter = ',')]
    pub fading_modes: Option<Vec<bool>>,
    /// CSV file receiving one row per scenario
    #[arg(long, value_name = "FILE")]
    pub csv: PathBuf,
}

/// Configuration for the evaluate command.
#[derive(Parser, Debug)]
pub struct EvaluateConfig {
    /// Path(s) to YAML scenario file(s); only the channel section is used.
    #[arg(short, long = "config", value_name = "FILE")]
    pub configs: Vec<PathBuf>,
    /// Link distance, m
    #[arg(long)]
    pub distance: f64,
    /// Number of evaluations
    #[arg(long, default_value_t = 10_000)]
    pub samples: u64,
    /// Random seed
    #[arg(short, long, default_value_t = 42)]
    pub seed: u64,
    #[command(flatten)]
    pub channel: ChannelOverrides,
}

// ============================================================================
// Commands
// ============================================================================

fn load_config_files(paths: &[PathBuf]) -> Result<ScenarioConfig, RunnerError> {
    if paths.is_empty() {
        return Ok(ScenarioConfig::default());
    }
    let paths: Vec<&Path> = paths.iter().map(|p| p.as_path()).collect();
    Ok(load_scenarios(&paths)?)
}

fn run_command(config: RunConfig) -> Result<ScenarioResult, RunnerError> {
    let mut scenario = config.scenario.resolve()?;
    if let Some(nodes) = config.nodes {
        scenario.nodes = nodes;
    }
    if let Some(distance) = config.distance {
        scenario.distance_m = distance;
    }
    if config.name.is_some() {
        scenario.scenario = config.name.clone();
    }

    let mut run = ScenarioRun::new(&scenario)?;
    if let Some(ref path) = config.trace {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        run.set_trace(TraceRecorder::new(Some(Box::new(file))));
    }

    let result = match config.metrics_output {
        Some(format) => {
            let recorder = InMemoryRecorder::new();
            let result = metrics::with_local_recorder(&recorder, || {
                metric_defs::describe_metrics();
                run.run()
            })?;
            let mut writer: Box<dyn Write> = match &config.metrics_file {
                Some(path) => Box::new(std::fs::File::create(path)?),
                None => Box::new(std::io::stdout()),
            };
            let snapshot = recorder.snapshot();
            match format {
                MetricsOutputFormat::Json => metrics_export::export_json(&snapshot, &mut writer)?,
                MetricsOutputFormat::Prometheus => metrics_export::export_prometheus(&snapshot, &mut writer)?,
            }
            result
        }
        None => run.run()?,
    };

    let csv = config
        .csv
        .clone()
        .or_else(|| scenario.output.csv.as_ref().map(PathBuf::from));
    if let Some(path) = csv {
        export::append_row(&path, &result.scenario, &result.summary)?;
        if config.verbose_summary {
            eprintln!("Results appended to: {}", path.display());
        }
    }
    if config.verbose_summary {
        print_summary_table(&result);
    }
    Ok(result)
}

fn sweep_command(config: SweepConfig) -> Result<(), RunnerError> {
    let base = config.scenario.resolve()?;
    let modes = |explicit: &Option<Vec<bool>>, single: Option<bool>| match (explicit, single) {
        (Some(modes), _) => modes.clone(),
        (None, Some(value)) => vec![value],
        (None, None) => vec![false, true],
    };
    let grid = SweepGrid {
        distances: config.distances,
        nodes: config.nodes,
        noise_modes: modes(&config.noise_modes, config.scenario.channel.noise),
        fading_modes: modes(&config.fading_modes, config.scenario.channel.fading),
    };

    eprintln!("Running {} scenarios...", grid.len());
    let results = run_sweep(&base, &grid)?;
    export::append_rows(
        &config.csv,
        results.iter().map(|r| (&r.scenario, &r.summary)),
    )?;

    for result in &results {
        eprintln!(
            "  {:24} PDR {:6.2}%  avg SNR {:6.2} dB",
            result.scenario.name, result.summary.delivery_ratio_pct, result.summary.snr_db.mean
        );
    }
    eprintln!("Results appended to: {}", config.csv.display());
    Ok(())
}

fn evaluate_command(config: EvaluateConfig) -> Result<(), RunnerError> {
    let mut channel = load_config_files(&config.configs)?.channel;
    config.channel.apply(&mut channel);
    let report = evaluate_link_distribution(&channel, config.distance, config.samples, config.seed)?;
    eprintln!(
        "Noise/fading split by {} (heuristic; sensitivity drops are exact)",
        report.classification
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Print per-node counters to stderr.
fn print_summary_table(result: &ScenarioResult) {
    let summary = &result.summary;
    eprintln!();
    eprintln!("{}", result.scenario.name);
    eprintln!("┌{}┬{}┬{}┐", "─".repeat(8), "─".repeat(10), "─".repeat(10));
    eprintln!("│ {:^6} │ {:^8} │ {:^8} │", "Node", "Sent", "Received");
    eprintln!("├{}┼{}┼{}┤", "─".repeat(8), "─".repeat(10), "─".repeat(10));
    for (node, counters) in &summary.per_node {
        eprintln!("│ {:>6} │ {:>8} │ {:>8} │", node, counters.sent, counters.received);
    }
    eprintln!("├{}┼{}┼{}┤", "─".repeat(8), "─".repeat(10), "─".repeat(10));
    eprintln!("│ {:>6} │ {:>8} │ {:>8} │", "Total", summary.sent, summary.received);
    eprintln!("└{}┴{}┴{}┘", "─".repeat(8), "─".repeat(10), "─".repeat(10));
    eprintln!(
        "PDR {:.2}%  dropped {} (noise {}, fading {}, sensitivity {})  avg delay {:.3} ms",
        summary.delivery_ratio_pct,
        summary.dropped,
        summary.dropped_noise,
        summary.dropped_fading,
        summary.dropped_sensitivity,
        summary.delay_ms.mean
    );
    eprintln!(
        "Noise/fading split by {} (heuristic; sensitivity drops are exact)",
        result.classification
    );
    eprintln!("Energy {:.3} mJ  events {}", result.energy.total_mj, result.run.total_events);
}

/// Print information about all available metrics.
fn print_metrics_info() {
    println!("zbsim Available Metrics");
    println!("=======================\n");
    println!("All metrics carry the `scenario` label.\n");

    for metric in metric_defs::ALL {
        println!("  {}", metric.name);
        println!("    Type: {}", metric.kind);
        let unit_str = metric.unit_str();
        if !unit_str.is_empty() {
            println!("    Unit: {}", unit_str);
        }
        if !metric.description.is_empty() {
            println!("    Description: {}", metric.description);
        }
        if !metric.labels.is_empty() {
            println!("    Extra labels: {}", metric.labels.join(", "));
        }
        println!();
    }

    println!("## Usage Examples\n");
    println!("  # Run one scenario and export its metrics:");
    println!("  zbsim run --nodes 6 --distance 10 --metrics-output prometheus\n");
}

fn main() -> Result<(), RunnerError> {
    // Default to "warn" level if RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(config) => {
            let metrics_to_stdout = config.metrics_output.is_some() && config.metrics_file.is_none();
            let result = run_command(config)?;
            if !metrics_to_stdout {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        Commands::Sweep(config) => {
            sweep_command(config)?;
        }
        Commands::Evaluate(config) => {
            evaluate_command(config)?;
        }
        Commands::Metrics => {
            print_metrics_info();
        }
    }

    Ok(())
}
