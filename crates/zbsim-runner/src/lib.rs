//! # zbsim-runner library
//!
//! Runs zbsim scenarios and exports their results.
//!
//! A [`ScenarioRun`] owns everything one run mutates: the event queue, the
//! [`SimContext`], the statistics, the lifecycle workflow and the protocol
//! stack. Nothing is shared between runs, so a sweep can execute many of them
//! in parallel and still get the same numbers as sequential runs.
//!
//! Events are processed in (time, insertion) order until the queue drains or
//! the horizon event is reached. Events after the horizon are never handled.

pub mod export;
pub mod lifecycle;
pub mod metric_defs;
pub mod metrics_export;
pub mod sweep;
pub mod trace;

pub use lifecycle::{Lifecycle, LifecyclePlan, NodeState, RunEnv};
pub use metrics_export::InMemoryRecorder;
pub use sweep::{run_sweep, SweepGrid};
pub use trace::TraceRecorder;
pub use zbsim_common::SimTime;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BinaryHeap;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};
use zbsim_channel::{ChannelConfig, ClassificationPolicy, LinkEvaluator, Outcome};
use zbsim_common::{Event, EventId, EventPayload, Position, SimContext};
use zbsim_model::{ScenarioConfig, ScenarioDescriptor, TopologyProvider};
use zbsim_stack::{ProtocolStack, SimulatedStack};
use zbsim_stats::{EnergyEstimate, SampleSummary, ScenarioSummary, StatisticsAggregator};

/// RNG stream used by the protocol stack. Stream 0 belongs to the channel.
pub const STACK_RNG_STREAM: u64 = 1;

/// Largest sample count [`evaluate_link_distribution`] accepts.
pub const MAX_LINK_SAMPLES: u64 = 10_000_000;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while running scenarios.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Model error.
    #[error("Model error: {0}")]
    Model(#[from] zbsim_model::ModelError),

    /// Simulation error.
    #[error("Simulation error: {0}")]
    Simulation(#[from] zbsim_common::SimError),

    /// Channel error.
    #[error("Channel error: {0}")]
    Channel(#[from] zbsim_channel::ChannelError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

// ============================================================================
// Results
// ============================================================================

/// Event loop counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    /// Events handled.
    pub total_events: u64,
    /// Simulated time of the last handled event.
    pub simulation_time_us: u64,
    /// Wall clock time in milliseconds.
    pub wall_time_ms: u64,
}

/// Everything a run reports.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Export labels.
    pub scenario: ScenarioDescriptor,
    /// Derived metrics.
    pub summary: ScenarioSummary,
    /// Radio energy estimate.
    pub energy: EnergyEstimate,
    /// Policy that split low-SNR drops between noise and fading.
    pub classification: ClassificationPolicy,
    /// Event loop counters.
    pub run: RunStats,
}

// ============================================================================
// Scenario Run
// ============================================================================

/// State of one scenario run.
pub struct ScenarioRun {
    event_queue: BinaryHeap<Event>,
    context: SimContext,
    stats: StatisticsAggregator,
    lifecycle: Lifecycle,
    stack: Box<dyn ProtocolStack + Send>,
    evaluator: LinkEvaluator,
    topology: Box<dyn TopologyProvider + Send + Sync>,
    trace: Option<TraceRecorder>,
    config: ScenarioConfig,
    run_stats: RunStats,
}

impl ScenarioRun {
    /// Validate the scenario and build a run with the simulated stack.
    pub fn new(config: &ScenarioConfig) -> Result<Self, RunnerError> {
        let context = SimContext::new(config.seed);
        let stack = SimulatedStack::new(
            config.stack.clone(),
            config.nodes,
            context.fork_rng(STACK_RNG_STREAM),
        );
        Self::with_stack(config, context, Box::new(stack))
    }

    /// Build a run around a caller-provided stack.
    pub fn with_stack(
        config: &ScenarioConfig,
        mut context: SimContext,
        stack: Box<dyn ProtocolStack + Send>,
    ) -> Result<Self, RunnerError> {
        config.validate()?;
        let evaluator = LinkEvaluator::new(config.channel.clone())?;
        let plan = LifecyclePlan::from_config(config);
        plan.schedule(&mut context);

        let mut event_queue = BinaryHeap::new();
        for event in context.take_pending_events() {
            event_queue.push(event);
        }

        Ok(ScenarioRun {
            event_queue,
            context,
            stats: StatisticsAggregator::new(),
            lifecycle: Lifecycle::new(config, plan),
            stack,
            evaluator,
            topology: config.topology(),
            trace: None,
            config: config.clone(),
            run_stats: RunStats::default(),
        })
    }

    /// Record every processed event to `trace`.
    pub fn set_trace(&mut self, trace: TraceRecorder) {
        self.trace = Some(trace);
    }

    /// The trace recorder, if one is attached.
    pub fn trace(&self) -> Option<&TraceRecorder> {
        self.trace.as_ref()
    }

    /// Workflow state.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Statistics collected so far.
    pub fn stats(&self) -> &StatisticsAggregator {
        &self.stats
    }

    /// Current simulated time.
    pub fn current_time(&self) -> SimTime {
        self.context.time()
    }

    /// Process events up to the configured horizon.
    pub fn run(&mut self) -> Result<ScenarioResult, RunnerError> {
        let start_time = Instant::now();
        let horizon = self.lifecycle.plan().horizon;
        let scenario = self.config.scenario_name();
        info!("{}: running until {}", scenario, horizon);

        self.event_queue.push(Event {
            id: EventId(u64::MAX),
            time: horizon,
            payload: EventPayload::SimulationEnd,
        });

        while let Some(event) = self.event_queue.pop() {
            if matches!(event.payload, EventPayload::SimulationEnd) {
                break;
            }
            self.context.set_time(event.time);

            let mut env = RunEnv {
                ctx: &mut self.context,
                stats: &mut self.stats,
                stack: &mut *self.stack,
                evaluator: &self.evaluator,
                topology: &*self.topology,
                trace: self.trace.as_mut(),
            };
            self.lifecycle.handle(&event.payload, &mut env)?;

            if let Some(trace) = self.trace.as_mut() {
                if !matches!(
                    event.payload,
                    EventPayload::SensorReading { .. } | EventPayload::DataIndication(_)
                ) {
                    trace.record_step(event.time, &event.payload);
                }
            }

            for new_event in self.context.take_pending_events() {
                self.event_queue.push(new_event);
            }
            self.run_stats.total_events += 1;
        }

        if let Some(trace) = self.trace.as_mut() {
            trace.flush()?;
        }

        self.run_stats.simulation_time_us = self.context.time().as_micros();
        self.run_stats.wall_time_ms = start_time.elapsed().as_millis() as u64;

        let summary = self.stats.summarize();
        debug!(
            "{}: {} events, sent {} received {} dropped {}",
            scenario, self.run_stats.total_events, summary.sent, summary.received, summary.dropped
        );
        let energy = self
            .stats
            .energy(&self.config.energy, horizon, self.config.nodes);

        Ok(ScenarioResult {
            scenario: self.config.descriptor(),
            summary,
            energy,
            classification: self.config.channel.classification,
            run: self.run_stats.clone(),
        })
    }
}

/// Run one scenario to completion.
pub fn run_scenario(config: &ScenarioConfig) -> Result<ScenarioResult, RunnerError> {
    ScenarioRun::new(config)?.run()
}

/// Run one scenario with `recorder` collecting its metrics.
pub fn run_scenario_with_recorder(
    config: &ScenarioConfig,
    recorder: &InMemoryRecorder,
) -> Result<ScenarioResult, RunnerError> {
    metrics::with_local_recorder(recorder, || {
        metric_defs::describe_metrics();
        run_scenario(config)
    })
}

// ============================================================================
// Link Evaluation Report
// ============================================================================

/// Outcome distribution of repeated evaluations of one link.
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    /// Link distance, m.
    pub distance_m: f64,
    /// Evaluations performed.
    pub samples: u64,
    /// Deterministic path loss, dB.
    pub path_loss_db: f64,
    /// Delivered evaluations.
    pub delivered: u64,
    /// Dropped below sensitivity.
    pub dropped_sensitivity: u64,
    /// Dropped for low SNR, attributed to noise.
    pub dropped_noise: u64,
    /// Dropped for low SNR, attributed to fading.
    pub dropped_fading: u64,
    /// Policy behind the noise/fading split. The split is a heuristic.
    pub classification: ClassificationPolicy,
    /// Delivered share, percent.
    pub delivery_ratio_pct: f64,
    /// SNR distribution, dB.
    pub snr_db: SampleSummary,
    /// Received power distribution, dBm.
    pub rx_power_dbm: SampleSummary,
    /// Fading coefficient distribution.
    pub fading_coefficient: SampleSummary,
}

/// Evaluate a link of `distance_m` meters `samples` times.
pub fn evaluate_link_distribution(
    config: &ChannelConfig,
    distance_m: f64,
    samples: u64,
    seed: u64,
) -> Result<LinkReport, RunnerError> {
    if !(distance_m.is_finite() && distance_m >= 0.0) {
        return Err(RunnerError::ConfigError(format!(
            "distance must be a non-negative number, got {}",
            distance_m
        )));
    }
    if samples > MAX_LINK_SAMPLES {
        return Err(RunnerError::ConfigError(format!(
            "samples must be at most {}, got {}",
            MAX_LINK_SAMPLES, samples
        )));
    }
    let evaluator = LinkEvaluator::new(config.clone())?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let origin = Position::new(0.0, 0.0);
    let far = Position::new(distance_m, 0.0);

    let mut counts = [0u64; 4];
    let mut snr = Vec::with_capacity(samples as usize);
    let mut rx = Vec::with_capacity(samples as usize);
    let mut fading = Vec::with_capacity(samples as usize);

    for _ in 0..samples {
        let link = evaluator.sample(origin, far, &mut rng);
        let slot = match link.outcome {
            Outcome::Delivered => 0,
            Outcome::DroppedSensitivity => 1,
            Outcome::DroppedNoise => 2,
            Outcome::DroppedFading => 3,
        };
        counts[slot] += 1;
        snr.push(link.snr_db);
        rx.push(link.rx_power_dbm);
        fading.push(link.fading_coefficient);
    }
    debug!("Evaluated {} links at {} m", samples, distance_m);

    Ok(LinkReport {
        distance_m,
        samples,
        path_loss_db: zbsim_channel::path_loss_db(distance_m, config),
        delivered: counts[0],
        dropped_sensitivity: counts[1],
        dropped_noise: counts[2],
        dropped_fading: counts[3],
        classification: config.classification,
        delivery_ratio_pct: if samples == 0 {
            0.0
        } else {
            counts[0] as f64 / samples as f64 * 100.0
        },
        snr_db: SampleSummary::from_samples(&snr),
        rx_power_dbm: SampleSummary::from_samples(&rx),
        fading_coefficient: SampleSummary::from_samples(&fading),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(nodes: usize, distance_m: f64) -> ScenarioConfig {
        let mut config = ScenarioConfig {
            nodes,
            distance_m,
            ..Default::default()
        };
        config.channel.noise_enabled = false;
        config.channel.fading_enabled = false;
        config
    }

    #[test]
    fn test_run_counts_one_route_discovery() {
        let result = run_scenario(&quiet(6, 5.0)).unwrap();
        assert_eq!(result.summary.route_discoveries, 1);
        assert_eq!(result.summary.sent, 50);
        assert_eq!(result.summary.join_successes, 5);
    }

    #[test]
    fn test_no_events_after_horizon() {
        let mut config = quiet(4, 5.0);
        config.duration_s = 30.0;
        let mut run = ScenarioRun::new(&config).unwrap();
        let result = run.run().unwrap();
        assert!(run.current_time() <= SimTime::from_secs(30.0));
        // Data phase starts at 17 s: readings at 17, 19, ..., 29.
        assert_eq!(result.summary.sent, 7);
    }

    #[test]
    fn test_invalid_config_fails_before_running() {
        let config = ScenarioConfig {
            nodes: 2,
            ..Default::default()
        };
        assert!(matches!(ScenarioRun::new(&config), Err(RunnerError::Model(_))));
    }

    #[test]
    fn test_recorder_sees_run_metrics() {
        let recorder = InMemoryRecorder::new();
        let result = run_scenario_with_recorder(&quiet(4, 5.0), &recorder).unwrap();
        let snapshot = recorder.snapshot();
        assert_eq!(
            snapshot.counters.get(metric_defs::TX_ATTEMPTS.name),
            Some(&result.summary.sent)
        );
        assert_eq!(
            snapshot.counters.get(metric_defs::RX_DELIVERED.name),
            Some(&result.summary.received)
        );
        assert_eq!(snapshot.counters.get(metric_defs::ROUTE_DISCOVERIES.name), Some(&1));
        assert_eq!(snapshot.gauges.get(metric_defs::IN_FLIGHT.name), Some(&0.0));
    }

    #[test]
    fn test_trace_records_links_and_steps() {
        let mut run = ScenarioRun::new(&quiet(4, 5.0)).unwrap();
        run.set_trace(TraceRecorder::new(None));
        let result = run.run().unwrap();
        let entries = run.trace().unwrap().entries();
        let links = entries
            .iter()
            .filter(|e| matches!(e.payload, trace::TracePayload::Link(_)))
            .count() as u64;
        assert_eq!(links, result.summary.sent);
        assert!(entries
            .iter()
            .any(|e| matches!(&e.payload, trace::TracePayload::Step(s) if s.event == "form_network")));
    }

    #[test]
    fn test_link_report_quiet_channel() {
        let mut config = ChannelConfig::default();
        config.noise_enabled = false;
        config.fading_enabled = false;
        config.path_loss_exponent = 2.0;
        let report = evaluate_link_distribution(&config, 5.0, 100, 1).unwrap();
        assert_eq!(report.delivered, 100);
        assert!((report.path_loss_db - 53.979).abs() < 0.01);
        assert!((report.rx_power_dbm.mean + 49.979).abs() < 0.01);
        assert_eq!(report.fading_coefficient.min, 1.0);
    }

    #[test]
    fn test_link_report_rejects_bad_distance() {
        assert!(evaluate_link_distribution(&ChannelConfig::default(), f64::NAN, 10, 1).is_err());
    }

    #[test]
    fn test_link_report_rejects_excessive_samples() {
        let err = evaluate_link_distribution(&ChannelConfig::default(), 5.0, u64::MAX, 1).unwrap_err();
        assert!(matches!(err, RunnerError::ConfigError(_)));
        let too_many = MAX_LINK_SAMPLES + 1;
        assert!(evaluate_link_distribution(&ChannelConfig::default(), 5.0, too_many, 1).is_err());
    }
}
