//! # zbsim-stats
//!
//! Statistics aggregation for one zbsim scenario run.
//!
//! This crate provides:
//! - [`StatisticsAggregator`] - counters, sample collections and delivery correlation
//! - [`ScenarioSummary`] / [`SampleSummary`] - derived metrics, computed on demand
//! - [`EnergyModel`] / [`EnergyEstimate`] - radio energy estimate from traffic volume
//!
//! Sample statistics are recomputed from the stored samples each time
//! [`StatisticsAggregator::summarize`] is called. Empty collections summarize
//! to zeros.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use zbsim_channel::{Outcome, TransmissionAttempt};
use zbsim_common::{MessageId, NodeId, SimTime};

// ============================================================================
// Sample Summaries
// ============================================================================

/// Summary statistics for one sample collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    /// Number of samples.
    pub count: u64,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// Mean value.
    pub mean: f64,
    /// 50th percentile.
    pub p50: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 99th percentile.
    pub p99: f64,
}

impl SampleSummary {
    /// Summarize `samples`. An empty slice gives the all-zero summary.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return SampleSummary::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let percentile = |p: f64| -> f64 {
            let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };

        SampleSummary {
            count: sorted.len() as u64,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p50: percentile(50.0),
            p90: percentile(90.0),
            p99: percentile(99.0),
        }
    }
}

// ============================================================================
// Energy Model
// ============================================================================

/// Radio power draw used for the energy estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnergyModel {
    /// Power while transmitting, mW.
    pub tx_mw: f64,
    /// Power while receiving, mW.
    pub rx_mw: f64,
    /// Power while idle, mW.
    pub idle_mw: f64,
    /// PHY data rate, bits per second.
    pub data_rate_bps: f64,
    /// PHY/MAC/NWK/APS header bytes added to every payload.
    pub overhead_bytes: u32,
}

impl Default for EnergyModel {
    fn default() -> Self {
        Self {
            tx_mw: 35.0,
            rx_mw: 25.0,
            idle_mw: 0.3,
            data_rate_bps: 250_000.0,
            overhead_bytes: 39,
        }
    }
}

impl EnergyModel {
    /// On-air time of a frame carrying `payload_bytes`, in seconds.
    pub fn airtime_s(&self, payload_bytes: u32) -> f64 {
        f64::from(payload_bytes + self.overhead_bytes) * 8.0 / self.data_rate_bps
    }
}

/// Estimated radio energy for one run, in millijoules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyEstimate {
    /// Energy spent transmitting.
    pub tx_mj: f64,
    /// Energy spent receiving.
    pub rx_mj: f64,
    /// Energy spent idle across all nodes.
    pub idle_mj: f64,
    /// Sum of the above.
    pub total_mj: f64,
}

// ============================================================================
// Scenario Summary
// ============================================================================

/// Per-node traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCounters {
    /// Readings sent by the node.
    pub sent: u64,
    /// Readings from the node that reached their destination.
    pub received: u64,
}

/// Derived metrics for one scenario run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    /// Send attempts.
    pub sent: u64,
    /// Deliveries matched to a send.
    pub received: u64,
    /// Channel drops plus protocol failures.
    pub dropped: u64,
    /// Dropped below receiver sensitivity.
    pub dropped_sensitivity: u64,
    /// Dropped for low SNR, attributed to noise.
    pub dropped_noise: u64,
    /// Dropped for low SNR, attributed to fading.
    pub dropped_fading: u64,
    /// Sends the protocol stack reported as failed.
    pub protocol_failures: u64,
    /// Sends still awaiting delivery when the run ended.
    pub in_flight: u64,
    /// Route discovery confirmations.
    pub route_discoveries: u64,
    /// Join requests issued after a successful discovery.
    pub join_attempts: u64,
    /// Successful joins.
    pub join_successes: u64,
    /// Discoveries that found no network.
    pub discovery_failures: u64,
    /// Group commands issued by the coordinator.
    pub group_commands: u64,
    /// Group command arrivals at members.
    pub group_deliveries: u64,
    /// Phase transitions that gave up waiting for confirmations.
    pub dependency_timeouts: u64,
    /// Application bytes sent.
    pub bytes_sent: u64,
    /// Application bytes received.
    pub bytes_received: u64,
    /// Delivery ratio in percent.
    pub delivery_ratio_pct: f64,
    /// Loss rate in percent.
    pub loss_rate_pct: f64,
    /// Join success rate in percent.
    pub join_success_rate_pct: f64,
    /// Goodput between the first send and the last delivery, kbit/s.
    pub throughput_kbps: f64,
    /// Deliveries per second over the same window.
    pub throughput_pps: f64,
    /// SNR samples, dB.
    pub snr_db: SampleSummary,
    /// Fading coefficient samples.
    pub fading_coefficient: SampleSummary,
    /// Link distance samples, m.
    pub distance_m: SampleSummary,
    /// Received power samples, dBm.
    pub rx_power_dbm: SampleSummary,
    /// One-way delay samples, ms.
    pub delay_ms: SampleSummary,
    /// Counters per sending node.
    pub per_node: BTreeMap<u32, NodeCounters>,
}

// ============================================================================
// Aggregator
// ============================================================================

/// A send waiting for its matching delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDelivery {
    /// Sending node.
    pub sender: NodeId,
    /// Send time.
    pub sent_at: SimTime,
}

/// Accumulates outcomes for one scenario run.
#[derive(Debug, Clone, Default)]
pub struct StatisticsAggregator {
    sent: u64,
    received: u64,
    dropped: u64,
    dropped_sensitivity: u64,
    dropped_noise: u64,
    dropped_fading: u64,
    protocol_failures: u64,
    route_discoveries: u64,
    join_attempts: u64,
    join_successes: u64,
    discovery_failures: u64,
    group_commands: u64,
    group_deliveries: u64,
    dependency_timeouts: u64,
    bytes_sent: u64,
    bytes_received: u64,
    snr_samples: Vec<f64>,
    fading_samples: Vec<f64>,
    distance_samples: Vec<f64>,
    rx_power_samples: Vec<f64>,
    delay_samples_ms: Vec<f64>,
    pending: BTreeMap<MessageId, PendingDelivery>,
    per_node: BTreeMap<NodeId, NodeCounters>,
    first_send: Option<SimTime>,
    last_delivery: Option<SimTime>,
}

impl StatisticsAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all state before an independent run.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record a classified send attempt.
    pub fn record(&mut self, attempt: &TransmissionAttempt) {
        self.sent += 1;
        self.bytes_sent += u64::from(attempt.payload_bytes);
        self.per_node.entry(attempt.sender).or_default().sent += 1;
        if self.first_send.is_none() {
            self.first_send = Some(attempt.sent_at);
        }

        let link = &attempt.link;
        self.snr_samples.push(link.snr_db);
        self.fading_samples.push(link.fading_coefficient);
        self.distance_samples.push(link.distance_m);
        self.rx_power_samples.push(link.rx_power_dbm);

        match link.outcome {
            Outcome::Delivered => {}
            Outcome::DroppedSensitivity => {
                self.dropped += 1;
                self.dropped_sensitivity += 1;
            }
            Outcome::DroppedNoise => {
                self.dropped += 1;
                self.dropped_noise += 1;
            }
            Outcome::DroppedFading => {
                self.dropped += 1;
                self.dropped_fading += 1;
            }
        }
    }

    /// Open a correlation entry for a send handed to the protocol stack.
    pub fn track_send(&mut self, message: MessageId, sender: NodeId, sent_at: SimTime) {
        self.pending.insert(message, PendingDelivery { sender, sent_at });
    }

    /// Close the correlation entry for `message` and record its delay.
    ///
    /// Returns the delay in milliseconds, or `None` when no send is pending
    /// under that id.
    pub fn record_delay(&mut self, message: MessageId, received_at: SimTime, payload_bytes: u32) -> Option<f64> {
        let Some(pending) = self.pending.remove(&message) else {
            debug!("Delivery of {:?} has no pending send, ignored", message);
            return None;
        };
        let delay_ms = (received_at - pending.sent_at).as_millis_f64();
        self.received += 1;
        self.bytes_received += u64::from(payload_bytes);
        self.delay_samples_ms.push(delay_ms);
        self.per_node.entry(pending.sender).or_default().received += 1;
        self.last_delivery = Some(self.last_delivery.map_or(received_at, |t| t.max(received_at)));
        Some(delay_ms)
    }

    /// Count a send the protocol stack rejected. Returns whether it was pending.
    pub fn record_protocol_failure(&mut self, message: MessageId) -> bool {
        if self.pending.remove(&message).is_none() {
            return false;
        }
        self.dropped += 1;
        self.protocol_failures += 1;
        true
    }

    /// Count a join request.
    pub fn record_join_attempt(&mut self) {
        self.join_attempts += 1;
    }

    /// Count a successful join.
    pub fn record_join_success(&mut self) {
        self.join_successes += 1;
    }

    /// Count a discovery that found nothing to join.
    pub fn record_discovery_failure(&mut self) {
        self.discovery_failures += 1;
    }

    /// Count a route discovery confirmation.
    pub fn record_route_discovery(&mut self) {
        self.route_discoveries += 1;
    }

    /// Count a group command.
    pub fn record_group_command(&mut self) {
        self.group_commands += 1;
    }

    /// Count a group command arrival.
    pub fn record_group_delivery(&mut self) {
        self.group_deliveries += 1;
    }

    /// Count a phase transition forced by a timeout.
    pub fn record_dependency_timeout(&mut self) {
        self.dependency_timeouts += 1;
    }

    /// Successful joins so far.
    pub fn join_successes(&self) -> u64 {
        self.join_successes
    }

    /// Send attempts so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Sends waiting for delivery.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Compute the summary from the current state.
    pub fn summarize(&self) -> ScenarioSummary {
        let pct = |num: u64, den: u64| {
            if den == 0 {
                0.0
            } else {
                num as f64 / den as f64 * 100.0
            }
        };

        let window_s = match (self.first_send, self.last_delivery) {
            (Some(first), Some(last)) => (last - first).as_secs_f64(),
            _ => 0.0,
        };
        let (throughput_kbps, throughput_pps) = if window_s > 0.0 {
            (
                self.bytes_received as f64 * 8.0 / window_s / 1000.0,
                self.received as f64 / window_s,
            )
        } else {
            (0.0, 0.0)
        };

        ScenarioSummary {
            sent: self.sent,
            received: self.received,
            dropped: self.dropped,
            dropped_sensitivity: self.dropped_sensitivity,
            dropped_noise: self.dropped_noise,
            dropped_fading: self.dropped_fading,
            protocol_failures: self.protocol_failures,
            in_flight: self.pending.len() as u64,
            route_discoveries: self.route_discoveries,
            join_attempts: self.join_attempts,
            join_successes: self.join_successes,
            discovery_failures: self.discovery_failures,
            group_commands: self.group_commands,
            group_deliveries: self.group_deliveries,
            dependency_timeouts: self.dependency_timeouts,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            delivery_ratio_pct: pct(self.received, self.sent),
            loss_rate_pct: pct(self.dropped, self.sent),
            join_success_rate_pct: pct(self.join_successes, self.join_attempts),
            throughput_kbps,
            throughput_pps,
            snr_db: SampleSummary::from_samples(&self.snr_samples),
            fading_coefficient: SampleSummary::from_samples(&self.fading_samples),
            distance_m: SampleSummary::from_samples(&self.distance_samples),
            rx_power_dbm: SampleSummary::from_samples(&self.rx_power_samples),
            delay_ms: SampleSummary::from_samples(&self.delay_samples_ms),
            per_node: self.per_node.iter().map(|(id, c)| (id.0, *c)).collect(),
        }
    }

    /// Estimate radio energy over `duration` for `node_count` nodes.
    pub fn energy(&self, model: &EnergyModel, duration: SimTime, node_count: usize) -> EnergyEstimate {
        let header_bits = |frames: u64| frames as f64 * f64::from(model.overhead_bytes) * 8.0;
        let tx_s = (self.bytes_sent as f64 * 8.0 + header_bits(self.sent)) / model.data_rate_bps;
        let rx_s = (self.bytes_received as f64 * 8.0 + header_bits(self.received)) / model.data_rate_bps;
        let idle_s = (duration.as_secs_f64() * node_count as f64 - tx_s - rx_s).max(0.0);

        let tx_mj = model.tx_mw * tx_s;
        let rx_mj = model.rx_mw * rx_s;
        let idle_mj = model.idle_mw * idle_s;
        EnergyEstimate {
            tx_mj,
            rx_mj,
            idle_mj,
            total_mj: tx_mj + rx_mj + idle_mj,
        }
    }
}
