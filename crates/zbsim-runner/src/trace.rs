//! Event trace output.
//!
//! The trace is a JSON array with one entry per processed event. Link
//! evaluations and deliveries carry their measurements; every other event is
//! recorded as a lifecycle step.

use crate::RunnerError;
use serde::Serialize;
use std::io::Write;
use zbsim_channel::TransmissionAttempt;
use zbsim_common::{DataIndication, EventPayload, NodeId, SimTime};

/// Payload for a link evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct LinkPayload {
    /// Sending node.
    pub sender: u32,
    /// Intended receiver.
    pub receiver: u32,
    /// Link distance, m.
    pub distance_m: f64,
    /// Received power, dBm.
    #[serde(rename = "RSSI")]
    pub rssi_dbm: f64,
    /// Signal-to-noise ratio, dB.
    #[serde(rename = "SNR")]
    pub snr_db: f64,
    /// Rayleigh amplitude.
    pub fading_coefficient: f64,
    /// "delivered", "sensitivity", "noise" or "fading".
    pub outcome: &'static str,
}

/// Payload for a data arrival.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryPayload {
    /// Receiving node.
    pub node: u32,
    /// Originating node.
    pub source: u32,
    /// Correlation id.
    pub message: u64,
    /// "unicast" or "group".
    pub addressing: &'static str,
    /// Send-to-delivery delay, ms, for matched unicast deliveries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<f64>,
}

/// Payload for a lifecycle step or stack callback.
#[derive(Debug, Clone, Serialize)]
pub struct StepPayload {
    /// Event label.
    pub event: &'static str,
    /// Node concerned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<u32>,
    /// Stack status for callbacks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
}

impl StepPayload {
    /// Describe an event.
    pub fn from_event(payload: &EventPayload) -> Self {
        let (node, status) = match payload {
            EventPayload::FormNetwork | EventPayload::EstablishRoutes | EventPayload::StartDataPhase => {
                (Some(NodeId::COORDINATOR), None)
            }
            EventPayload::StartDiscovery { node } | EventPayload::JoinGroup { node, .. } => (Some(*node), None),
            EventPayload::SensorReading { sensor, .. } => (Some(*sensor), None),
            EventPayload::GroupCommand { .. } => (Some(NodeId::COORDINATOR), None),
            EventPayload::FormationConfirm(c) => (Some(c.node), Some(c.status.as_label())),
            EventPayload::DiscoveryConfirm(c) => (Some(c.node), Some(c.status.as_label())),
            EventPayload::JoinConfirm(c) => (Some(c.node), Some(c.status.as_label())),
            EventPayload::RouteDiscoveryConfirm(c) => (Some(c.node), Some(c.status.as_label())),
            EventPayload::DataIndication(i) => (Some(i.node), None),
            EventPayload::DataConfirm(c) => (Some(c.node), Some(c.status.as_label())),
            EventPayload::SimulationEnd => (None, None),
        };
        StepPayload {
            event: payload.as_label(),
            node: node.map(|n| n.0),
            status,
        }
    }
}

/// Payload types for different trace entries.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TracePayload {
    /// Link evaluation.
    #[serde(rename = "LINK")]
    Link(LinkPayload),
    /// Data arrival.
    #[serde(rename = "DELIVERY")]
    Delivery(DeliveryPayload),
    /// Lifecycle step.
    #[serde(rename = "STEP")]
    Step(StepPayload),
}

/// A trace entry for output.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    /// Simulated time, seconds.
    pub time_s: f64,
    /// Entry payload, flattened into this object.
    #[serde(flatten)]
    pub payload: TracePayload,
}

/// Collects trace entries and writes them when the run ends.
pub struct TraceRecorder {
    output: Option<Box<dyn Write + Send>>,
    entries: Vec<TraceEntry>,
}

impl TraceRecorder {
    /// Create a recorder writing to `output`. `None` keeps entries in memory only.
    pub fn new(output: Option<Box<dyn Write + Send>>) -> Self {
        TraceRecorder {
            output,
            entries: Vec::new(),
        }
    }

    /// Record a link evaluation.
    pub fn record_link(&mut self, attempt: &TransmissionAttempt) {
        let link = &attempt.link;
        self.entries.push(TraceEntry {
            time_s: attempt.sent_at.as_secs_f64(),
            payload: TracePayload::Link(LinkPayload {
                sender: attempt.sender.0,
                receiver: attempt.receiver.0,
                distance_m: link.distance_m,
                rssi_dbm: link.rx_power_dbm,
                snr_db: link.snr_db,
                fading_coefficient: link.fading_coefficient,
                outcome: link.outcome.as_label(),
            }),
        });
    }

    /// Record a data arrival.
    pub fn record_delivery(&mut self, time: SimTime, indication: &DataIndication, delay_ms: Option<f64>) {
        let addressing = match indication.destination {
            zbsim_common::DataDestination::Unicast(_) => "unicast",
            zbsim_common::DataDestination::Group(_) => "group",
        };
        self.entries.push(TraceEntry {
            time_s: time.as_secs_f64(),
            payload: TracePayload::Delivery(DeliveryPayload {
                node: indication.node.0,
                source: indication.source.0,
                message: indication.message.0,
                addressing,
                delay_ms,
            }),
        });
    }

    /// Record a lifecycle step.
    pub fn record_step(&mut self, time: SimTime, payload: &EventPayload) {
        self.entries.push(TraceEntry {
            time_s: time.as_secs_f64(),
            payload: TracePayload::Step(StepPayload::from_event(payload)),
        });
    }

    /// Entries recorded so far.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Flush all entries to output.
    pub fn flush(&mut self) -> Result<(), RunnerError> {
        if let Some(ref mut output) = self.output {
            let json = serde_json::to_string_pretty(&self.entries)?;
            writeln!(output, "{}", json)?;
            output.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbsim_common::{MessageId, StackStatus};

    #[test]
    fn test_step_payload_labels() {
        let step = StepPayload::from_event(&EventPayload::JoinConfirm(zbsim_common::JoinConfirm {
            node: NodeId(3),
            status: StackStatus::NotPermitted,
            address: None,
        }));
        assert_eq!(step.event, "join_confirm");
        assert_eq!(step.node, Some(3));
        assert_eq!(step.status, Some("not_permitted"));
    }

    #[test]
    fn test_entries_serialize_flat() {
        let mut trace = TraceRecorder::new(None);
        trace.record_step(SimTime::from_secs(1.0), &EventPayload::FormNetwork);
        trace.record_delivery(
            SimTime::from_secs(2.5),
            &DataIndication {
                node: NodeId(0),
                source: NodeId(3),
                destination: zbsim_common::DataDestination::Unicast(NodeId(0)),
                message: MessageId(7),
                payload_bytes: 20,
            },
            Some(3.888),
        );

        let json = serde_json::to_value(trace.entries()).unwrap();
        assert_eq!(json[0]["type"], "STEP");
        assert_eq!(json[0]["event"], "form_network");
        assert_eq!(json[0]["node"], 0);
        assert_eq!(json[1]["type"], "DELIVERY");
        assert_eq!(json[1]["message"], 7);
        assert_eq!(json[1]["time_s"], 2.5);
    }
}
