//! Metric definitions emitted by a scenario run.
//!
//! Every metric carries a `scenario` label. Some add one extra label, listed
//! in [`MetricDef::labels`].

use metrics::Unit;

/// Metric type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic count.
    Counter,
    /// Current value.
    Gauge,
    /// Sample distribution.
    Histogram,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Histogram => write!(f, "histogram"),
        }
    }
}

/// Static description of one metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    /// Metric name.
    pub name: &'static str,
    /// Metric type.
    pub kind: MetricKind,
    /// Unit, if any.
    pub unit: Option<Unit>,
    /// Human-readable description.
    pub description: &'static str,
    /// Labels beyond `scenario`.
    pub labels: &'static [&'static str],
}

impl MetricDef {
    /// Canonical unit label, empty when the metric has no unit.
    pub fn unit_str(&self) -> &'static str {
        self.unit.map(|u| u.as_canonical_label()).unwrap_or("")
    }
}

/// Sensor readings evaluated by the channel.
pub const TX_ATTEMPTS: MetricDef = MetricDef {
    name: "zbsim_tx_attempts",
    kind: MetricKind::Counter,
    unit: Some(Unit::Count),
    description: "Sensor readings evaluated by the link model",
    labels: &[],
};

/// Readings the channel dropped, by cause.
pub const TX_DROPPED: MetricDef = MetricDef {
    name: "zbsim_tx_dropped",
    kind: MetricKind::Counter,
    unit: Some(Unit::Count),
    description: "Readings dropped by the link model",
    labels: &["cause"],
};

/// Readings that reached the coordinator.
pub const RX_DELIVERED: MetricDef = MetricDef {
    name: "zbsim_rx_delivered",
    kind: MetricKind::Counter,
    unit: Some(Unit::Count),
    description: "Readings delivered to the coordinator",
    labels: &[],
};

/// SNR of every evaluated reading.
pub const SNR_DB: MetricDef = MetricDef {
    name: "zbsim_snr_db",
    kind: MetricKind::Histogram,
    unit: None,
    description: "Link SNR in dB per evaluated reading",
    labels: &[],
};

/// Send-to-delivery delay.
pub const DELAY_MS: MetricDef = MetricDef {
    name: "zbsim_delay_ms",
    kind: MetricKind::Histogram,
    unit: Some(Unit::Milliseconds),
    description: "One-way delay of delivered readings",
    labels: &[],
};

/// Readings sent and still awaiting delivery or failure.
pub const IN_FLIGHT: MetricDef = MetricDef {
    name: "zbsim_in_flight",
    kind: MetricKind::Gauge,
    unit: Some(Unit::Count),
    description: "Readings handed to the stack and not yet delivered or failed",
    labels: &[],
};

/// Route discovery confirmations.
pub const ROUTE_DISCOVERIES: MetricDef = MetricDef {
    name: "zbsim_route_discoveries",
    kind: MetricKind::Counter,
    unit: Some(Unit::Count),
    description: "Route discovery confirmations received by the coordinator",
    labels: &["result"],
};

/// Join confirmations, by result.
pub const JOINS: MetricDef = MetricDef {
    name: "zbsim_joins",
    kind: MetricKind::Counter,
    unit: Some(Unit::Count),
    description: "Join confirmations",
    labels: &["result"],
};

/// All metrics, in listing order.
pub const ALL: &[MetricDef] = &[
    TX_ATTEMPTS,
    TX_DROPPED,
    RX_DELIVERED,
    SNR_DB,
    DELAY_MS,
    IN_FLIGHT,
    ROUTE_DISCOVERIES,
    JOINS,
];

/// Register descriptions with the recorder in scope.
pub fn describe_metrics() {
    for def in ALL {
        match (def.kind, def.unit) {
            (MetricKind::Counter, Some(unit)) => {
                metrics::describe_counter!(def.name, unit, def.description)
            }
            (MetricKind::Counter, None) => metrics::describe_counter!(def.name, def.description),
            (MetricKind::Gauge, Some(unit)) => metrics::describe_gauge!(def.name, unit, def.description),
            (MetricKind::Gauge, None) => metrics::describe_gauge!(def.name, def.description),
            (MetricKind::Histogram, Some(unit)) => {
                metrics::describe_histogram!(def.name, unit, def.description)
            }
            (MetricKind::Histogram, None) => {
                metrics::describe_histogram!(def.name, def.description)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique_and_prefixed() {
        let mut names: Vec<&str> = ALL.iter().map(|d| d.name).collect();
        assert!(names.iter().all(|n| n.starts_with("zbsim_")));
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn test_unit_labels() {
        assert_eq!(DELAY_MS.unit_str(), "milliseconds");
        assert_eq!(SNR_DB.unit_str(), "");
        assert_eq!(MetricKind::Histogram.to_string(), "histogram");
        assert_eq!(IN_FLIGHT.kind.to_string(), "gauge");
    }
}
