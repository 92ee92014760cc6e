//! Metrics export for scenario runs.
//!
//! [`InMemoryRecorder`] implements [`metrics::Recorder`] and keeps every
//! series in memory. A run installs it with [`metrics::with_local_recorder`],
//! so concurrent runs on other threads never share a recorder. The snapshot
//! can be written as JSON or in the Prometheus text exposition format.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zbsim_stats::SampleSummary;

// ============================================================================
// Metrics Snapshot Types
// ============================================================================

/// Summary statistics for a histogram series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HistogramSummary {
    /// Sum of all samples.
    pub sum: f64,
    /// Distribution of the samples.
    #[serde(flatten)]
    pub samples: SampleSummary,
}

impl HistogramSummary {
    fn from_samples(samples: &[f64]) -> Self {
        HistogramSummary {
            sum: samples.iter().sum(),
            samples: SampleSummary::from_samples(samples),
        }
    }
}

/// Value of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeriesValue {
    /// Counter value.
    Counter {
        /// Current count.
        value: u64,
    },
    /// Gauge value.
    Gauge {
        /// Last value.
        value: f64,
    },
    /// Histogram summary.
    Histogram(HistogramSummary),
}

/// One labeled series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    /// Metric name.
    pub name: String,
    /// Labels, sorted by key.
    pub labels: BTreeMap<String, String>,
    /// Series value.
    #[serde(flatten)]
    pub value: SeriesValue,
}

/// Collected metric data for export.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    /// Timestamp when metrics were collected.
    pub timestamp: String,
    /// Counter totals across all label sets.
    pub counters: BTreeMap<String, u64>,
    /// Gauge values, last series wins.
    pub gauges: BTreeMap<String, f64>,
    /// Histogram summaries across all label sets.
    pub histograms: BTreeMap<String, HistogramSummary>,
    /// Every labeled series.
    pub series: Vec<Series>,
}

// ============================================================================
// Export Functions
// ============================================================================

/// Export metrics as JSON.
pub fn export_json<W: Write>(snapshot: &MetricsSnapshot, writer: &mut W) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, snapshot)?;
    writeln!(writer)?;
    Ok(())
}

/// Export metrics in Prometheus text exposition format.
///
/// Histograms are written as summaries with 0.5, 0.9 and 0.99 quantiles.
pub fn export_prometheus<W: Write>(snapshot: &MetricsSnapshot, writer: &mut W) -> std::io::Result<()> {
    let mut last_name: Option<&str> = None;
    for series in &snapshot.series {
        if last_name != Some(series.name.as_str()) {
            let kind = match series.value {
                SeriesValue::Counter { .. } => "counter",
                SeriesValue::Gauge { .. } => "gauge",
                SeriesValue::Histogram(_) => "summary",
            };
            writeln!(writer, "# TYPE {} {}", series.name, kind)?;
            last_name = Some(series.name.as_str());
        }

        let labels = format_labels(&series.labels, None);
        match &series.value {
            SeriesValue::Counter { value } => writeln!(writer, "{}{} {}", series.name, labels, value)?,
            SeriesValue::Gauge { value } => writeln!(writer, "{}{} {}", series.name, labels, value)?,
            SeriesValue::Histogram(summary) => {
                writeln!(writer, "{}_count{} {}", series.name, labels, summary.samples.count)?;
                writeln!(writer, "{}_sum{} {}", series.name, labels, summary.sum)?;
                for (quantile, value) in [
                    ("0.5", summary.samples.p50),
                    ("0.9", summary.samples.p90),
                    ("0.99", summary.samples.p99),
                ] {
                    let labels = format_labels(&series.labels, Some(quantile));
                    writeln!(writer, "{}{} {}", series.name, labels, value)?;
                }
            }
        }
    }
    Ok(())
}

fn format_labels(labels: &BTreeMap<String, String>, quantile: Option<&str>) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    if let Some(q) = quantile {
        parts.push(format!("quantile=\"{}\"", q));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

// ============================================================================
// In-Memory Recorder
// ============================================================================

/// Thread-safe storage for a single counter value.
#[derive(Debug, Default)]
struct CounterState {
    value: AtomicU64,
}

impl CounterState {
    fn increment(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe storage for a single gauge value, as f64 bits.
#[derive(Debug, Default)]
struct GaugeState {
    value: AtomicU64,
}

impl GaugeState {
    fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    fn increment(&self, value: f64) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
    }

    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }
}

/// Every sample of one histogram series. Runs are short enough to keep them all.
#[derive(Debug, Default)]
struct HistogramState {
    samples: RwLock<Vec<f64>>,
}

impl HistogramState {
    fn record(&self, value: f64) {
        self.samples.write().push(value);
    }

    fn samples(&self) -> Vec<f64> {
        self.samples.read().clone()
    }
}

/// Metric name and labels of a registered key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    name: String,
    labels: BTreeMap<String, String>,
}

impl From<&Key> for SeriesKey {
    fn from(key: &Key) -> Self {
        SeriesKey {
            name: key.name().to_string(),
            labels: key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect(),
        }
    }
}

/// Shared state for the in-memory recorder.
#[derive(Debug, Default)]
struct RecorderState {
    counters: RwLock<BTreeMap<SeriesKey, Arc<CounterState>>>,
    gauges: RwLock<BTreeMap<SeriesKey, Arc<GaugeState>>>,
    histograms: RwLock<BTreeMap<SeriesKey, Arc<HistogramState>>>,
}

fn get_or_create<T: Default>(map: &RwLock<BTreeMap<SeriesKey, Arc<T>>>, key: &Key) -> Arc<T> {
    let series = SeriesKey::from(key);
    if let Some(existing) = map.read().get(&series) {
        return existing.clone();
    }
    map.write().entry(series).or_default().clone()
}

impl RecorderState {
    fn snapshot(&self) -> MetricsSnapshot {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut counters: BTreeMap<String, u64> = BTreeMap::new();
        let mut gauges: BTreeMap<String, f64> = BTreeMap::new();
        let mut histogram_samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut series = Vec::new();

        for (key, counter) in self.counters.read().iter() {
            let value = counter.get();
            *counters.entry(key.name.clone()).or_insert(0) += value;
            series.push(Series {
                name: key.name.clone(),
                labels: key.labels.clone(),
                value: SeriesValue::Counter { value },
            });
        }

        for (key, gauge) in self.gauges.read().iter() {
            let value = gauge.get();
            gauges.insert(key.name.clone(), value);
            series.push(Series {
                name: key.name.clone(),
                labels: key.labels.clone(),
                value: SeriesValue::Gauge { value },
            });
        }

        for (key, histogram) in self.histograms.read().iter() {
            let samples = histogram.samples();
            series.push(Series {
                name: key.name.clone(),
                labels: key.labels.clone(),
                value: SeriesValue::Histogram(HistogramSummary::from_samples(&samples)),
            });
            histogram_samples.entry(key.name.clone()).or_default().extend(samples);
        }

        let histograms = histogram_samples
            .into_iter()
            .map(|(name, samples)| (name, HistogramSummary::from_samples(&samples)))
            .collect();

        MetricsSnapshot {
            timestamp,
            counters,
            gauges,
            histograms,
            series,
        }
    }
}

/// In-memory metrics recorder that collects metrics for later export.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecorder {
    state: Arc<RecorderState>,
}

impl InMemoryRecorder {
    /// Create a new in-memory recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of all current metric values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.snapshot()
    }
}

struct InMemoryCounter {
    state: Arc<CounterState>,
}

impl metrics::CounterFn for InMemoryCounter {
    fn increment(&self, value: u64) {
        self.state.increment(value);
    }

    fn absolute(&self, value: u64) {
        self.state.value.fetch_max(value, Ordering::Relaxed);
    }
}

struct InMemoryGauge {
    state: Arc<GaugeState>,
}

impl metrics::GaugeFn for InMemoryGauge {
    fn increment(&self, value: f64) {
        self.state.increment(value);
    }

    fn decrement(&self, value: f64) {
        self.state.increment(-value);
    }

    fn set(&self, value: f64) {
        self.state.set(value);
    }
}

struct InMemoryHistogram {
    state: Arc<HistogramState>,
}

impl metrics::HistogramFn for InMemoryHistogram {
    fn record(&self, value: f64) {
        self.state.record(value);
    }
}

impl Recorder for InMemoryRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let state = get_or_create(&self.state.counters, key);
        Counter::from_arc(Arc::new(InMemoryCounter { state }))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        let state = get_or_create(&self.state.gauges, key);
        Gauge::from_arc(Arc::new(InMemoryGauge { state }))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let state = get_or_create(&self.state.histograms, key);
        Histogram::from_arc(Arc::new(InMemoryHistogram { state }))
    }
}
