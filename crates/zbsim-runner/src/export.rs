//! CSV result export.
//!
//! One row per run. The header is written only when the destination is
//! missing or empty, and rows are always appended, so repeated runs and
//! sweeps accumulate in one file.

use crate::RunnerError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::debug;
use zbsim_model::{format_number, ScenarioDescriptor};
use zbsim_stats::ScenarioSummary;

/// Column header.
pub const CSV_HEADER: &str = "Scenario,Distance,NumNodes,Noise,Fading,Sent,Received,Dropped,\
DroppedNoise,DroppedFading,DroppedSensitivity,PDR,AvgSNR,MinSNR,MaxSNR,AvgDelay";

/// Write the header line.
pub fn write_header<W: Write>(writer: &mut W) -> std::io::Result<()> {
    writeln!(writer, "{}", CSV_HEADER)
}

/// Write one result row.
pub fn write_row<W: Write>(
    writer: &mut W,
    descriptor: &ScenarioDescriptor,
    summary: &ScenarioSummary,
) -> std::io::Result<()> {
    let flag = |on: bool| if on { "1" } else { "0" };
    let fields = [
        escape_csv_field(&descriptor.name),
        format_number(descriptor.distance_m),
        descriptor.nodes.to_string(),
        flag(descriptor.noise).to_string(),
        flag(descriptor.fading).to_string(),
        summary.sent.to_string(),
        summary.received.to_string(),
        summary.dropped.to_string(),
        summary.dropped_noise.to_string(),
        summary.dropped_fading.to_string(),
        summary.dropped_sensitivity.to_string(),
        format!("{:.2}", summary.delivery_ratio_pct),
        format!("{:.2}", summary.snr_db.mean),
        format!("{:.2}", summary.snr_db.min),
        format!("{:.2}", summary.snr_db.max),
        format!("{:.3}", summary.delay_ms.mean),
    ];
    writeln!(writer, "{}", fields.join(","))
}

/// Append one row to the CSV file at `path`.
pub fn append_row(
    path: &Path,
    descriptor: &ScenarioDescriptor,
    summary: &ScenarioSummary,
) -> Result<(), RunnerError> {
    append_rows(path, std::iter::once((descriptor, summary)))
}

/// Append rows in order, writing the header first if the file is missing or empty.
pub fn append_rows<'a, I>(path: &Path, rows: I) -> Result<(), RunnerError>
where
    I: IntoIterator<Item = (&'a ScenarioDescriptor, &'a ScenarioSummary)>,
{
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
        write_header(&mut file)?;
    }
    let mut count = 0usize;
    for (descriptor, summary) in rows {
        write_row(&mut file, descriptor, summary)?;
        count += 1;
    }
    file.flush()?;
    debug!("Appended {} row(s) to {}", count, path.display());
    Ok(())
}

/// Escape a CSV field if it contains special characters.
fn escape_csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
