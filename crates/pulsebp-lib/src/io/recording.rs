//! CSV persistence for PPG recordings and estimate traces.
//!
//! A recording is a two-column file, `timestamp_ms,amplitude`, one row per
//! camera frame. Timestamps must be non-decreasing but gaps are allowed; the
//! pipeline works from the timestamps, not the row count.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::signal::Sample;

#[derive(Debug, Serialize, Deserialize)]
struct RecordingRow {
    timestamp_ms: i64,
    amplitude: f64,
}

/// One emitted estimate, flattened for CSV output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EstimateRow {
    pub timestamp_ms: i64,
    pub sbp: f64,
    pub dbp: f64,
    pub sbp_avg: f64,
    pub dbp_avg: f64,
    pub hr_bpm: f64,
}

pub fn read_recording(path: &Path) -> anyhow::Result<Vec<Sample>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening recording {}", path.display()))?;
    let mut samples: Vec<Sample> = Vec::new();
    for (i, row) in reader.deserialize::<RecordingRow>().enumerate() {
        let row = row.with_context(|| format!("recording {} row {}", path.display(), i + 1))?;
        if let Some(prev) = samples.last() {
            anyhow::ensure!(
                row.timestamp_ms >= prev.timestamp_ms,
                "recording {} row {}: timestamp {} goes backwards",
                path.display(),
                i + 1,
                row.timestamp_ms
            );
        }
        samples.push(Sample {
            amplitude: row.amplitude,
            timestamp_ms: row.timestamp_ms,
        });
    }
    Ok(samples)
}

pub fn write_recording(path: &Path, samples: &[Sample]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating recording {}", path.display()))?;
    for s in samples {
        writer.serialize(RecordingRow {
            timestamp_ms: s.timestamp_ms,
            amplitude: s.amplitude,
        })?;
    }
    writer.flush().context("flushing recording")?;
    Ok(())
}

pub fn write_estimates(path: &Path, rows: &[EstimateRow]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating estimate trace {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().context("flushing estimate trace")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.csv");
        let samples: Vec<Sample> = (0..10)
            .map(|i| Sample {
                amplitude: i as f64 * 0.5,
                timestamp_ms: i * 33,
            })
            .collect();
        write_recording(&path, &samples).unwrap();
        let back = read_recording(&path).unwrap();
        assert_eq!(back.len(), samples.len());
        assert_eq!(back[3].timestamp_ms, 99);
        assert_eq!(back[3].amplitude, 1.5);
    }

    #[test]
    fn backwards_timestamps_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "timestamp_ms,amplitude\n0,1.0\n33,1.1\n20,1.2\n",
        )
        .unwrap();
        let err = read_recording(&path).unwrap_err();
        assert!(err.to_string().contains("goes backwards"));
    }

    #[test]
    fn missing_file_carries_the_path_in_the_error() {
        let err = read_recording(Path::new("/nonexistent/rec.csv")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rec.csv"));
    }
}
