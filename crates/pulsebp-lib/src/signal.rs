use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

/// One conditioned PPG amplitude taken from a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub amplitude: f64,
    pub timestamp_ms: i64,
}

/// Fixed-capacity ring buffer of recent samples.
///
/// Single writer, read by the detectors on the same logical tick. The oldest
/// entry is silently overwritten on wraparound; there is no backpressure
/// signal because the producer is a live video feed.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    buf: Vec<Sample>,
    head: usize,
    len: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroWindowCapacity);
        }
        Ok(Self {
            buf: vec![
                Sample {
                    amplitude: 0.0,
                    timestamp_ms: 0,
                };
                capacity
            ],
            head: 0,
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.buf.len()
    }

    /// Append a sample, overwriting the oldest entry when full. O(1).
    pub fn push(&mut self, sample: Sample) {
        self.buf[self.head] = sample;
        self.head = (self.head + 1) % self.buf.len();
        if self.len < self.buf.len() {
            self.len += 1;
        }
    }

    /// Sample `frames_ago` positions back from the newest entry.
    /// `recent(0)` is the newest sample.
    pub fn recent(&self, frames_ago: usize) -> Option<&Sample> {
        if frames_ago >= self.len {
            return None;
        }
        let cap = self.buf.len();
        let idx = (self.head + cap - 1 - frames_ago) % cap;
        Some(&self.buf[idx])
    }

    /// All buffered samples with timestamps in `[start_ms, end_ms]`,
    /// oldest first.
    pub fn between(&self, start_ms: i64, end_ms: i64) -> Vec<Sample> {
        let mut out = Vec::new();
        for k in (0..self.len).rev() {
            if let Some(s) = self.recent(k).copied() {
                if s.timestamp_ms >= start_ms && s.timestamp_ms <= end_ms {
                    out.push(s);
                }
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

/// A confirmed heartbeat. Transient: consumed immediately by the
/// feature/model/estimation stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BeatEvent {
    pub peak_time_ms: i64,
    pub peak_value: f64,
    pub valley_time_ms: i64,
    pub valley_value: f64,
    pub ibi_ms: f64,
}

/// A detected local-extremum candidate inside the sample window.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSample {
    pub value: f64,
    pub timestamp_ms: i64,
    /// Position in frames counted back from the newest window entry.
    pub buffer_index: usize,
}

/// Rolling means of the morphological features, recomputed only when a new
/// non-duplicate pair is accepted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeatureAverages {
    pub v2p_rel_ttp: f64,
    pub p2v_rel_ttp: f64,
    pub v2p_amplitude: f64,
    pub p2v_amplitude: f64,
    pub augmentation_index: f64,
}

/// Raw morphological data exposed to collaborators (e.g. a training-data
/// logger) alongside the estimate callbacks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub augmentation_index: f64,
    pub rel_ttp_v2p: f64,
    pub rel_ttp_p2v: f64,
}

/// Per-beat waveform model output, passed by value to the estimators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaveformFit {
    /// Fitted fundamental amplitude.
    pub amplitude: f64,
    /// Fundamental phase in [0, 2π).
    pub phase: f64,
    /// DC offset of the beat.
    pub mean: f64,
    /// Fraction of the cycle spent falling from peak to valley.
    pub systole_ratio: f64,
    /// RMS departure from the idealized pulse.
    pub distortion: f64,
}

/// One blood pressure estimate together with its robust rolling averages.
///
/// Invariants: `sbp >= dbp + 10`, `sbp` in [60, 200], `dbp` in [40, 150].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BpEstimate {
    pub sbp: f64,
    pub dbp: f64,
    pub sbp_avg: f64,
    pub dbp_avg: f64,
}
