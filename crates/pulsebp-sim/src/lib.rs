//! Deterministic synthetic PPG generation.
//!
//! Produces recordings good enough to exercise the whole pipeline: an
//! asymmetric pulse train with per-beat interval jitter, slow baseline
//! wander and white measurement noise. The same seed always yields the
//! same recording.

use anyhow::Context;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;

use pulsebp_lib::model::asymmetric_basis;
use pulsebp_lib::signal::Sample;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub duration_s: f64,
    pub frame_rate: f64,
    pub heart_rate_bpm: f64,
    /// Per-beat interval jitter as a fraction of the mean interval.
    pub hrv_frac: f64,
    pub pulse_amplitude: f64,
    pub systole_ratio: f64,
    /// Standard-deviation-like bound of the uniform white noise.
    pub noise: f64,
    pub baseline_amplitude: f64,
    pub baseline_period_s: f64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            duration_s: 60.0,
            frame_rate: 30.0,
            heart_rate_bpm: 72.0,
            hrv_frac: 0.03,
            pulse_amplitude: 10.0,
            systole_ratio: 1.0 / 3.0,
            noise: 0.05,
            baseline_amplitude: 1.0,
            baseline_period_s: 12.0,
            seed: 42,
        }
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading simulation config {}", path.display()))?;
        toml::from_str(&text).context("parsing simulation config")
    }
}

/// Generate one recording. Frame timestamps start at zero and advance by
/// the nominal frame interval; beat boundaries are tracked in continuous
/// time so interval jitter never accumulates rounding error.
pub fn generate(cfg: &SimConfig) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let frame_interval_ms = 1000.0 / cfg.frame_rate;
    let frames = (cfg.duration_s * cfg.frame_rate) as usize;
    let mean_ibi_ms = 60_000.0 / cfg.heart_rate_bpm;

    let mut beat_start_ms = 0.0;
    let mut beat_len_ms = jittered(&mut rng, mean_ibi_ms, cfg.hrv_frac);
    let mut out = Vec::with_capacity(frames);

    for i in 0..frames {
        let t_ms = i as f64 * frame_interval_ms;
        while t_ms >= beat_start_ms + beat_len_ms {
            beat_start_ms += beat_len_ms;
            beat_len_ms = jittered(&mut rng, mean_ibi_ms, cfg.hrv_frac);
        }
        let phase = (t_ms - beat_start_ms) / beat_len_ms;
        let pulse = cfg.pulse_amplitude * asymmetric_basis(phase, cfg.systole_ratio);
        let wander = cfg.baseline_amplitude
            * (2.0 * PI * t_ms / (cfg.baseline_period_s * 1000.0)).sin();
        let noise = if cfg.noise > 0.0 {
            rng.gen_range(-cfg.noise..=cfg.noise)
        } else {
            0.0
        };
        out.push(Sample {
            amplitude: pulse + wander + noise,
            timestamp_ms: t_ms.round() as i64,
        });
    }
    info!(
        "generated {} frames at {} fps, {} bpm nominal",
        out.len(),
        cfg.frame_rate,
        cfg.heart_rate_bpm
    );
    out
}

fn jittered(rng: &mut StdRng, mean: f64, frac: f64) -> f64 {
    if frac <= 0.0 {
        return mean;
    }
    mean * (1.0 + rng.gen_range(-frac..=frac))
}
