use std::f64::consts::PI;

use crate::config::ModelConfig;
use crate::signal::{BeatEvent, Sample, SampleWindow, WaveformFit};
use log::{debug, trace};

/// Idealized pulse shape evaluated at normalized beat time `t` in [0, 1].
///
/// The cycle starts at the systolic peak (value 1), falls to the diastolic
/// valley (value 0) over `[0, systole_ratio]`, then rises back to the peak
/// over `[systole_ratio, 1]`. Each segment sweeps a half cosine over its own
/// duration, which gives the characteristic fast-fall/slow-rise asymmetry.
pub fn asymmetric_basis(t: f64, systole_ratio: f64) -> f64 {
    let s = systole_ratio.clamp(0.01, 0.99);
    let t = t.rem_euclid(1.0);
    if t < s {
        (1.0 + (PI * t / s).cos()) / 2.0
    } else {
        (1.0 - (PI * (t - s) / (1.0 - s)).cos()) / 2.0
    }
}

/// Empirical peak-phase realignment: rate-limited, blended, then smoothed
/// over a short history. Disabled unless `ModelConfig::phase_warp` is set.
#[derive(Debug, Default)]
struct PhaseWarp {
    current: f64,
    history: Vec<f64>,
}

impl PhaseWarp {
    const MAX_STEP: f64 = PI / 4.0;
    const BLEND: f64 = 0.7;
    const HISTORY: usize = 3;

    fn update(&mut self, target: f64) -> f64 {
        let step = (target - self.current).clamp(-Self::MAX_STEP, Self::MAX_STEP);
        self.current += step * Self::BLEND;
        if self.history.len() >= Self::HISTORY {
            self.history.remove(0);
        }
        self.history.push(self.current);
        self.history.iter().sum::<f64>() / self.history.len() as f64
    }

    fn reset(&mut self) {
        self.current = 0.0;
        self.history.clear();
    }
}

/// Fits one beat of samples to a fundamental sinusoid plus the asymmetric
/// pulse shape, producing amplitude, phase, systole ratio and a distortion
/// score.
#[derive(Debug)]
pub struct WaveformModeler {
    cfg: ModelConfig,
    warp: PhaseWarp,
}

impl WaveformModeler {
    pub fn new(cfg: ModelConfig) -> Self {
        Self {
            cfg,
            warp: PhaseWarp::default(),
        }
    }

    pub fn reset(&mut self) {
        self.warp.reset();
    }

    /// Fit the beat segment ending at the confirmed peak. Returns `None`
    /// when the segment is too short or the fitted amplitude is degenerate.
    pub fn fit(&mut self, window: &SampleWindow, beat: &BeatEvent) -> Option<WaveformFit> {
        let start_ms = beat.peak_time_ms - beat.ibi_ms.round() as i64;
        let segment = window.between(start_ms, beat.peak_time_ms);
        if segment.len() < 4 {
            trace!("beat segment too short: {} samples", segment.len());
            return None;
        }

        let resampled = resample(&segment, self.cfg.fit_samples);
        let (amplitude, mut phase, mean) = harmonic_fit(&resampled);
        if amplitude < self.cfg.min_amplitude_eps {
            debug!("degenerate fit rejected: amplitude {amplitude:.2e}");
            return None;
        }

        let systole_ratio = self.systole_ratio(&segment, beat.ibi_ms);

        if self.cfg.phase_warp {
            let peak_idx = arg_max(&resampled);
            let observed = 2.0 * PI * peak_idx as f64 / resampled.len() as f64;
            phase = (phase + self.warp.update(observed - phase)).rem_euclid(2.0 * PI);
        }

        let distortion = distortion_rms(&resampled, amplitude, mean, systole_ratio);

        Some(WaveformFit {
            amplitude,
            phase,
            mean,
            systole_ratio,
            distortion,
        })
    }

    /// Measured fraction of the cycle between the systolic peak and the
    /// following valley. The peak must sit early in the beat; otherwise the
    /// timing is considered implausible and the fixed default is used.
    fn systole_ratio(&self, segment: &[Sample], ibi_ms: f64) -> f64 {
        let search = ((segment.len() as f64 * self.cfg.systole_search_frac) as usize).max(1);
        let peak = segment[..search.min(segment.len())]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.amplitude.total_cmp(&b.1.amplitude));
        let (peak_idx, peak_sample) = match peak {
            Some(p) => p,
            None => return self.cfg.default_systole_ratio,
        };
        let valley = segment[peak_idx..]
            .iter()
            .min_by(|a, b| a.amplitude.total_cmp(&b.amplitude));
        let valley = match valley {
            Some(v) => v,
            None => return self.cfg.default_systole_ratio,
        };

        let ratio = (valley.timestamp_ms - peak_sample.timestamp_ms) as f64 / ibi_ms;
        if ratio >= self.cfg.min_systole_ratio && ratio <= self.cfg.max_systole_ratio {
            ratio
        } else {
            self.cfg.default_systole_ratio
        }
    }
}

/// Linear resampling of the segment onto `n` uniformly spaced points.
fn resample(segment: &[Sample], n: usize) -> Vec<f64> {
    let first = segment[0].timestamp_ms as f64;
    let last = segment[segment.len() - 1].timestamp_ms as f64;
    let span = last - first;
    if span <= 0.0 {
        return vec![segment[0].amplitude; n];
    }
    let mut out = Vec::with_capacity(n);
    let mut j = 0;
    for i in 0..n {
        let t = first + span * i as f64 / (n - 1) as f64;
        while j + 1 < segment.len() - 1 && (segment[j + 1].timestamp_ms as f64) < t {
            j += 1;
        }
        let a = &segment[j];
        let b = &segment[j + 1];
        let dt = (b.timestamp_ms - a.timestamp_ms) as f64;
        let frac = if dt > 0.0 {
            ((t - a.timestamp_ms as f64) / dt).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(a.amplitude + (b.amplitude - a.amplitude) * frac);
    }
    out
}

/// Closed-form projection onto the fundamental over exactly one cycle.
/// Returns (amplitude, phase in [0, 2π), mean).
fn harmonic_fit(x: &[f64]) -> (f64, f64, f64) {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let mut a = 0.0;
    let mut b = 0.0;
    for (i, &v) in x.iter().enumerate() {
        let theta = 2.0 * PI * i as f64 / n;
        a += (v - mean) * theta.sin();
        b += (v - mean) * theta.cos();
    }
    a *= 2.0 / n;
    b *= 2.0 / n;
    let amplitude = (a * a + b * b).sqrt();
    let phase = b.atan2(a).rem_euclid(2.0 * PI);
    (amplitude, phase, mean)
}

fn arg_max(x: &[f64]) -> usize {
    x.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// RMS residual between the resampled beat and the idealized asymmetric
/// pulse, with the model peak aligned to the observed peak.
fn distortion_rms(x: &[f64], amplitude: f64, mean: f64, systole_ratio: f64) -> f64 {
    let n = x.len();
    let peak_idx = arg_max(x);
    let mut acc = 0.0;
    for (i, &v) in x.iter().enumerate() {
        let t = (i as f64 - peak_idx as f64) / n as f64;
        let model = mean + amplitude * (2.0 * asymmetric_basis(t, systole_ratio) - 1.0);
        let e = v - model;
        acc += e * e;
    }
    (acc / n as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Sample;

    fn window_of(values: &[(f64, i64)]) -> SampleWindow {
        let mut w = SampleWindow::new(240).unwrap();
        for &(amplitude, timestamp_ms) in values {
            w.push(Sample {
                amplitude,
                timestamp_ms,
            });
        }
        w
    }

    #[test]
    fn basis_hits_peak_and_valley() {
        let s = 1.0 / 3.0;
        assert!((asymmetric_basis(0.0, s) - 1.0).abs() < 1e-12);
        assert!(asymmetric_basis(s, s).abs() < 1e-12);
        assert!((asymmetric_basis(0.999_999, s) - 1.0).abs() < 1e-3);
        for i in 0..100 {
            let v = asymmetric_basis(i as f64 / 100.0, s);
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn recovers_pure_sine_parameters() {
        let n = 64;
        let true_amp = 3.5;
        let true_phase = 1.2;
        let x: Vec<f64> = (0..n)
            .map(|i| 7.0 + true_amp * (2.0 * PI * i as f64 / n as f64 + true_phase).sin())
            .collect();
        let (amplitude, phase, mean) = harmonic_fit(&x);
        assert!((amplitude - true_amp).abs() / true_amp < 0.01);
        assert!((phase - true_phase).abs() < 0.01);
        assert!((mean - 7.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_flat_segment() {
        let samples: Vec<(f64, i64)> = (0..30).map(|i| (5.0, i * 33)).collect();
        let w = window_of(&samples);
        let beat = BeatEvent {
            peak_time_ms: 29 * 33,
            peak_value: 5.0,
            valley_time_ms: 0,
            valley_value: 5.0,
            ibi_ms: 800.0,
        };
        let mut m = WaveformModeler::new(ModelConfig::default());
        assert!(m.fit(&w, &beat).is_none());
    }

    #[test]
    fn fit_is_deterministic() {
        let samples: Vec<(f64, i64)> = (0..30)
            .map(|i| {
                let t = i as f64 / 24.0;
                (10.0 * asymmetric_basis(t, 1.0 / 3.0), i * 33)
            })
            .collect();
        let w = window_of(&samples);
        let beat = BeatEvent {
            peak_time_ms: 29 * 33,
            peak_value: 10.0,
            valley_time_ms: 8 * 33,
            valley_value: 0.0,
            ibi_ms: 800.0,
        };
        let mut m1 = WaveformModeler::new(ModelConfig::default());
        let mut m2 = WaveformModeler::new(ModelConfig::default());
        let f1 = m1.fit(&w, &beat).unwrap();
        let f2 = m2.fit(&w, &beat).unwrap();
        assert_eq!(f1.amplitude, f2.amplitude);
        assert_eq!(f1.phase, f2.phase);
        assert_eq!(f1.distortion, f2.distortion);
    }

    #[test]
    fn clean_pulse_has_low_distortion() {
        let samples: Vec<(f64, i64)> = (0..48)
            .map(|i| {
                let t = i as f64 / 24.0;
                (10.0 * asymmetric_basis(t, 1.0 / 3.0), i * 33)
            })
            .collect();
        let w = window_of(&samples);
        let beat = BeatEvent {
            peak_time_ms: 47 * 33,
            peak_value: 10.0,
            valley_time_ms: 40 * 33,
            valley_value: 0.0,
            ibi_ms: 800.0,
        };
        let mut m = WaveformModeler::new(ModelConfig::default());
        let fit = m.fit(&w, &beat).unwrap();
        assert!(fit.distortion < fit.amplitude);
        assert!((0.0..2.0 * PI).contains(&fit.phase));
    }
}
