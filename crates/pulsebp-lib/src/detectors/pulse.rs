use crate::config::DetectorConfig;
use crate::signal::{BeatEvent, SampleWindow};
use log::{debug, warn};

/// Streaming beat detection over the sample window.
///
/// Detection strategies are swapped at construction time; configuration
/// lives in plain structs rather than a type hierarchy.
pub trait PulseDetectorStrategy {
    /// Inspect the window after the newest sample was pushed and emit a
    /// beat if a local maximum has just been confirmed.
    fn on_sample(&mut self, window: &SampleWindow) -> Option<BeatEvent>;

    /// Smoothed inter-beat interval, updated only by beats inside the BPM
    /// history band.
    fn smoothed_ibi_ms(&self) -> Option<f64>;

    fn smoothed_bpm(&self) -> Option<f64>;

    fn reset(&mut self);
}

/// Slope-run peak confirmation: four strictly increasing samples followed by
/// a drop mark a local maximum one frame in the past, subject to a frame
/// refractory period and a hard physiological IBI window.
#[derive(Debug)]
pub struct SlopeRunDetector {
    cfg: DetectorConfig,
    frames_since_peak: u32,
    last_peak: Option<(i64, f64)>,
    bpm_history: Vec<f64>,
    smoothed_ibi: Option<f64>,
}

impl SlopeRunDetector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self {
            frames_since_peak: cfg.refractory_frames,
            cfg,
            last_peak: None,
            bpm_history: Vec::new(),
            smoothed_ibi: None,
        }
    }

    pub fn bpm_history_mean(&self) -> Option<f64> {
        if self.bpm_history.is_empty() {
            return None;
        }
        Some(self.bpm_history.iter().sum::<f64>() / self.bpm_history.len() as f64)
    }

    pub fn bpm_history_sd(&self) -> Option<f64> {
        let mean = self.bpm_history_mean()?;
        let n = self.bpm_history.len() as f64;
        let var = self
            .bpm_history
            .iter()
            .map(|b| (b - mean).powi(2))
            .sum::<f64>()
            / n;
        Some(var.sqrt())
    }

    fn slope_run_confirmed(&self, window: &SampleWindow) -> bool {
        if window.len() < 6 {
            return false;
        }
        let current = window.recent(0).map(|s| s.amplitude);
        let p: Vec<f64> = (1..=4)
            .filter_map(|k| window.recent(k).map(|s| s.amplitude))
            .collect();
        match (current, p.len()) {
            (Some(cur), 4) => p[0] > p[1] && p[1] > p[2] && p[2] > p[3] && p[0] > cur,
            _ => false,
        }
    }

    fn locate_valley(window: &SampleWindow, start_ms: i64, end_ms: i64) -> Option<(i64, f64)> {
        window
            .between(start_ms, end_ms)
            .iter()
            .min_by(|a, b| a.amplitude.total_cmp(&b.amplitude))
            .map(|s| (s.timestamp_ms, s.amplitude))
    }
}

impl PulseDetectorStrategy for SlopeRunDetector {
    fn on_sample(&mut self, window: &SampleWindow) -> Option<BeatEvent> {
        self.frames_since_peak = self.frames_since_peak.saturating_add(1);
        if self.frames_since_peak <= self.cfg.refractory_frames {
            return None;
        }
        if !self.slope_run_confirmed(window) {
            return None;
        }

        // The local maximum is the previous sample.
        let peak = *window.recent(1)?;
        self.frames_since_peak = 0;

        let previous = self.last_peak.replace((peak.timestamp_ms, peak.amplitude));
        let (prev_time, _) = match previous {
            Some(p) => p,
            None => {
                debug!("first peak anchored at t={}", peak.timestamp_ms);
                return None;
            }
        };

        let ibi_ms = (peak.timestamp_ms - prev_time) as f64;
        if ibi_ms < self.cfg.min_ibi_ms || ibi_ms > self.cfg.max_ibi_ms {
            warn!("beat dropped: IBI {ibi_ms:.0} ms outside physiological window");
            return None;
        }

        let bpm = 60_000.0 / ibi_ms;
        if self.bpm_history.len() >= self.cfg.bpm_history {
            self.bpm_history.remove(0);
        }
        self.bpm_history.push(bpm);

        // Beats outside the history band still produce events; they only
        // stop updating the smoothed outputs.
        if let Some(mean) = self.bpm_history_mean() {
            let band = mean * self.cfg.bpm_band;
            if (bpm - mean).abs() <= band {
                self.smoothed_ibi = Some(match self.smoothed_ibi {
                    Some(prev) => (prev + ibi_ms) / 2.0,
                    None => ibi_ms,
                });
            }
        }

        let (valley_time_ms, valley_value) =
            Self::locate_valley(window, prev_time, peak.timestamp_ms)
                .unwrap_or((peak.timestamp_ms, peak.amplitude));

        let bpm_sd = self.bpm_history_sd().unwrap_or(0.0);
        debug!(
            "beat confirmed: IBI {ibi_ms:.0} ms, peak {:.3}, valley {valley_value:.3}, bpm sd {bpm_sd:.1}",
            peak.amplitude
        );
        Some(BeatEvent {
            peak_time_ms: peak.timestamp_ms,
            peak_value: peak.amplitude,
            valley_time_ms,
            valley_value,
            ibi_ms,
        })
    }

    fn smoothed_ibi_ms(&self) -> Option<f64> {
        self.smoothed_ibi
    }

    fn smoothed_bpm(&self) -> Option<f64> {
        self.smoothed_ibi.map(|ibi| 60_000.0 / ibi)
    }

    fn reset(&mut self) {
        self.frames_since_peak = self.cfg.refractory_frames;
        self.last_peak = None;
        self.bpm_history.clear();
        self.smoothed_ibi = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Sample;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const FRAME_MS: f64 = 1000.0 / 30.0;

    fn feed(
        detector: &mut SlopeRunDetector,
        window: &mut SampleWindow,
        samples: &[f64],
    ) -> Vec<BeatEvent> {
        let mut beats = Vec::new();
        for (i, &v) in samples.iter().enumerate() {
            window.push(Sample {
                amplitude: v,
                timestamp_ms: (i as f64 * FRAME_MS).round() as i64,
            });
            if let Some(beat) = detector.on_sample(window) {
                beats.push(beat);
            }
        }
        beats
    }

    /// Triangle wave, 24 frames per period at 30 fps = 800 ms.
    fn triangle(cycles: usize, noise: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let period = 24usize;
        let mut out = Vec::with_capacity(cycles * period);
        for i in 0..cycles * period {
            let phase = i % period;
            let v = if phase < period / 2 {
                phase as f64 / (period / 2) as f64
            } else {
                1.0 - (phase - period / 2) as f64 / (period / 2) as f64
            };
            let n = if noise > 0.0 {
                rng.gen_range(-noise..=noise)
            } else {
                0.0
            };
            out.push(v + n);
        }
        out
    }

    #[test]
    fn triangle_ibis_match_period() {
        let mut detector = SlopeRunDetector::new(DetectorConfig::default());
        let mut window = SampleWindow::new(240).unwrap();
        let beats = feed(&mut detector, &mut window, &triangle(40, 0.02, 7));
        assert!(beats.len() >= 35, "too few beats: {}", beats.len());
        let tolerance = FRAME_MS + 1.0;
        let good = beats
            .iter()
            .filter(|b| (b.ibi_ms - 800.0).abs() <= tolerance)
            .count();
        let ratio = good as f64 / beats.len() as f64;
        assert!(ratio >= 0.95, "only {good}/{} beats within tolerance", beats.len());
    }

    #[test]
    fn implausible_ibi_is_dropped() {
        let mut detector = SlopeRunDetector::new(DetectorConfig::default());
        let mut window = SampleWindow::new(240).unwrap();
        // 60 frames per period = 2000 ms, slower than the 1200 ms floor.
        let period = 60usize;
        let mut samples = Vec::new();
        for i in 0..period * 4 {
            let phase = i % period;
            let v = if phase < period / 2 {
                phase as f64 / (period / 2) as f64
            } else {
                1.0 - (phase - period / 2) as f64 / (period / 2) as f64
            };
            samples.push(v);
        }
        let beats = feed(&mut detector, &mut window, &samples);
        assert!(beats.is_empty());
    }

    #[test]
    fn refractory_suppresses_double_fire() {
        let mut detector = SlopeRunDetector::new(DetectorConfig::default());
        let mut window = SampleWindow::new(240).unwrap();
        // A plateau with two tiny ripples inside the refractory span.
        let mut samples = vec![0.0, 0.2, 0.4, 0.6, 0.8, 0.7];
        samples.extend([0.72, 0.74, 0.76, 0.78, 0.6]);
        let beats = feed(&mut detector, &mut window, &samples);
        assert!(beats.is_empty());
    }

    #[test]
    fn smoothed_ibi_tracks_stable_rhythm() {
        let mut detector = SlopeRunDetector::new(DetectorConfig::default());
        let mut window = SampleWindow::new(240).unwrap();
        feed(&mut detector, &mut window, &triangle(20, 0.0, 1));
        let smoothed = detector.smoothed_ibi_ms().expect("smoothed ibi");
        assert!((smoothed - 800.0).abs() < 2.0 * FRAME_MS);
        // A metronomic rhythm leaves almost no spread in the BPM history.
        let sd = detector.bpm_history_sd().expect("bpm sd");
        assert!(sd < 1.0, "bpm sd too large: {sd}");
    }
}
