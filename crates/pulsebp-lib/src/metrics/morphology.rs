use crate::config::FeatureConfig;
use crate::signal::{FeatureAverages, FeatureSample, FeatureSnapshot, SampleWindow};
use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extremum {
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairKind {
    ValleyToPeak,
    PeakToValley,
}

/// One accepted extremum pair with its derived features.
#[derive(Debug, Clone, Copy)]
struct ExtremumPair {
    amplitude: f64,
    rel_ttp: f64,
    index_gap: usize,
}

/// Morphological feature extraction over the sample window.
///
/// Runs four independent extremum searches per beat over disjoint
/// IBI-sized half-windows: a valley→peak pair and a peak→valley pair are
/// located separately so that neither detection can anchor the other.
/// Accepted pairs feed bounded histories from which the rolling feature
/// means and the augmentation index are recomputed.
#[derive(Debug)]
pub struct FeatureExtractor {
    cfg: FeatureConfig,
    frame_interval_ms: f64,
    v2p_history: Vec<ExtremumPair>,
    p2v_history: Vec<ExtremumPair>,
    last_v2p_accept_ms: Option<i64>,
    last_p2v_accept_ms: Option<i64>,
    averages: FeatureAverages,
}

impl FeatureExtractor {
    pub fn new(cfg: FeatureConfig, frame_interval_ms: f64) -> Self {
        Self {
            cfg,
            frame_interval_ms,
            v2p_history: Vec::new(),
            p2v_history: Vec::new(),
            last_v2p_accept_ms: None,
            last_p2v_accept_ms: None,
            averages: FeatureAverages::default(),
        }
    }

    pub fn averages(&self) -> FeatureAverages {
        self.averages
    }

    pub fn snapshot(&self) -> FeatureSnapshot {
        FeatureSnapshot {
            augmentation_index: self.averages.augmentation_index,
            rel_ttp_v2p: self.averages.v2p_rel_ttp,
            rel_ttp_p2v: self.averages.p2v_rel_ttp,
        }
    }

    pub fn reset(&mut self) {
        self.v2p_history.clear();
        self.p2v_history.clear();
        self.last_v2p_accept_ms = None;
        self.last_p2v_accept_ms = None;
        self.averages = FeatureAverages::default();
    }

    /// Side-effect-only beat hook: search the window, accept at most one
    /// pair per kind, and refresh the rolling means when something new
    /// arrived.
    pub fn on_beat(&mut self, window: &SampleWindow, ibi_ms: f64) {
        if ibi_ms <= 0.0 || window.len() < 8 {
            return;
        }
        let now_ms = match window.recent(0) {
            Some(s) => s.timestamp_ms,
            None => return,
        };

        let span = self.search_span(window, ibi_ms);
        let half = span / 2;
        if half < 4 {
            return;
        }

        // Positions count back from the newest sample, so larger positions
        // are older. V2P: valley in the older half, peak in the newer half.
        // P2V uses sub-ranges offset from both to force positional
        // independence.
        let v2p_valley = self.search(window, half, span.saturating_sub(2), Extremum::Min);
        let v2p_peak = self.search(window, 2, half, Extremum::Max);
        let p2v_peak = self.search(window, half + 2, span.saturating_sub(2), Extremum::Max);
        let p2v_valley = self.search(window, 2, half.saturating_sub(2), Extremum::Min);

        let mut updated = false;
        if let (Some(valley), Some(peak)) = (v2p_valley, v2p_peak) {
            updated |= self.try_accept(PairKind::ValleyToPeak, valley, peak, ibi_ms, now_ms);
        }
        if let (Some(peak), Some(valley)) = (p2v_peak, p2v_valley) {
            updated |= self.try_accept(PairKind::PeakToValley, peak, valley, ibi_ms, now_ms);
        }
        if updated {
            self.recompute_averages();
        }
    }

    /// Number of window positions covered by one IBI plus the guard frames,
    /// capped below the buffer capacity.
    fn search_span(&self, window: &SampleWindow, ibi_ms: f64) -> usize {
        let frames = (ibi_ms / self.frame_interval_ms).round() as usize + self.cfg.guard_frames;
        frames
            .min(window.capacity().saturating_sub(5))
            .min(window.len().saturating_sub(2))
    }

    /// Best strict local extremum with position in `[start, end)`.
    fn search(
        &self,
        window: &SampleWindow,
        start: usize,
        end: usize,
        kind: Extremum,
    ) -> Option<FeatureSample> {
        let mut best: Option<FeatureSample> = None;
        for pos in start.max(1)..end {
            let (prev, cur, next) = match (
                window.recent(pos + 1),
                window.recent(pos),
                window.recent(pos - 1),
            ) {
                (Some(p), Some(c), Some(n)) => (p.amplitude, *c, n.amplitude),
                _ => continue,
            };
            let is_local = match kind {
                Extremum::Min => cur.amplitude < prev && cur.amplitude < next,
                Extremum::Max => cur.amplitude > prev && cur.amplitude > next,
            };
            if !is_local {
                continue;
            }
            let better = match (&best, kind) {
                (None, _) => true,
                (Some(b), Extremum::Min) => cur.amplitude < b.value,
                (Some(b), Extremum::Max) => cur.amplitude > b.value,
            };
            if better {
                best = Some(FeatureSample {
                    value: cur.amplitude,
                    timestamp_ms: cur.timestamp_ms,
                    buffer_index: pos,
                });
            }
        }
        best
    }

    /// Validate a candidate pair; `first` is the chronologically earlier
    /// extremum. Returns true when the pair entered the history.
    fn try_accept(
        &mut self,
        kind: PairKind,
        first: FeatureSample,
        second: FeatureSample,
        ibi_ms: f64,
        now_ms: i64,
    ) -> bool {
        let amplitude = (second.value - first.value).abs();
        if amplitude <= self.cfg.min_amplitude_gap {
            return false;
        }

        // Pattern check: the peak side must actually sit above the valley.
        let pattern_ok = match kind {
            PairKind::ValleyToPeak => second.value > first.value,
            PairKind::PeakToValley => first.value > second.value,
        };
        if !pattern_ok {
            return false;
        }

        let dt = (second.timestamp_ms - first.timestamp_ms).abs() as f64;
        let timing_ok = match kind {
            PairKind::ValleyToPeak => {
                dt >= self.cfg.min_time_gap_ms.max(ibi_ms * self.cfg.v2p_min_ibi_frac)
                    && dt <= ibi_ms * self.cfg.v2p_max_ibi_mult
            }
            PairKind::PeakToValley => {
                dt >= self.cfg.min_time_gap_ms
                    && dt <= ibi_ms * self.cfg.p2v_max_ibi_mult
                    && dt <= ibi_ms * self.cfg.p2v_max_ibi_frac
            }
        };
        if !timing_ok {
            return false;
        }

        let index_gap = first.buffer_index.abs_diff(second.buffer_index);
        let max_gap = match kind {
            PairKind::ValleyToPeak => self.cfg.v2p_max_index_gap,
            PairKind::PeakToValley => self.cfg.p2v_max_index_gap,
        };
        if index_gap > max_gap || index_gap < self.cfg.min_position_gap {
            return false;
        }

        // Throttle repeated acceptance of the same kind.
        let last_accept = match kind {
            PairKind::ValleyToPeak => self.last_v2p_accept_ms,
            PairKind::PeakToValley => self.last_p2v_accept_ms,
        };
        if let Some(last) = last_accept {
            if now_ms - last <= self.cfg.accept_throttle_ms {
                return false;
            }
        }

        let pair = ExtremumPair {
            amplitude,
            rel_ttp: dt / ibi_ms,
            index_gap,
        };

        // De-dup against the immediately preceding accepted pair: identical
        // (amplitude, index separation) means the search re-triggered on a
        // stationary waveform segment.
        let history = match kind {
            PairKind::ValleyToPeak => &mut self.v2p_history,
            PairKind::PeakToValley => &mut self.p2v_history,
        };
        if let Some(prev) = history.last() {
            if (prev.amplitude - pair.amplitude).abs() < self.cfg.duplicate_amplitude_tol
                && prev.index_gap == pair.index_gap
            {
                debug!("{kind:?} duplicate pair skipped");
                return false;
            }
        }

        if history.len() >= self.cfg.pair_history {
            history.remove(0);
        }
        history.push(pair);
        match kind {
            PairKind::ValleyToPeak => self.last_v2p_accept_ms = Some(now_ms),
            PairKind::PeakToValley => self.last_p2v_accept_ms = Some(now_ms),
        }
        debug!(
            "{kind:?} accepted: amplitude {amplitude:.3}, relTTP {:.3}, gap {index_gap}",
            pair.rel_ttp
        );
        true
    }

    fn recompute_averages(&mut self) {
        fn mean(values: impl Iterator<Item = f64>, n: usize) -> f64 {
            if n == 0 {
                0.0
            } else {
                values.sum::<f64>() / n as f64
            }
        }

        let nv = self.v2p_history.len();
        let np = self.p2v_history.len();
        self.averages.v2p_rel_ttp = mean(self.v2p_history.iter().map(|p| p.rel_ttp), nv);
        self.averages.v2p_amplitude = mean(self.v2p_history.iter().map(|p| p.amplitude), nv);
        self.averages.p2v_rel_ttp = mean(self.p2v_history.iter().map(|p| p.rel_ttp), np);
        self.averages.p2v_amplitude = mean(self.p2v_history.iter().map(|p| p.amplitude), np);

        let total = self.averages.v2p_amplitude + self.averages.p2v_amplitude;
        if total > 0.0 {
            self.averages.augmentation_index = self.averages.v2p_amplitude / total * 100.0;
        } else if self.averages.v2p_amplitude > 0.0 {
            self.averages.augmentation_index = 100.0;
        } else if self.averages.p2v_amplitude > 0.0 {
            self.averages.augmentation_index = 0.0;
        }

        // Out-of-range values indicate a detection anomaly; they are
        // reported, never clamped.
        let a = &self.averages;
        if !(0.0..=100.0).contains(&a.augmentation_index) {
            warn!("augmentation index out of range: {:.2}", a.augmentation_index);
        }
        if !(0.0..=1.0).contains(&a.v2p_rel_ttp) || !(0.0..=1.0).contains(&a.p2v_rel_ttp) {
            warn!(
                "relTTP out of range: v2p {:.3}, p2v {:.3}",
                a.v2p_rel_ttp, a.p2v_rel_ttp
            );
        }
    }
}
