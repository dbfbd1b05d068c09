//! Frame-driven orchestration: conditioning, beat detection, feature
//! extraction, waveform fitting and the three regression variants.

use crate::config::PipelineConfig;
use crate::detectors::{PulseDetectorStrategy, SlopeRunDetector};
use crate::estimator::{BeatFeatures, CoefficientTable, EstimatorKind, StagedRegression};
use crate::metrics::FeatureExtractor;
use crate::model::WaveformModeler;
use crate::signal::{BeatEvent, BpEstimate, FeatureSnapshot, Sample, SampleWindow};
use log::{debug, info};

/// Two-stage moving average applied to raw frame amplitudes. The second,
/// shorter stage smooths the output of the first.
#[derive(Debug)]
struct Conditioner {
    primary: Vec<f64>,
    secondary: Vec<f64>,
    primary_window: usize,
    secondary_window: usize,
}

impl Conditioner {
    fn new(primary_window: usize, secondary_window: usize) -> Self {
        Self {
            primary: Vec::new(),
            secondary: Vec::new(),
            primary_window,
            secondary_window,
        }
    }

    fn smooth(&mut self, value: f64) -> f64 {
        let first = rolling(&mut self.primary, self.primary_window, value);
        rolling(&mut self.secondary, self.secondary_window, first)
    }

    fn reset(&mut self) {
        self.primary.clear();
        self.secondary.clear();
    }
}

fn rolling(buf: &mut Vec<f64>, window: usize, value: f64) -> f64 {
    if buf.len() >= window {
        buf.remove(0);
    }
    buf.push(value);
    buf.iter().sum::<f64>() / buf.len() as f64
}

/// Per-beat plausibility gate applied after detection and before
/// estimation. Tracks the last accepted IBI so a sudden rhythm jump is
/// rejected while gradual drift passes.
#[derive(Debug)]
struct BeatValidator {
    cfg: crate::config::ValidatorConfig,
    last_valid_ibi_ms: Option<f64>,
}

impl BeatValidator {
    fn new(cfg: crate::config::ValidatorConfig) -> Self {
        Self {
            cfg,
            last_valid_ibi_ms: None,
        }
    }

    fn accept(&mut self, beat: &BeatEvent) -> bool {
        let amplitude = beat.peak_value - beat.valley_value;
        if amplitude < self.cfg.min_amplitude || amplitude > self.cfg.max_amplitude {
            debug!("beat rejected: amplitude {amplitude:.2} out of range");
            return false;
        }
        if let Some(last) = self.last_valid_ibi_ms {
            let change = (beat.ibi_ms - last).abs() / last;
            if change > self.cfg.max_ibi_change {
                debug!(
                    "beat rejected: IBI changed {:.0}% from {last:.0} ms",
                    change * 100.0
                );
                return false;
            }
        }
        self.last_valid_ibi_ms = Some(beat.ibi_ms);
        true
    }

    fn reset(&mut self) {
        self.last_valid_ibi_ms = None;
    }
}

/// Receives every emitted estimate, once per estimator variant per beat.
pub trait EstimateListener {
    fn on_estimate(
        &mut self,
        kind: EstimatorKind,
        estimate: &BpEstimate,
        snapshot: &FeatureSnapshot,
    );
}

/// The streaming pipeline. Feed it one conditioned camera frame at a time
/// via [`on_frame`](Pipeline::on_frame); estimates come back through
/// registered listeners and [`last_estimate`](Pipeline::last_estimate).
///
/// A sensor gain below the configured threshold suspends estimate output
/// while samples keep buffering, so detection resumes without a warm-up gap
/// once the gain recovers.
pub struct Pipeline {
    cfg: PipelineConfig,
    window: SampleWindow,
    conditioner: Conditioner,
    detector: SlopeRunDetector,
    features: FeatureExtractor,
    modeler: WaveformModeler,
    validator: BeatValidator,
    estimators: Vec<StagedRegression>,
    listeners: Vec<Box<dyn EstimateListener>>,
    gate_open: bool,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Result<Self, crate::config::ConfigError> {
        Self::with_coefficients(cfg, &CoefficientTable::default())
    }

    pub fn with_coefficients(
        cfg: PipelineConfig,
        table: &CoefficientTable,
    ) -> Result<Self, crate::config::ConfigError> {
        cfg.validate()?;
        let window = SampleWindow::new(cfg.window_capacity)?;
        let frame_interval = cfg.frame_interval_ms();
        Ok(Self {
            window,
            conditioner: Conditioner::new(
                cfg.smoothing.primary_window,
                cfg.smoothing.secondary_window,
            ),
            detector: SlopeRunDetector::new(cfg.detector),
            features: FeatureExtractor::new(cfg.features, frame_interval),
            modeler: WaveformModeler::new(cfg.model),
            validator: BeatValidator::new(cfg.validator),
            estimators: EstimatorKind::ALL
                .iter()
                .map(|&kind| StagedRegression::new(kind, table))
                .collect(),
            listeners: Vec::new(),
            gate_open: true,
            cfg,
        })
    }

    pub fn add_listener(&mut self, listener: Box<dyn EstimateListener>) {
        self.listeners.push(listener);
    }

    /// Report a sensor gain/ISO reading. Values below the configured
    /// threshold close the output gate until a higher reading arrives.
    pub fn on_gain_changed(&mut self, gain: i32) {
        let open = gain >= self.cfg.gain_threshold;
        if open != self.gate_open {
            info!(
                "gain gate {}: gain {gain}, threshold {}",
                if open { "opened" } else { "closed" },
                self.cfg.gain_threshold
            );
        }
        self.gate_open = open;
    }

    pub fn gate_open(&self) -> bool {
        self.gate_open
    }

    /// Ingest one raw frame amplitude. Returns the confirmed beat when one
    /// is detected on this frame, whether or not the gate allowed it to
    /// produce estimates.
    pub fn on_frame(&mut self, amplitude: f64, timestamp_ms: i64) -> Option<BeatEvent> {
        let conditioned = self.conditioner.smooth(amplitude);
        self.window.push(Sample {
            amplitude: conditioned,
            timestamp_ms,
        });

        let beat = self.detector.on_sample(&self.window)?;
        self.features.on_beat(&self.window, beat.ibi_ms);

        if !self.validator.accept(&beat) {
            return Some(beat);
        }
        if !self.gate_open {
            debug!("estimates suppressed: gain gate closed");
            return Some(beat);
        }

        if let Some(features) = self.beat_features(&beat) {
            let snapshot = self.features.snapshot();
            for reg in &mut self.estimators {
                if let Some(est) = reg.estimate(&features) {
                    for listener in &mut self.listeners {
                        listener.on_estimate(reg.kind(), &est, &snapshot);
                    }
                }
            }
        }
        Some(beat)
    }

    fn beat_features(&mut self, beat: &BeatEvent) -> Option<BeatFeatures> {
        let fit = self.modeler.fit(&self.window, beat)?;
        let avg = self.features.averages();
        let hr_bpm = self
            .detector
            .smoothed_bpm()
            .unwrap_or(60_000.0 / beat.ibi_ms);
        Some(BeatFeatures {
            amplitude: fit.amplitude,
            hr_bpm,
            augmentation_index: avg.augmentation_index,
            rel_ttp_v2p: avg.v2p_rel_ttp,
            rel_ttp_p2v: avg.p2v_rel_ttp,
            morph_ratio: avg.augmentation_index / 100.0,
            ttp_over_pw: avg.v2p_rel_ttp * 100.0,
            distortion: fit.distortion,
        })
    }

    pub fn last_estimate(&self, kind: EstimatorKind) -> Option<BpEstimate> {
        self.estimators
            .iter()
            .find(|r| r.kind() == kind)
            .and_then(|r| r.last_estimate())
    }

    pub fn feature_snapshot(&self) -> FeatureSnapshot {
        self.features.snapshot()
    }

    pub fn smoothed_bpm(&self) -> Option<f64> {
        self.detector.smoothed_bpm()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Full reset: buffers, detector state, histories and the gate.
    pub fn reset(&mut self) {
        self.window.clear();
        self.conditioner.reset();
        self.detector.reset();
        self.features.reset();
        self.modeler.reset();
        self.validator.reset();
        for reg in &mut self.estimators {
            reg.reset();
        }
        self.gate_open = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::asymmetric_basis;
    use std::cell::RefCell;
    use std::rc::Rc;

    const FRAME_MS: f64 = 1000.0 / 30.0;

    /// Synthetic pulse train: asymmetric beats at the given period with a
    /// raw amplitude large enough to survive the conditioner.
    fn feed_pulses(pipeline: &mut Pipeline, frames: usize, period: usize) -> usize {
        let mut beats = 0;
        for i in 0..frames {
            let t = (i % period) as f64 / period as f64;
            let amplitude = 10.0 * asymmetric_basis(t + 0.5, 1.0 / 3.0);
            let ts = (i as f64 * FRAME_MS).round() as i64;
            if pipeline.on_frame(amplitude, ts).is_some() {
                beats += 1;
            }
        }
        beats
    }

    #[test]
    fn produces_estimates_from_a_clean_pulse_train() {
        let mut p = Pipeline::new(PipelineConfig::default()).unwrap();
        let beats = feed_pulses(&mut p, 600, 24);
        assert!(beats >= 10, "only {beats} beats detected");
        for kind in EstimatorKind::ALL {
            let est = p
                .last_estimate(kind)
                .unwrap_or_else(|| panic!("no estimate for {kind}"));
            assert!(est.sbp >= est.dbp + 10.0);
            assert!((60.0..=200.0).contains(&est.sbp));
            assert!((40.0..=150.0).contains(&est.dbp));
        }
    }

    #[test]
    fn closed_gate_suppresses_emissions_until_a_beat_after_reopen() {
        struct Counter(Rc<RefCell<usize>>);
        impl EstimateListener for Counter {
            fn on_estimate(
                &mut self,
                _kind: EstimatorKind,
                _estimate: &BpEstimate,
                _snapshot: &FeatureSnapshot,
            ) {
                *self.0.borrow_mut() += 1;
            }
        }

        let emitted = Rc::new(RefCell::new(0usize));
        let mut p = Pipeline::new(PipelineConfig::default()).unwrap();
        p.add_listener(Box::new(Counter(Rc::clone(&emitted))));

        feed_pulses(&mut p, 600, 24);
        assert!(*emitted.borrow() > 0);
        let frozen = p.last_estimate(EstimatorKind::SineParameter).unwrap();

        p.on_gain_changed(100);
        assert!(!p.gate_open());
        *emitted.borrow_mut() = 0;
        let mut beats_while_closed = 0;
        for i in 600..900 {
            let t = (i % 24) as f64 / 24.0;
            let amplitude = 10.0 * asymmetric_basis(t + 0.5, 1.0 / 3.0);
            let ts = (i as f64 * FRAME_MS).round() as i64;
            if p.on_frame(amplitude, ts).is_some() {
                beats_while_closed += 1;
            }
        }
        // Detection continues while the gate is closed, but nothing is
        // emitted and the last estimate stays frozen.
        assert!(beats_while_closed > 0);
        assert_eq!(*emitted.borrow(), 0);
        let during = p.last_estimate(EstimatorKind::SineParameter).unwrap();
        assert_eq!(during.sbp, frozen.sbp);
        assert_eq!(during.dbp, frozen.dbp);

        // Reopening alone emits nothing; the next valid beat does.
        p.on_gain_changed(800);
        assert!(p.gate_open());
        assert_eq!(*emitted.borrow(), 0);
        feed_pulses_offset(&mut p, 900, 1200, 24);
        assert!(*emitted.borrow() > 0);
    }

    fn feed_pulses_offset(pipeline: &mut Pipeline, start: usize, end: usize, period: usize) {
        for i in start..end {
            let t = (i % period) as f64 / period as f64;
            let amplitude = 10.0 * asymmetric_basis(t + 0.5, 1.0 / 3.0);
            let ts = (i as f64 * FRAME_MS).round() as i64;
            pipeline.on_frame(amplitude, ts);
        }
    }

    #[test]
    fn listener_receives_every_variant() {
        struct Collector(Rc<RefCell<Vec<EstimatorKind>>>);
        impl EstimateListener for Collector {
            fn on_estimate(
                &mut self,
                kind: EstimatorKind,
                _estimate: &BpEstimate,
                _snapshot: &FeatureSnapshot,
            ) {
                self.0.borrow_mut().push(kind);
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut p = Pipeline::new(PipelineConfig::default()).unwrap();
        p.add_listener(Box::new(Collector(Rc::clone(&seen))));
        feed_pulses(&mut p, 600, 24);

        let seen = seen.borrow();
        for kind in EstimatorKind::ALL {
            assert!(seen.contains(&kind), "no callback for {kind}");
        }
    }

    #[test]
    fn sudden_rhythm_jump_is_rejected_but_gradual_drift_passes() {
        let cfg = crate::config::ValidatorConfig::default();
        let mut v = BeatValidator::new(cfg);
        let beat = |ibi_ms: f64| BeatEvent {
            peak_time_ms: 0,
            peak_value: 10.0,
            valley_time_ms: -400,
            valley_value: 2.0,
            ibi_ms,
        };
        assert!(v.accept(&beat(800.0)));
        // 800 → 1100 is a 37% jump.
        assert!(!v.accept(&beat(1100.0)));
        // 800 → 1000 is 25%, inside the 30% bound.
        assert!(v.accept(&beat(1000.0)));
    }

    #[test]
    fn reset_clears_all_state() {
        let mut p = Pipeline::new(PipelineConfig::default()).unwrap();
        feed_pulses(&mut p, 600, 24);
        assert!(p.last_estimate(EstimatorKind::Morphological).is_some());
        p.reset();
        assert!(p.last_estimate(EstimatorKind::Morphological).is_none());
        assert!(p.smoothed_bpm().is_none());
        assert!(p.gate_open());
    }
}
