use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Construction-time configuration faults. These are the only fatal errors
/// in the library; everything at runtime is a transient, recoverable
/// rejection.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("sample window capacity must be positive")]
    ZeroWindowCapacity,
    #[error("frame rate must be positive, got {0}")]
    InvalidFrameRate(f64),
    #[error("fit sample count must be at least 4, got {0}")]
    FitSamplesTooSmall(usize),
    #[error("ibi window is empty: min {min} ms >= max {max} ms")]
    EmptyIbiWindow { min: f64, max: f64 },
    #[error("smoothing windows must be positive")]
    ZeroSmoothingWindow,
}

/// Two-stage moving-average conditioning applied to raw frame amplitudes
/// before they enter the sample window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub primary_window: usize,
    pub secondary_window: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            primary_window: 6,
            secondary_window: 4,
        }
    }
}

/// Parameters for the slope-run pulse detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Frames to hold off after a confirmed peak.
    pub refractory_frames: u32,
    /// Hard physiological IBI window (ms); 250–1200 ms is 50–240 bpm.
    pub min_ibi_ms: f64,
    pub max_ibi_ms: f64,
    /// Bounded BPM history used for the mean/σ band.
    pub bpm_history: usize,
    /// Relative band around the BPM history mean inside which the smoothed
    /// BPM/IBI outputs are updated.
    pub bpm_band: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            refractory_frames: 8,
            min_ibi_ms: 250.0,
            max_ibi_ms: 1200.0,
            bpm_history: 20,
            bpm_band: 0.10,
        }
    }
}

/// Thresholds for the four-way extremum search and pair acceptance.
///
/// Several of these are hand-tuned against noisy phone-camera PPG and should
/// be treated as empirical knobs, not physiological constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Extra frames added to the IBI-sized search span.
    pub guard_frames: usize,
    pub min_amplitude_gap: f64,
    pub min_time_gap_ms: f64,
    /// V2P time gap must lie in [IBI/8, 5×IBI].
    pub v2p_min_ibi_frac: f64,
    pub v2p_max_ibi_mult: f64,
    /// P2V time gap must lie in [min_time_gap_ms, 4×IBI] and below 7×IBI/8.
    pub p2v_max_ibi_mult: f64,
    pub p2v_max_ibi_frac: f64,
    pub v2p_max_index_gap: usize,
    pub p2v_max_index_gap: usize,
    /// Positional independence guard between the two extrema of a pair.
    pub min_position_gap: usize,
    /// Minimum time between accepted pairs of the same kind.
    pub accept_throttle_ms: i64,
    /// Amplitude tolerance for the repeated-detection de-dup rule.
    pub duplicate_amplitude_tol: f64,
    /// Pairs retained per side for the rolling means.
    pub pair_history: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            guard_frames: 10,
            min_amplitude_gap: 0.1,
            min_time_gap_ms: 10.0,
            v2p_min_ibi_frac: 0.125,
            v2p_max_ibi_mult: 5.0,
            p2v_max_ibi_mult: 4.0,
            p2v_max_ibi_frac: 0.875,
            v2p_max_index_gap: 150,
            p2v_max_index_gap: 120,
            min_position_gap: 3,
            accept_throttle_ms: 100,
            duplicate_amplitude_tol: 0.01,
            pair_history: 5,
        }
    }
}

/// Waveform modeling parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Fixed resampling count for the harmonic projection.
    pub fit_samples: usize,
    /// Fits with amplitude below this are rejected outright.
    pub min_amplitude_eps: f64,
    /// Fraction of the beat searched for the systolic peak.
    pub systole_search_frac: f64,
    /// Fallback when the peak→valley timing is implausible.
    pub default_systole_ratio: f64,
    pub min_systole_ratio: f64,
    pub max_systole_ratio: f64,
    /// Empirical peak-phase realignment stage; off by default.
    pub phase_warp: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            fit_samples: 64,
            min_amplitude_eps: 1e-6,
            systole_search_frac: 0.2,
            default_systole_ratio: 1.0 / 3.0,
            min_systole_ratio: 0.1,
            max_systole_ratio: 0.9,
            phase_warp: false,
        }
    }
}

/// Per-beat plausibility gates applied before estimation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub min_amplitude: f64,
    pub max_amplitude: f64,
    /// A beat whose IBI differs from the last valid beat by more than this
    /// fraction is rejected.
    pub max_ibi_change: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_amplitude: 0.5,
            max_amplitude: 50.0,
            max_ibi_change: 0.30,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ring buffer capacity; 240 is about 8 s at 30 fps.
    pub window_capacity: usize,
    pub frame_rate: f64,
    /// Sensor gain/ISO floor below which estimate output is suspended.
    pub gain_threshold: i32,
    pub smoothing: SmoothingConfig,
    pub detector: DetectorConfig,
    pub features: FeatureConfig,
    pub model: ModelConfig,
    pub validator: ValidatorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_capacity: 240,
            frame_rate: 30.0,
            gain_threshold: 500,
            smoothing: SmoothingConfig::default(),
            detector: DetectorConfig::default(),
            features: FeatureConfig::default(),
            model: ModelConfig::default(),
            validator: ValidatorConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / self.frame_rate
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::ZeroWindowCapacity);
        }
        if !(self.frame_rate > 0.0) {
            return Err(ConfigError::InvalidFrameRate(self.frame_rate));
        }
        if self.model.fit_samples < 4 {
            return Err(ConfigError::FitSamplesTooSmall(self.model.fit_samples));
        }
        if self.detector.min_ibi_ms >= self.detector.max_ibi_ms {
            return Err(ConfigError::EmptyIbiWindow {
                min: self.detector.min_ibi_ms,
                max: self.detector.max_ibi_ms,
            });
        }
        if self.smoothing.primary_window == 0 || self.smoothing.secondary_window == 0 {
            return Err(ConfigError::ZeroSmoothingWindow);
        }
        Ok(())
    }
}
