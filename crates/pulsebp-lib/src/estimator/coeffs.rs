use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Linear weights for one pressure channel. Field units match
/// [`BeatFeatures`](super::BeatFeatures); a zero weight removes the term.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageCoeffs {
    pub base: f64,
    pub amplitude: f64,
    pub heart_rate: f64,
    /// Weight on the augmentation index expressed as a percentage.
    pub augmentation: f64,
    /// Weight on the V2P/(V2P+P2V) amplitude ratio in [0, 1].
    pub morph_ratio: f64,
    /// Weight on the time-to-peak over pulse-width percentage.
    pub ttp_over_pw: f64,
    pub ttp_v2p: f64,
    pub ttp_p2v: f64,
    /// Vascular stage weight on distortion × √amplitude.
    pub stiffness: f64,
    /// Residual-correction stage weight on the raw distortion score.
    pub distortion: f64,
}

/// Systolic and diastolic weights for one estimator variant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoefficientSet {
    pub sbp: StageCoeffs,
    pub dbp: StageCoeffs,
}

/// All three built-in variants; loadable from TOML so field studies can
/// refit without rebuilding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CoefficientTable {
    pub morphological: CoefficientSet,
    pub sine_parameter: CoefficientSet,
    pub distortion_corrected: CoefficientSet,
}

impl Default for CoefficientTable {
    fn default() -> Self {
        Self {
            morphological: CoefficientSet {
                sbp: StageCoeffs {
                    base: 79.0,
                    heart_rate: 0.55,
                    morph_ratio: 62.0,
                    ttp_over_pw: 0.24,
                    ..Default::default()
                },
                dbp: StageCoeffs {
                    base: 46.0,
                    heart_rate: 0.35,
                    morph_ratio: 38.0,
                    ttp_over_pw: 0.17,
                    ..Default::default()
                },
            },
            sine_parameter: CoefficientSet {
                sbp: StageCoeffs {
                    base: 80.0,
                    amplitude: 5.0,
                    heart_rate: 0.3,
                    augmentation: 0.3,
                    ttp_v2p: 5.0,
                    stiffness: 0.01,
                    distortion: 0.1,
                    ..Default::default()
                },
                dbp: StageCoeffs {
                    base: 60.0,
                    amplitude: 3.0,
                    heart_rate: 0.15,
                    augmentation: 0.2,
                    ttp_v2p: 3.0,
                    stiffness: 0.005,
                    distortion: 0.05,
                    ..Default::default()
                },
            },
            distortion_corrected: CoefficientSet {
                sbp: StageCoeffs {
                    base: 80.0,
                    amplitude: 5.0,
                    heart_rate: 0.3,
                    ttp_v2p: 5.0,
                    ttp_p2v: 3.0,
                    stiffness: 0.1,
                    distortion: 0.1,
                    ..Default::default()
                },
                dbp: StageCoeffs {
                    base: 60.0,
                    amplitude: 3.0,
                    heart_rate: 0.15,
                    ttp_v2p: 3.0,
                    ttp_p2v: 2.0,
                    stiffness: 0.05,
                    distortion: 0.05,
                    ..Default::default()
                },
            },
        }
    }
}

impl CoefficientTable {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("parsing coefficient table")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading coefficient table {}", path.display()))?;
        Self::from_toml(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_fitted_models() {
        let t = CoefficientTable::default();
        assert_eq!(t.morphological.sbp.base, 79.0);
        assert_eq!(t.morphological.dbp.base, 46.0);
        assert_eq!(t.sine_parameter.sbp.augmentation, 0.3);
        // The corrected variant folds the AI term into the residual stage.
        assert_eq!(t.distortion_corrected.sbp.augmentation, 0.0);
        assert_eq!(t.distortion_corrected.sbp.ttp_p2v, 3.0);
    }

    #[test]
    fn partial_toml_overlays_defaults() {
        let t = CoefficientTable::from_toml(
            "[morphological.sbp]\nbase = 85.0\n",
        )
        .unwrap();
        assert_eq!(t.morphological.sbp.base, 85.0);
        // Unset fields within an overridden section fall back to zero,
        // not the built-in variant values.
        assert_eq!(t.morphological.sbp.heart_rate, 0.0);
        assert_eq!(t.sine_parameter.sbp.base, 80.0);
    }
}
