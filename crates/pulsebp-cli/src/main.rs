use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pulsebp_lib::{
    config::PipelineConfig,
    detectors::{PulseDetectorStrategy, SlopeRunDetector},
    estimator::{CoefficientTable, EstimatorKind},
    io::{read_recording, write_estimates, write_recording, EstimateRow},
    model::WaveformModeler,
    pipeline::Pipeline,
    signal::{Sample, SampleWindow},
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pulsebp",
    version,
    about = "Camera-PPG blood pressure estimation tools"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum EstimatorArg {
    #[value(name = "morphological")]
    Morphological,
    #[value(name = "sine-parameter")]
    SineParameter,
    #[value(name = "distortion-corrected")]
    DistortionCorrected,
}

impl std::fmt::Display for EstimatorArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(EstimatorKind::from(*self).as_str())
    }
}

impl From<EstimatorArg> for EstimatorKind {
    fn from(arg: EstimatorArg) -> Self {
        match arg {
            EstimatorArg::Morphological => EstimatorKind::Morphological,
            EstimatorArg::SineParameter => EstimatorKind::SineParameter,
            EstimatorArg::DistortionCorrected => EstimatorKind::DistortionCorrected,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recorded PPG trace through the full pipeline
    Run {
        #[arg(long)]
        input: PathBuf,
        /// Pipeline configuration TOML; defaults are used when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Refitted coefficient table TOML
        #[arg(long)]
        coefficients: Option<PathBuf>,
        /// Variant whose per-beat trace goes to --output
        #[arg(long, value_enum, default_value_t = EstimatorArg::SineParameter)]
        estimator: EstimatorArg,
        /// CSV estimate trace destination
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Generate a synthetic PPG recording
    Simulate {
        #[arg(long)]
        output: PathBuf,
        /// Simulation configuration TOML
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        duration_s: Option<f64>,
        #[arg(long)]
        heart_rate_bpm: Option<f64>,
    },
    /// Report the morphological feature averages for a recording
    Features {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Fit the last detected beat of a recording to the waveform model
    FitBeat {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            input,
            config,
            coefficients,
            estimator,
            output,
        } => cmd_run(&input, config, coefficients, estimator.into(), output),
        Commands::Simulate {
            output,
            config,
            seed,
            duration_s,
            heart_rate_bpm,
        } => cmd_simulate(&output, config, seed, duration_s, heart_rate_bpm),
        Commands::Features { input, config } => cmd_features(&input, config),
        Commands::FitBeat { input, config } => cmd_fit_beat(&input, config),
    }
}

fn load_pipeline_config(path: Option<PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(&p)
                .with_context(|| format!("reading config {}", p.display()))?;
            toml::from_str(&text).context("parsing pipeline config")
        }
        None => Ok(PipelineConfig::default()),
    }
}

#[derive(Serialize)]
struct VariantSummary {
    estimator: String,
    sbp: f64,
    dbp: f64,
    sbp_avg: f64,
    dbp_avg: f64,
}

#[derive(Serialize)]
struct RunSummary {
    frames: usize,
    beats: usize,
    trace_rows: usize,
    smoothed_bpm: Option<f64>,
    estimates: Vec<VariantSummary>,
}

fn cmd_run(
    input: &PathBuf,
    config: Option<PathBuf>,
    coefficients: Option<PathBuf>,
    trace_kind: EstimatorKind,
    output: Option<PathBuf>,
) -> Result<()> {
    let cfg = load_pipeline_config(config)?;
    let table = match coefficients {
        Some(p) => CoefficientTable::load(&p)?,
        None => CoefficientTable::default(),
    };
    let samples = read_recording(input)?;
    let mut pipeline = Pipeline::with_coefficients(cfg, &table)?;

    let mut beats = 0;
    let mut rows: Vec<EstimateRow> = Vec::new();
    for s in &samples {
        if let Some(beat) = pipeline.on_frame(s.amplitude, s.timestamp_ms) {
            beats += 1;
            if let Some(est) = pipeline.last_estimate(trace_kind) {
                let changed = rows
                    .last()
                    .map(|r| r.sbp != est.sbp || r.dbp != est.dbp)
                    .unwrap_or(true);
                if changed {
                    rows.push(EstimateRow {
                        timestamp_ms: beat.peak_time_ms,
                        sbp: est.sbp,
                        dbp: est.dbp,
                        sbp_avg: est.sbp_avg,
                        dbp_avg: est.dbp_avg,
                        hr_bpm: pipeline.smoothed_bpm().unwrap_or(60_000.0 / beat.ibi_ms),
                    });
                }
            }
        }
    }

    if let Some(path) = output {
        write_estimates(&path, &rows)?;
    }

    let estimates = EstimatorKind::ALL
        .iter()
        .filter_map(|&kind| {
            pipeline.last_estimate(kind).map(|est| VariantSummary {
                estimator: kind.to_string(),
                sbp: est.sbp,
                dbp: est.dbp,
                sbp_avg: est.sbp_avg,
                dbp_avg: est.dbp_avg,
            })
        })
        .collect();

    let summary = RunSummary {
        frames: samples.len(),
        beats,
        trace_rows: rows.len(),
        smoothed_bpm: pipeline.smoothed_bpm(),
        estimates,
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

#[derive(Serialize)]
struct SimulateSummary {
    frames: usize,
    duration_s: f64,
    heart_rate_bpm: f64,
    seed: u64,
}

fn cmd_simulate(
    output: &PathBuf,
    config: Option<PathBuf>,
    seed: Option<u64>,
    duration_s: Option<f64>,
    heart_rate_bpm: Option<f64>,
) -> Result<()> {
    let mut cfg = match config {
        Some(p) => pulsebp_sim::SimConfig::load(&p)?,
        None => pulsebp_sim::SimConfig::default(),
    };
    if let Some(seed) = seed {
        cfg.seed = seed;
    }
    if let Some(d) = duration_s {
        cfg.duration_s = d;
    }
    if let Some(hr) = heart_rate_bpm {
        cfg.heart_rate_bpm = hr;
    }

    let samples = pulsebp_sim::generate(&cfg);
    write_recording(output, &samples)?;
    let summary = SimulateSummary {
        frames: samples.len(),
        duration_s: cfg.duration_s,
        heart_rate_bpm: cfg.heart_rate_bpm,
        seed: cfg.seed,
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

#[derive(Serialize)]
struct FeatureSummary {
    beats: usize,
    smoothed_bpm: Option<f64>,
    augmentation_index: f64,
    rel_ttp_v2p: f64,
    rel_ttp_p2v: f64,
}

fn cmd_features(input: &PathBuf, config: Option<PathBuf>) -> Result<()> {
    let cfg = load_pipeline_config(config)?;
    let samples = read_recording(input)?;
    let mut pipeline = Pipeline::new(cfg)?;
    let mut beats = 0;
    for s in &samples {
        if pipeline.on_frame(s.amplitude, s.timestamp_ms).is_some() {
            beats += 1;
        }
    }
    let snapshot = pipeline.feature_snapshot();
    let summary = FeatureSummary {
        beats,
        smoothed_bpm: pipeline.smoothed_bpm(),
        augmentation_index: snapshot.augmentation_index,
        rel_ttp_v2p: snapshot.rel_ttp_v2p,
        rel_ttp_p2v: snapshot.rel_ttp_p2v,
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

fn cmd_fit_beat(input: &PathBuf, config: Option<PathBuf>) -> Result<()> {
    let cfg = load_pipeline_config(config)?;
    cfg.validate()?;
    let samples = read_recording(input)?;

    let mut window = SampleWindow::new(cfg.window_capacity)?;
    let mut detector = SlopeRunDetector::new(cfg.detector);
    let mut modeler = WaveformModeler::new(cfg.model);

    let mut last_fit = None;
    for s in &samples {
        window.push(Sample {
            amplitude: s.amplitude,
            timestamp_ms: s.timestamp_ms,
        });
        if let Some(beat) = detector.on_sample(&window) {
            if let Some(fit) = modeler.fit(&window, &beat) {
                last_fit = Some(fit);
            }
        }
    }

    let fit = last_fit.ok_or_else(|| anyhow!("no beat could be fitted in {}", input.display()))?;
    println!("{}", serde_json::to_string(&fit)?);
    Ok(())
}
