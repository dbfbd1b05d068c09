pub mod waveform;

pub use waveform::{asymmetric_basis, WaveformModeler};
