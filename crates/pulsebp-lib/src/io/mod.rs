pub mod recording;

pub use recording::{read_recording, write_estimates, write_recording, EstimateRow};
