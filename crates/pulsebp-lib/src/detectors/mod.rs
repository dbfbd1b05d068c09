pub mod pulse;

pub use pulse::{PulseDetectorStrategy, SlopeRunDetector};
