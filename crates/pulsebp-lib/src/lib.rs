pub mod config;
pub mod detectors;
pub mod estimator;
pub mod io;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod signal;

pub use config::*;
pub use estimator::*;
pub use pipeline::*;
pub use signal::*;
