pub mod morphology;
pub mod robust;

pub use morphology::FeatureExtractor;
pub use robust::robust_average;
