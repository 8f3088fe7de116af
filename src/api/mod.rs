pub mod detector;
pub mod models;

pub use detector::{DeepfakeDetector, DetectApiError, VideoOpener};
