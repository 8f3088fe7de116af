pub mod report;

pub use report::{AnalysisResponse, ImagePrediction, MediaKind, UploadOutcome, UploadedFrame, VideoReport};
