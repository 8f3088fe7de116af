pub mod ffmpeg;
pub mod frame;
pub mod source;

#[cfg(feature = "backend-ffmpeg")]
pub use ffmpeg::FfmpegVideoSource;
pub use frame::{Frame, PixelRect};
pub use source::{MemoryVideoSource, VideoSource};
