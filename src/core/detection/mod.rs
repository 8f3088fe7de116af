//! 检测协作方：人脸定位、叠加文字检测与遮挡
//!
//! 具体模型实现（ONNX）位于 `core::onnx`，这里只定义接口、后处理和测试替身。

pub mod face;
pub mod text;

pub use face::{non_max_suppression, FaceDetection, FaceLocalizer, MockFaceLocalizer, RelativeBox};
pub use text::{CaptionBandDetector, MockTextDetector, TextDetector, TextMasker, TextRegion};
