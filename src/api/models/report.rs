use crate::core::aggregate::{LabelConfidence, VideoVerdict};
use crate::core::inference::FrameResult;
use crate::core::label::{FaceClass, FrameLabel};
use crate::core::record::DetectionRecord;
use crate::core::render::{Artifact, SuspiciousEvidence};
use crate::core::video::PixelRect;
use serde::{Deserialize, Serialize};

/// 上传内容的大类，按 MIME 类型判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    pub const VIDEO_TYPES: [&'static str; 6] = [
        "video/mp4",
        "video/avi",
        "video/mov",
        "video/wmv",
        "video/flv",
        "video/webm",
    ];
    pub const IMAGE_TYPES: [&'static str; 3] = ["image/jpeg", "image/png", "image/jpg"];

    pub fn from_mime(content_type: &str) -> Option<Self> {
        let mime = content_type.trim().to_ascii_lowercase();
        if Self::VIDEO_TYPES.contains(&mime.as_str()) {
            Some(MediaKind::Video)
        } else if Self::IMAGE_TYPES.contains(&mime.as_str()) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }

    pub fn allowed_types() -> String {
        Self::VIDEO_TYPES
            .iter()
            .chain(Self::IMAGE_TYPES.iter())
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// 单张图片的预测结果；没有可用人脸时结论为 real、各置信度为 0、无标注图
#[derive(Debug, Clone, Serialize)]
pub struct ImagePrediction {
    pub prediction: FaceClass,
    pub prediction_confidence: f32,
    pub real_confidence: f32,
    pub deepfake_og_confidence: f32,
    pub deepfake_confidence: f32,
    pub faces: Vec<PixelRect>,
    pub face_found: bool,
    #[serde(skip)]
    pub annotation: Option<Artifact>,
    /// 秒
    pub time_taken: f64,
}

/// 视频分析结果，产物留在内存里，由调用方决定是否上传
#[derive(Debug, Clone)]
pub struct VideoReport {
    pub frames: Vec<FrameResult>,
    pub verdict: VideoVerdict,
    pub timeline: Option<Artifact>,
    pub suspicious: Vec<SuspiciousEvidence>,
    pub scan_error: Option<String>,
    pub time_taken: f64,
}

impl VideoReport {
    pub fn label_confidence(&self) -> LabelConfidence {
        self.verdict.label_confidence
    }

    /// 一帧都没读出来并且扫描出错
    pub fn is_unreadable(&self) -> bool {
        self.frames.is_empty() && self.scan_error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFrame {
    pub frame_index: u64,
    pub label: FrameLabel,
    pub confidence: f32,
    pub url: String,
}

/// 上传分析接口的 JSON 响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub content_hash: String,
    pub prediction: FaceClass,
    pub prediction_confidence: f32,
    pub avg_real_confidence: f32,
    pub avg_deepfake_og_confidence: f32,
    pub avg_deepfake_confidence: f32,
    pub total_frames: usize,
    /// 上传失败时为空串
    pub timeseries_plot: String,
    pub heatmap_urls: Vec<String>,
    pub suspicious_frames: Vec<UploadedFrame>,
    /// 图片标注图地址
    pub image_url: String,
    pub file_url: String,
    pub time_taken: f64,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub response: AnalysisResponse,
    pub record: DetectionRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("video/mp4"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("VIDEO/WEBM"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("image/jpg"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("image/gif"), None);
        assert!(MediaKind::allowed_types().contains("video/flv, video/webm, image/jpeg"));
    }

    #[test]
    fn test_response_field_names() {
        let response = AnalysisResponse {
            kind: MediaKind::Video,
            content_hash: "h".to_string(),
            prediction: FaceClass::DeepfakeLatest,
            prediction_confidence: 0.5,
            avg_real_confidence: 0.0,
            avg_deepfake_og_confidence: 0.0,
            avg_deepfake_confidence: 0.5,
            total_frames: 2,
            timeseries_plot: String::new(),
            heatmap_urls: Vec::new(),
            suspicious_frames: Vec::new(),
            image_url: String::new(),
            file_url: String::new(),
            time_taken: 0.1,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["type"], "video");
        assert_eq!(json["prediction"], "deepfake_latest");
        assert!(json.get("avg_deepfake_confidence").is_some());
        assert!(json.get("heatmap_urls").is_some());
    }
}
