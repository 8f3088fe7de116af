use crate::core::label::FaceClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 内容哈希（SHA-256，小写十六进制），作为去重键
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// 每个分析过的上传对应一条，持久化由调用方负责
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub content_hash: String,
    pub content_link: Option<String>,
    pub content_source: Option<String>,
    /// 文件扩展名
    pub content_type: String,
    pub user_id: String,
    pub deepfake: Option<bool>,
    pub result: Option<String>,
    /// 百分制整数
    pub confidence_score: Option<i32>,
    pub timestamp: DateTime<Utc>,
    pub original_name: Option<String>,
}

impl DetectionRecord {
    pub fn new(content_hash: impl Into<String>, content_type: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            content_link: None,
            content_source: None,
            content_type: content_type.into(),
            user_id: user_id.into(),
            deepfake: None,
            result: None,
            confidence_score: None,
            timestamp: Utc::now(),
            original_name: None,
        }
    }

    /// 写入最终结论，置信度换算为百分比并四舍五入
    pub fn with_verdict(mut self, label: FaceClass, confidence: f32) -> Self {
        self.deepfake = Some(label.is_fake());
        self.result = Some(label.as_str().to_string());
        self.confidence_score = Some((confidence.clamp(0.0, 1.0) * 100.0).round() as i32);
        self
    }

    pub fn with_link(mut self, link: Option<String>) -> Self {
        self.content_link = link.filter(|l| !l.is_empty());
        self
    }

    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    /// 内容来源，如 "upload"；空字符串视为未知
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        self.content_source = (!source.is_empty()).then_some(source);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(content_hash(b"").len(), 64);
    }

    #[test]
    fn test_record_with_verdict() {
        let record = DetectionRecord::new("h", "mp4", "public_user")
            .with_verdict(FaceClass::DeepfakeLatest, 0.876)
            .with_link(Some("https://x/y.mp4".to_string()))
            .with_original_name("clip.mp4");
        assert_eq!(record.deepfake, Some(true));
        assert_eq!(record.result.as_deref(), Some("deepfake_latest"));
        assert_eq!(record.confidence_score, Some(88));
        assert_eq!(record.content_link.as_deref(), Some("https://x/y.mp4"));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["content_type"], "mp4");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_real_record_and_empty_link() {
        let record = DetectionRecord::new("h", "png", "u")
            .with_verdict(FaceClass::Real, 0.0)
            .with_link(Some(String::new()));
        assert_eq!(record.deepfake, Some(false));
        assert_eq!(record.confidence_score, Some(0));
        assert!(record.content_link.is_none());
    }

    #[test]
    fn test_record_source() {
        let record = DetectionRecord::new("h", "jpg", "u").with_source("upload");
        assert_eq!(record.content_source.as_deref(), Some("upload"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["content_source"], "upload");

        let unknown = DetectionRecord::new("h", "jpg", "u").with_source("");
        assert!(unknown.content_source.is_none());
    }
}
