use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Invalid media: {0}")]
    InvalidMedia(String),
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Model load failed: {0}")]
    ModelLoadFailed(String),
    #[error("Model not available: {0}")]
    ModelNotAvailable(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Video decode failed: {0}")]
    VideoDecode(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Scan cancelled")]
    Cancelled,
}

impl DetectError {
    /// 面向终端用户的错误描述（内部细节只写日志）
    pub fn user_message(&self) -> String {
        match self {
            DetectError::InvalidMedia(reason) => reason.clone(),
            DetectError::UnsupportedMediaType(kind) => format!("Invalid file type: {}", kind),
            DetectError::PayloadTooLarge { .. } => "File size exceeds allowed limit".to_string(),
            DetectError::Cancelled => "Processing was cancelled".to_string(),
            _ => "Processing failed".to_string(),
        }
    }
}

pub type DetectResult<T> = Result<T, DetectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_internal_detail() {
        let err = DetectError::Inference("session poisoned at node 42".to_string());
        assert_eq!(err.user_message(), "Processing failed");
        assert!(err.to_string().contains("node 42"));
    }

    #[test]
    fn test_user_message_keeps_validation_reason() {
        let err = DetectError::InvalidMedia("video has no decodable frames".to_string());
        assert_eq!(err.user_message(), "video has no decodable frames");

        let err = DetectError::PayloadTooLarge { size: 10, limit: 5 };
        assert_eq!(err.user_message(), "File size exceeds allowed limit");
    }
}
