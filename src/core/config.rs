use crate::core::error::DetectResult;
use crate::core::features::DEFAULT_RESIZE;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_ANON_KEY";

/// 检测器总配置，JSON 中缺省的字段取默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub models: ModelConfig,
    pub inference: InferenceConfig,
    pub aggregation: AggregationConfig,
    pub render: RenderConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
}

impl DetectorConfig {
    pub fn from_json_str(json: &str) -> DetectResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> DetectResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        info!("⚙️ Loaded detector config from {}", path.display());
        Ok(config)
    }

    /// 用环境变量覆盖对象存储的地址和密钥
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(ENV_SUPABASE_URL).filter(|v| !v.is_empty());
        let key = lookup(ENV_SUPABASE_KEY).filter(|v| !v.is_empty());
        if let StorageConfig::Supabase {
            base_url, api_key, ..
        } = &mut self.storage
        {
            if let Some(url) = url {
                *base_url = url;
            }
            if let Some(key) = key {
                *api_key = key;
            }
            return self;
        }

        // 本地存储只有在地址和密钥都给出时才切换
        if let (Some(url), Some(key)) = (url, key) {
            info!("⚙️ {} set, switching artifact storage to Supabase", ENV_SUPABASE_URL);
            self.storage = StorageConfig::Supabase {
                base_url: url,
                bucket: DEFAULT_BUCKET.to_string(),
                api_key: key,
            };
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// β 描述子分类器
    pub classifier_path: PathBuf,
    /// 人脸检测模型（UltraFace RFB-320）
    pub face_detector_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            classifier_path: PathBuf::from("models/face_crops_best_xgb_model.onnx"),
            face_detector_path: PathBuf::from("models/version-RFB-320.onnx"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub face_min_confidence: f32,
    pub text_min_score: f32,
    pub mask_fill: [u8; 3],
    pub descriptor_resize: u32,
    pub nms_iou: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            face_min_confidence: 0.5,
            text_min_score: 0.25,
            mask_fill: [255, 255, 255],
            descriptor_resize: DEFAULT_RESIZE,
            nms_iou: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub suspicious_limit: usize,
    /// 无人脸帧是否参与可疑帧排序
    pub include_no_face_in_suspicious: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            suspicious_limit: 10,
            include_no_face_in_suspicious: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub timeline_width: u32,
    pub timeline_height: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            timeline_width: 1800,
            timeline_height: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_bytes: usize,
    pub user_id: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            user_id: "public_user".to_string(),
        }
    }
}

pub const DEFAULT_BUCKET: &str = "heatmaps";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    Local {
        root: PathBuf,
        /// 生成 URL 时使用的前缀，缺省为 file://
        #[serde(default)]
        public_base_url: Option<String>,
    },
    Supabase {
        base_url: String,
        #[serde(default = "default_bucket")]
        bucket: String,
        #[serde(default)]
        api_key: String,
    },
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local {
            root: std::env::temp_dir().join("deepfake_artifacts"),
            public_base_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.inference.face_min_confidence, 0.5);
        assert_eq!(config.inference.text_min_score, 0.25);
        assert_eq!(config.inference.mask_fill, [255, 255, 255]);
        assert_eq!(config.aggregation.suspicious_limit, 10);
        assert!(!config.aggregation.include_no_face_in_suspicious);
        assert_eq!(config.upload.max_bytes, 52_428_800);
        assert_eq!(config.upload.user_id, "public_user");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = DetectorConfig::from_json_str(
            r#"{
                "aggregation": { "suspicious_limit": 3 },
                "storage": { "kind": "supabase", "base_url": "https://example.supabase.co" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.aggregation.suspicious_limit, 3);
        assert!(!config.aggregation.include_no_face_in_suspicious);
        assert_eq!(config.inference.nms_iou, 0.3);
        match config.storage {
            StorageConfig::Supabase { bucket, api_key, .. } => {
                assert_eq!(bucket, "heatmaps");
                assert!(api_key.is_empty());
            }
            other => panic!("unexpected storage {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = DetectorConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, crate::core::error::DetectError::Config(_)));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detector.json");
        std::fs::write(&path, r#"{ "upload": { "user_id": "alice" } }"#).unwrap();
        let config = DetectorConfig::from_json_file(&path).unwrap();
        assert_eq!(config.upload.user_id, "alice");
        assert_eq!(config.upload.max_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn test_env_overrides_supabase_key() {
        let config = DetectorConfig {
            storage: StorageConfig::Supabase {
                base_url: "https://old.example".to_string(),
                bucket: "heatmaps".to_string(),
                api_key: String::new(),
            },
            ..Default::default()
        };
        let config = config.with_overrides_from(|name| match name {
            ENV_SUPABASE_KEY => Some("secret".to_string()),
            _ => None,
        });
        match config.storage {
            StorageConfig::Supabase { base_url, api_key, .. } => {
                assert_eq!(base_url, "https://old.example");
                assert_eq!(api_key, "secret");
            }
            other => panic!("unexpected storage {:?}", other),
        }
    }

    #[test]
    fn test_env_switches_local_to_supabase() {
        let config = DetectorConfig::default().with_overrides_from(|name| match name {
            ENV_SUPABASE_URL => Some("https://proj.supabase.co".to_string()),
            ENV_SUPABASE_KEY => Some("anon".to_string()),
            _ => None,
        });
        assert!(matches!(config.storage, StorageConfig::Supabase { .. }));

        let untouched = DetectorConfig::default().with_overrides_from(|_| None);
        assert!(matches!(untouched.storage, StorageConfig::Local { .. }));
    }
}
