//! 证据与原始媒体的对象存储
//!
//! 键形如 `{user_id}/{content_hash}/{file_name}`，内容类型由扩展名推断。

use crate::core::config::StorageConfig;
use crate::core::error::{DetectError, DetectResult};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;

static UNSAFE_KEY_CHARS: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._\-]+"));

pub trait ArtifactStore: Send + Sync {
    /// 写入对象并返回可公开访问的地址
    fn put(&self, key: &str, bytes: &[u8]) -> DetectResult<String>;

    fn describe(&self) -> String;
}

pub fn content_type_for(key: &str) -> &'static str {
    let ext = Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// 去掉空段和 `.`/`..`，其余不安全字符替换为下划线
pub fn sanitize_key(key: &str) -> DetectResult<String> {
    let unsafe_chars = UNSAFE_KEY_CHARS
        .as_ref()
        .map_err(|e| DetectError::Storage(format!("key pattern: {e}")))?;
    Ok(key
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(|segment| unsafe_chars.replace_all(segment, "_").into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

fn checked_key(key: &str) -> DetectResult<String> {
    let key = sanitize_key(key)?;
    if key.is_empty() {
        return Err(DetectError::Storage("empty storage key".to_string()));
    }
    Ok(key)
}

/// 本地目录存储（开发和测试）
pub struct LocalArtifactStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalArtifactStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn put(&self, key: &str, bytes: &[u8]) -> DetectResult<String> {
        let key = checked_key(key)?;
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        debug!("💾 Stored {} ({} bytes, {})", key, bytes.len(), content_type_for(&key));
        Ok(match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!("file://{}", path.display()),
        })
    }

    fn describe(&self) -> String {
        format!("local({})", self.root.display())
    }
}

/// Supabase Storage REST 接口
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    bucket: String,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(base_url: &str, bucket: &str, api_key: &str) -> DetectResult<Self> {
        if base_url.trim().is_empty() {
            return Err(DetectError::Storage("Supabase URL is not configured".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| DetectError::Storage(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn upload_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, key)
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, self.bucket, key)
    }
}

impl ArtifactStore for SupabaseStore {
    fn put(&self, key: &str, bytes: &[u8]) -> DetectResult<String> {
        let key = checked_key(key)?;
        let resp = self
            .client
            .post(self.upload_url(&key))
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header("content-type", content_type_for(&key))
            .header("x-upsert", "true")
            .body(bytes.to_vec())
            .send()
            .map_err(|e| DetectError::Storage(format!("upload {key}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(DetectError::Storage(format!("upload {key} failed ({status}): {body}")));
        }
        info!("☁️ Uploaded {} ({} bytes)", key, bytes.len());
        Ok(self.public_url(&key))
    }

    fn describe(&self) -> String {
        format!("supabase({}/{})", self.base_url, self.bucket)
    }
}

pub fn store_from_config(config: &StorageConfig) -> DetectResult<Box<dyn ArtifactStore>> {
    match config {
        StorageConfig::Local {
            root,
            public_base_url,
        } => {
            let mut store = LocalArtifactStore::new(root.clone());
            if let Some(base) = public_base_url {
                store = store.with_public_base_url(base.clone());
            }
            Ok(Box::new(store))
        }
        StorageConfig::Supabase {
            base_url,
            bucket,
            api_key,
        } => Ok(Box::new(SupabaseStore::new(base_url, bucket, api_key)?)),
    }
}
