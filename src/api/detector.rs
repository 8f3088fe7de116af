//! 深度伪造检测器

use crate::api::models::{AnalysisResponse, ImagePrediction, MediaKind, UploadOutcome, UploadedFrame, VideoReport};
use crate::core::aggregate::{CancelToken, VideoAggregator};
use crate::core::classifier::FaceClassifier;
use crate::core::config::DetectorConfig;
use crate::core::detection::{CaptionBandDetector, FaceLocalizer, TextDetector, TextMasker};
use crate::core::error::{DetectError, DetectResult};
use crate::core::inference::FrameInferenceEngine;
use crate::core::label::FaceClass;
use crate::core::record::{content_hash, DetectionRecord};
use crate::core::render::{Artifact, EvidenceRenderer};
use crate::core::storage::{store_from_config, ArtifactStore};
use crate::core::video::{Frame, VideoSource};
use image::DynamicImage;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// 面向调用方的错误：类型 + 可展示的描述，内部细节只进日志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectApiError {
    pub error_type: String,
    pub message: String,
}

impl From<DetectError> for DetectApiError {
    fn from(err: DetectError) -> Self {
        let error_type = match &err {
            DetectError::Io(_) => "Io",
            DetectError::Image(_) => "Image",
            DetectError::InvalidMedia(_) => "InvalidMedia",
            DetectError::UnsupportedMediaType(_) => "UnsupportedMediaType",
            DetectError::PayloadTooLarge { .. } => "PayloadTooLarge",
            DetectError::ModelLoadFailed(_) => "ModelLoadFailed",
            DetectError::ModelNotAvailable(_) => "ModelNotAvailable",
            DetectError::Inference(_) => "Inference",
            DetectError::VideoDecode(_) => "VideoDecode",
            DetectError::Storage(_) => "Storage",
            DetectError::Config(_) => "Config",
            DetectError::Cancelled => "Cancelled",
        };
        Self {
            error_type: error_type.to_string(),
            message: err.user_message(),
        }
    }
}

impl std::fmt::Display for DetectApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.message)
    }
}

impl std::error::Error for DetectApiError {}

/// 打开暂存的视频文件
pub type VideoOpener = Box<dyn Fn(&Path) -> DetectResult<Box<dyn VideoSource>> + Send + Sync>;

#[cfg(feature = "backend-ffmpeg")]
fn default_video_opener() -> VideoOpener {
    Box::new(|path| {
        let source = crate::core::video::FfmpegVideoSource::open(path)?;
        Ok(Box::new(source) as Box<dyn VideoSource>)
    })
}

#[cfg(not(feature = "backend-ffmpeg"))]
fn default_video_opener() -> VideoOpener {
    Box::new(|_| {
        Err(DetectError::VideoDecode(
            "built without the backend-ffmpeg feature".to_string(),
        ))
    })
}

#[cfg(feature = "onnx")]
fn load_models(config: &DetectorConfig) -> DetectResult<(Arc<dyn FaceLocalizer>, Arc<dyn FaceClassifier>)> {
    use crate::core::onnx::{OnnxClassifier, UltraFaceLocalizer};
    let localizer = UltraFaceLocalizer::load(
        &config.models.face_detector_path,
        config.inference.face_min_confidence,
        config.inference.nms_iou,
    )?;
    let classifier = OnnxClassifier::load(&config.models.classifier_path)?;
    Ok((Arc::new(localizer), Arc::new(classifier)))
}

#[cfg(not(feature = "onnx"))]
fn load_models(_config: &DetectorConfig) -> DetectResult<(Arc<dyn FaceLocalizer>, Arc<dyn FaceClassifier>)> {
    Err(DetectError::ModelNotAvailable(
        "built without the onnx feature".to_string(),
    ))
}

/// 深度伪造检测器：模型只加载一次，之后所有请求共享
///
/// ```ignore
/// let detector = DeepfakeDetector::create(DetectorConfig::default().with_env_overrides())?;
/// let outcome = detector.analyze_upload("clip.mp4", "video/mp4", &bytes, false, None)?;
/// println!("{}", serde_json::to_string(&outcome.response)?);
/// ```
pub struct DeepfakeDetector {
    config: DetectorConfig,
    engine: Arc<FrameInferenceEngine>,
    aggregator: VideoAggregator,
    renderer: EvidenceRenderer,
    store: Box<dyn ArtifactStore>,
    open_video: VideoOpener,
}

impl DeepfakeDetector {
    /// 按配置加载 ONNX 模型和存储后端
    pub fn create(config: DetectorConfig) -> DetectResult<Self> {
        info!("🔍 DeepfakeDetector: loading models");
        let (localizer, classifier) = load_models(&config)?;
        let store = store_from_config(&config.storage)?;
        let text_detector: Arc<dyn TextDetector> = Arc::new(CaptionBandDetector::new());
        Ok(Self::with_components(config, localizer, classifier, Some(text_detector), store))
    }

    /// 直接注入各个协作方（测试替身、宿主自带模型）
    pub fn with_components(
        config: DetectorConfig,
        localizer: Arc<dyn FaceLocalizer>,
        classifier: Arc<dyn FaceClassifier>,
        text_detector: Option<Arc<dyn TextDetector>>,
        store: Box<dyn ArtifactStore>,
    ) -> Self {
        let masker = text_detector.map(|detector| {
            TextMasker::new(detector, config.inference.text_min_score, config.inference.mask_fill)
        });
        let engine = Arc::new(FrameInferenceEngine::with_config(
            localizer,
            classifier,
            masker,
            &config.inference,
        ));
        let aggregator = VideoAggregator::new(engine.clone(), config.aggregation.clone());
        let renderer = EvidenceRenderer::new(config.render.clone());
        info!("✅ DeepfakeDetector: ready (storage {})", store.describe());
        Self {
            config,
            engine,
            aggregator,
            renderer,
            store,
            open_video: default_video_opener(),
        }
    }

    pub fn with_video_opener(mut self, opener: VideoOpener) -> Self {
        self.open_video = opener;
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// 单张图片推理并渲染人脸标注图
    pub fn predict_image(&self, image: &DynamicImage, mask_text: bool) -> ImagePrediction {
        let start = Instant::now();
        let frame = Frame::from_dynamic(image.clone(), 0);
        let analysis = self.engine.analyze(&frame, mask_text);
        let result = &analysis.result;

        if result.is_no_face() {
            info!("🖼️ No usable face in image ({} detected)", analysis.faces.len());
            return ImagePrediction {
                prediction: FaceClass::Real,
                prediction_confidence: 0.0,
                real_confidence: 0.0,
                deepfake_og_confidence: 0.0,
                deepfake_confidence: 0.0,
                faces: analysis.faces,
                face_found: false,
                annotation: None,
                time_taken: start.elapsed().as_secs_f64(),
            };
        }

        let annotation = match self.renderer.render_face_annotations(&analysis.image, &analysis.faces) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!("⚠️ Annotation rendering failed: {}", e);
                None
            }
        };
        let probs = result.probabilities;
        let (prediction, prediction_confidence) = probs.argmax();
        info!(
            "🖼️ Image: {} ({:.3}) from {} faces",
            prediction.as_str(),
            prediction_confidence,
            analysis.usable_faces
        );
        ImagePrediction {
            prediction,
            prediction_confidence,
            real_confidence: probs.get(FaceClass::Real),
            deepfake_og_confidence: probs.get(FaceClass::DeepfakeOg),
            deepfake_confidence: probs.get(FaceClass::DeepfakeLatest),
            faces: analysis.faces,
            face_found: true,
            annotation,
            time_taken: start.elapsed().as_secs_f64(),
        }
    }

    pub fn predict_image_bytes(&self, bytes: &[u8], mask_text: bool) -> DetectResult<ImagePrediction> {
        let image = image::load_from_memory(bytes).map_err(|e| {
            warn!("⚠️ Image decode failed: {}", e);
            DetectError::InvalidMedia("Unable to read image".to_string())
        })?;
        Ok(self.predict_image(&image, mask_text))
    }

    /// 顺序扫描整段视频，渲染时间线和可疑帧截图
    ///
    /// 渲染失败只记日志，对应产物为空，结论照常返回。
    pub fn analyze_video(
        &self,
        source: &dyn VideoSource,
        mask_text: bool,
        cancel: &CancelToken,
    ) -> DetectResult<VideoReport> {
        let start = Instant::now();
        let scan = self.aggregator.analyze_video(source, mask_text, cancel)?;

        let timeline = match self.renderer.render_timeline(&scan.frames) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!("⚠️ Timeline rendering failed: {}", e);
                None
            }
        };
        let masker = if mask_text { self.engine.masker() } else { None };
        let suspicious = self
            .renderer
            .render_suspicious_frames(source, &scan.verdict.suspicious_frames, masker);

        Ok(VideoReport {
            frames: scan.frames,
            verdict: scan.verdict,
            timeline,
            suspicious,
            scan_error: scan.scan_error,
            time_taken: start.elapsed().as_secs_f64(),
        })
    }

    /// 打开视频文件并分析；一帧都读不出来时视为无效输入
    pub fn analyze_video_file(&self, path: &Path, mask_text: bool, cancel: &CancelToken) -> DetectResult<VideoReport> {
        let source = (self.open_video)(path).map_err(|e| {
            warn!("⚠️ Cannot open video {}: {}", path.display(), e);
            DetectError::InvalidMedia("Unable to read video".to_string())
        })?;
        let report = self.analyze_video(source.as_ref(), mask_text, cancel)?;
        if report.is_unreadable() {
            return Err(DetectError::InvalidMedia("Unable to read video".to_string()));
        }
        Ok(report)
    }

    /// 校验 MIME 类型和大小
    pub fn validate_upload(&self, content_type: &str, size: usize) -> DetectResult<MediaKind> {
        let kind = MediaKind::from_mime(content_type).ok_or_else(|| {
            DetectError::UnsupportedMediaType(format!(
                "{}. Allowed: {}",
                content_type,
                MediaKind::allowed_types()
            ))
        })?;
        let limit = self.config.upload.max_bytes;
        if size > limit {
            return Err(DetectError::PayloadTooLarge { size, limit });
        }
        Ok(kind)
    }

    /// 完整的上传分析流程：校验、暂存、推理、上传产物、生成记录
    pub fn analyze_upload(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
        mask_text: bool,
        content_hash: Option<&str>,
    ) -> Result<UploadOutcome, DetectApiError> {
        self.analyze_upload_with_cancel(file_name, content_type, bytes, mask_text, content_hash, &CancelToken::new())
    }

    pub fn analyze_upload_with_cancel(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
        mask_text: bool,
        content_hash: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<UploadOutcome, DetectApiError> {
        self.run_upload(file_name, content_type, bytes, mask_text, content_hash, cancel)
            .map_err(|e| {
                error!("❌ Upload analysis of {} failed: {}", file_name, e);
                DetectApiError::from(e)
            })
    }

    fn run_upload(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: &[u8],
        mask_text: bool,
        hash: Option<&str>,
        cancel: &CancelToken,
    ) -> DetectResult<UploadOutcome> {
        let start = Instant::now();
        let kind = self.validate_upload(content_type, bytes.len())?;
        let hash = hash
            .filter(|h| !h.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| content_hash(bytes));
        let user_id = self.config.upload.user_id.as_str();
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let suffix = extension
            .as_deref()
            .map(|e| format!(".{e}"))
            .unwrap_or_else(|| ".dat".to_string());
        info!(
            "📥 Analyzing {} ({}, {} bytes) as {}",
            file_name,
            content_type,
            bytes.len(),
            hash
        );

        let mut response = match kind {
            MediaKind::Video => {
                // 暂存文件在作用域结束时删除
                let mut staged = tempfile::Builder::new().suffix(&suffix).tempfile()?;
                staged.write_all(bytes)?;
                staged.flush()?;
                let report = self.analyze_video_file(staged.path(), mask_text, cancel)?;
                self.publish_video(&report, user_id, &hash, &suffix, bytes)
            }
            MediaKind::Image => {
                let prediction = self.predict_image_bytes(bytes, mask_text)?;
                self.publish_image(&prediction, user_id, &hash, file_name, bytes)
            }
        };
        response.time_taken = start.elapsed().as_secs_f64();

        let record = DetectionRecord::new(
            hash,
            extension.unwrap_or_else(|| content_type.to_string()),
            user_id,
        )
        .with_verdict(response.prediction, response.prediction_confidence)
        .with_link(Some(response.file_url.clone()))
        .with_original_name(file_name)
        .with_source("upload");

        info!(
            "✅ {} -> {} ({:.3}) in {:.2}s",
            file_name,
            response.prediction.as_str(),
            response.prediction_confidence,
            response.time_taken
        );
        Ok(UploadOutcome { response, record })
    }

    /// 上传单个产物，失败返回空串
    fn upload(&self, key: &str, bytes: &[u8]) -> String {
        match self.store.put(key, bytes) {
            Ok(url) => url,
            Err(e) => {
                warn!("⚠️ Failed to upload {}: {}", key, e);
                String::new()
            }
        }
    }

    fn upload_artifact(&self, prefix: &str, artifact: &Artifact) -> String {
        self.upload(&format!("{}/{}", prefix, artifact.name), &artifact.bytes)
    }

    fn publish_video(
        &self,
        report: &VideoReport,
        user_id: &str,
        hash: &str,
        suffix: &str,
        original: &[u8],
    ) -> AnalysisResponse {
        let prefix = format!("{}/{}", user_id, hash);
        let timeseries_plot = report
            .timeline
            .as_ref()
            .map(|artifact| self.upload_artifact(&prefix, artifact))
            .unwrap_or_default();

        let mut suspicious_frames = Vec::with_capacity(report.suspicious.len());
        for evidence in &report.suspicious {
            let url = self.upload_artifact(&prefix, &evidence.artifact);
            if url.is_empty() {
                continue;
            }
            suspicious_frames.push(UploadedFrame {
                frame_index: evidence.frame.frame_index,
                label: evidence.frame.label,
                confidence: evidence.frame.confidence,
                url,
            });
        }
        let file_url = self.upload(&format!("{}/video{}", prefix, suffix), original);

        let verdict = &report.verdict;
        AnalysisResponse {
            kind: MediaKind::Video,
            content_hash: hash.to_string(),
            prediction: verdict.final_label,
            prediction_confidence: verdict.final_confidence,
            avg_real_confidence: verdict.label_confidence.real,
            avg_deepfake_og_confidence: verdict.label_confidence.deepfake_og,
            avg_deepfake_confidence: verdict.label_confidence.deepfake_latest,
            total_frames: verdict.total_frames,
            timeseries_plot,
            heatmap_urls: suspicious_frames.iter().map(|f| f.url.clone()).collect(),
            suspicious_frames,
            image_url: String::new(),
            file_url,
            time_taken: report.time_taken,
        }
    }

    fn publish_image(
        &self,
        prediction: &ImagePrediction,
        user_id: &str,
        hash: &str,
        file_name: &str,
        original: &[u8],
    ) -> AnalysisResponse {
        let prefix = format!("{}/{}", user_id, hash);
        let image_url = prediction
            .annotation
            .as_ref()
            .map(|artifact| self.upload_artifact(&prefix, artifact))
            .unwrap_or_default();
        let file_url = self.upload(&format!("{}/{}", prefix, file_name), original);

        AnalysisResponse {
            kind: MediaKind::Image,
            content_hash: hash.to_string(),
            prediction: prediction.prediction,
            prediction_confidence: prediction.prediction_confidence,
            avg_real_confidence: prediction.real_confidence,
            avg_deepfake_og_confidence: prediction.deepfake_og_confidence,
            avg_deepfake_confidence: prediction.deepfake_confidence,
            total_frames: 1,
            timeseries_plot: String::new(),
            heatmap_urls: Vec::new(),
            suspicious_frames: Vec::new(),
            image_url,
            file_url,
            time_taken: prediction.time_taken,
        }
    }
}

impl Drop for DeepfakeDetector {
    fn drop(&mut self) {
        info!("🗑️ DeepfakeDetector: released");
    }
}
