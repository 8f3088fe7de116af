//! 视频聚合：顺序扫描所有帧，汇总为视频结论并挑选可疑帧
//!
//! 无人脸帧以全零概率参与平均，会把平均值拉向“无信号”；全部无人脸时按首个最大值取 real。

use crate::core::config::AggregationConfig;
use crate::core::error::{DetectError, DetectResult};
use crate::core::inference::{FrameInferenceEngine, FrameResult};
use crate::core::label::{ClassProbabilities, FaceClass, FrameLabel, NUM_CLASSES};
use crate::core::video::VideoSource;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 外部取消扫描的开关，可跨线程克隆
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousFrame {
    pub frame_index: u64,
    pub label: FrameLabel,
    pub confidence: f32,
}

/// 按预测标签分组后的平均置信度（该标签没有帧时为 0）
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelConfidence {
    pub real: f32,
    pub deepfake_og: f32,
    pub deepfake_latest: f32,
}

impl LabelConfidence {
    pub fn get(&self, class: FaceClass) -> f32 {
        match class {
            FaceClass::Real => self.real,
            FaceClass::DeepfakeOg => self.deepfake_og,
            FaceClass::DeepfakeLatest => self.deepfake_latest,
        }
    }

    fn from_frames(frames: &[FrameResult]) -> Self {
        let mut sum = [0.0f64; NUM_CLASSES];
        let mut count = [0usize; NUM_CLASSES];
        for frame in frames {
            if let Some(class) = frame.label.class() {
                sum[class.index()] += frame.confidence as f64;
                count[class.index()] += 1;
            }
        }
        let mean = |class: FaceClass| {
            let i = class.index();
            if count[i] == 0 {
                0.0
            } else {
                (sum[i] / count[i] as f64) as f32
            }
        };
        Self {
            real: mean(FaceClass::Real),
            deepfake_og: mean(FaceClass::DeepfakeOg),
            deepfake_latest: mean(FaceClass::DeepfakeLatest),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoVerdict {
    pub final_label: FaceClass,
    pub final_confidence: f32,
    pub average_probabilities: ClassProbabilities,
    pub label_confidence: LabelConfidence,
    pub total_frames: usize,
    pub suspicious_frames: Vec<SuspiciousFrame>,
}

/// 一次顺序扫描的结果；扫描中途失败时 frames 保留已处理的帧
#[derive(Debug, Clone)]
pub struct VideoScan {
    pub frames: Vec<FrameResult>,
    pub verdict: VideoVerdict,
    pub scan_error: Option<String>,
}

impl VideoScan {
    /// 一帧都没拿到并且扫描出错，调用方应当作输入无效处理
    pub fn is_unreadable(&self) -> bool {
        self.frames.is_empty() && self.scan_error.is_some()
    }
}

pub fn compute_verdict(frames: &[FrameResult], config: &AggregationConfig) -> VideoVerdict {
    let average = ClassProbabilities::mean(frames.iter().map(|f| &f.probabilities));
    let (final_label, final_confidence) = average.argmax();
    VideoVerdict {
        final_label,
        final_confidence,
        average_probabilities: average,
        label_confidence: LabelConfidence::from_frames(frames),
        total_frames: frames.len(),
        suspicious_frames: select_suspicious(
            frames,
            config.suspicious_limit,
            config.include_no_face_in_suspicious,
        ),
    }
}

/// 非 real 的帧按置信度降序取前 limit 个，同分保持帧序
pub fn select_suspicious(frames: &[FrameResult], limit: usize, include_no_face: bool) -> Vec<SuspiciousFrame> {
    let mut candidates: Vec<SuspiciousFrame> = frames
        .iter()
        .filter(|f| f.label != FrameLabel::Real)
        .filter(|f| include_no_face || !f.is_no_face())
        .map(|f| SuspiciousFrame {
            frame_index: f.frame_index,
            label: f.label,
            confidence: f.confidence,
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(limit);
    candidates
}

pub struct VideoAggregator {
    engine: Arc<FrameInferenceEngine>,
    config: AggregationConfig,
}

impl VideoAggregator {
    pub fn new(engine: Arc<FrameInferenceEngine>, config: AggregationConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &FrameInferenceEngine {
        &self.engine
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// 从第 0 帧顺序扫描到结尾，每帧推理一次
    ///
    /// 解码失败不会报错，只记录在 `scan_error` 里；只有取消会返回错误。
    pub fn analyze_video(
        &self,
        source: &dyn VideoSource,
        mask_text: bool,
        cancel: &CancelToken,
    ) -> DetectResult<VideoScan> {
        let start = Instant::now();
        info!("🎥 Scanning {} (mask_text={})", source.describe(), mask_text);

        let mut frames: Vec<FrameResult> = Vec::new();
        let mut cancelled = false;
        let scanned = source.scan(&mut |frame| {
            if cancel.is_cancelled() {
                cancelled = true;
                return ControlFlow::Break(());
            }
            frames.push(self.engine.infer_frame(&frame, mask_text));
            ControlFlow::Continue(())
        });

        if cancelled {
            warn!("⏹️ Scan of {} cancelled after {} frames", source.describe(), frames.len());
            return Err(DetectError::Cancelled);
        }

        let scan_error = match scanned {
            Ok(_) => None,
            Err(e) => {
                warn!(
                    "⚠️ Scan of {} stopped after {} frames: {}",
                    source.describe(),
                    frames.len(),
                    e
                );
                Some(e.to_string())
            }
        };

        let verdict = compute_verdict(&frames, &self.config);
        info!(
            "✅ Scan done: {} frames, verdict {} ({:.3}), {} suspicious, {:?}",
            verdict.total_frames,
            verdict.final_label.as_str(),
            verdict.final_confidence,
            verdict.suspicious_frames.len(),
            start.elapsed()
        );
        Ok(VideoScan {
            frames,
            verdict,
            scan_error,
        })
    }
}
