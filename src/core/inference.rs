//! 单帧推理：文字遮挡 -> 人脸定位 -> 裁剪 -> β 描述子 -> 分类 -> 多脸平均
//!
//! 单张人脸或单帧内的任何失败都在这里吸收，降级为跳过该人脸或输出 no_face 占位。

use crate::core::classifier::FaceClassifier;
use crate::core::config::InferenceConfig;
use crate::core::detection::{FaceLocalizer, TextMasker};
use crate::core::features::{BetaDescriptor, BetaExtractor, DESCRIPTOR_LEN};
use crate::core::label::{ClassProbabilities, FrameLabel};
use crate::core::video::{Frame, PixelRect};
use image::RgbImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 每个处理过的帧恰好一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_index: u64,
    pub label: FrameLabel,
    pub confidence: f32,
    pub probabilities: ClassProbabilities,
    /// 可用人脸描述子的逐元素平均；no_face 时为 63 个 0
    pub descriptor: Vec<f32>,
}

impl FrameResult {
    pub fn no_face(frame_index: u64) -> Self {
        Self {
            frame_index,
            label: FrameLabel::NoFace,
            confidence: 0.0,
            probabilities: ClassProbabilities::zero(),
            descriptor: vec![0.0; DESCRIPTOR_LEN],
        }
    }

    pub fn is_no_face(&self) -> bool {
        self.label.is_no_face()
    }
}

/// 单帧推理的完整输出，图片预测需要人脸框和实际分析的画面
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub result: FrameResult,
    /// 定位器返回的全部人脸（像素坐标，未裁剪）
    pub faces: Vec<PixelRect>,
    /// 遮挡后的画面；未遮挡时与输入相同
    pub image: RgbImage,
    /// 产出了概率的人脸数
    pub usable_faces: usize,
}

pub struct FrameInferenceEngine {
    localizer: Arc<dyn FaceLocalizer>,
    classifier: Arc<dyn FaceClassifier>,
    masker: Option<TextMasker>,
    extractor: BetaExtractor,
    face_min_confidence: f32,
}

impl FrameInferenceEngine {
    pub fn new(localizer: Arc<dyn FaceLocalizer>, classifier: Arc<dyn FaceClassifier>) -> Self {
        Self::with_config(localizer, classifier, None, &InferenceConfig::default())
    }

    pub fn with_config(
        localizer: Arc<dyn FaceLocalizer>,
        classifier: Arc<dyn FaceClassifier>,
        masker: Option<TextMasker>,
        config: &InferenceConfig,
    ) -> Self {
        Self {
            localizer,
            classifier,
            masker,
            extractor: BetaExtractor::with_resize(config.descriptor_resize),
            face_min_confidence: config.face_min_confidence,
        }
    }

    pub fn masker(&self) -> Option<&TextMasker> {
        self.masker.as_ref()
    }

    /// 需要遮挡且配置了遮挡器时返回遮挡后的画面
    pub fn prepare_image(&self, image: &RgbImage, mask_text: bool) -> RgbImage {
        match (mask_text, &self.masker) {
            (true, Some(masker)) => masker.mask(image),
            (true, None) => {
                warn!("⚠️ Text masking requested but no text detector configured");
                image.clone()
            }
            (false, _) => image.clone(),
        }
    }

    pub fn infer_frame(&self, frame: &Frame, mask_text: bool) -> FrameResult {
        self.analyze(frame, mask_text).result
    }

    pub fn analyze(&self, frame: &Frame, mask_text: bool) -> FrameAnalysis {
        let prepared = Frame {
            image: self.prepare_image(&frame.image, mask_text),
            timestamp: frame.timestamp,
            frame_number: frame.frame_number,
        };

        let detections = match self.localizer.locate(&prepared.image) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("⚠️ Frame {}: face localization failed: {}", frame.frame_number, e);
                Vec::new()
            }
        };

        let mut faces = Vec::with_capacity(detections.len());
        let mut probabilities = Vec::with_capacity(detections.len());
        let mut descriptors = Vec::with_capacity(detections.len());

        for detection in detections
            .iter()
            .filter(|d| d.score >= self.face_min_confidence)
        {
            let rect = detection.bbox.to_pixels(prepared.width(), prepared.height());
            faces.push(rect);
            if let Some((probs, descriptor)) = self.classify_face(&prepared, &rect) {
                probabilities.push(probs);
                descriptors.push(descriptor);
            }
        }

        let result = if probabilities.is_empty() {
            debug!("Frame {}: no usable face ({} detected)", frame.frame_number, faces.len());
            FrameResult::no_face(frame.frame_number)
        } else {
            let mean = ClassProbabilities::mean(&probabilities);
            let (class, confidence) = mean.argmax();
            FrameResult {
                frame_index: frame.frame_number,
                label: class.into(),
                confidence,
                probabilities: mean,
                descriptor: BetaDescriptor::mean(&descriptors),
            }
        };

        FrameAnalysis {
            usable_faces: probabilities.len(),
            result,
            faces,
            image: prepared.image,
        }
    }

    /// 单张人脸：裁剪、提取、分类，任何一步失败都返回 None
    fn classify_face(&self, frame: &Frame, rect: &PixelRect) -> Option<(ClassProbabilities, BetaDescriptor)> {
        let Some(crop) = frame.crop(rect) else {
            debug!("Frame {}: face {:?} outside frame", frame.frame_number, rect);
            return None;
        };
        let descriptor = match self.extractor.extract_rgb(&crop) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                debug!("Frame {}: face unusable: {}", frame.frame_number, e);
                return None;
            }
        };
        match self.classifier.classify(&descriptor) {
            Ok(probs) => Some((probs, descriptor)),
            Err(e) => {
                warn!("⚠️ Frame {}: classification failed: {}", frame.frame_number, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::MockClassifier;
    use crate::core::detection::{FaceDetection, MockFaceLocalizer, MockTextDetector, RelativeBox, TextRegion};
    use crate::core::error::{DetectError, DetectResult};
    use crate::core::features::BetaDescriptor;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn textured_frame(width: u32, height: u32, index: u64) -> Frame {
        let image = RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 31 + y * 17 + (x * y) % 7) % 256) as u8;
            Rgb([v, v.wrapping_add(40), v.wrapping_mul(3)])
        });
        Frame::new(image, index * 33, index)
    }

    fn face(x: f32, y: f32, w: f32, h: f32, score: f32) -> FaceDetection {
        FaceDetection {
            bbox: RelativeBox::new(x, y, w, h),
            score,
        }
    }

    fn engine(localizer: MockFaceLocalizer, classifier: MockClassifier) -> FrameInferenceEngine {
        FrameInferenceEngine::new(Arc::new(localizer), Arc::new(classifier))
    }

    #[test]
    fn test_no_face_frame() {
        let engine = engine(MockFaceLocalizer::none(), MockClassifier::fixed([0.2, 0.3, 0.5]));
        let result = engine.infer_frame(&textured_frame(64, 64, 4), false);
        assert_eq!(result.label, FrameLabel::NoFace);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.frame_index, 4);
        assert!(result.probabilities.is_zero());
        assert_eq!(result.descriptor, vec![0.0; 63]);
    }

    #[test]
    fn test_all_faces_unusable_degrades_to_no_face() {
        // 框完全在画面外，裁剪为空
        let localizer = MockFaceLocalizer::with_faces(vec![face(1.5, 1.5, 0.2, 0.2, 0.9)]);
        let engine = engine(localizer, MockClassifier::fixed([0.2, 0.3, 0.5]));
        let analysis = engine.analyze(&textured_frame(64, 64, 0), false);
        assert_eq!(analysis.result, FrameResult::no_face(0));
        assert_eq!(analysis.faces.len(), 1);
        assert_eq!(analysis.usable_faces, 0);
    }

    #[test]
    fn test_unusable_face_is_left_out_of_average() {
        // 第二个框在画面外，只剩一张可用人脸
        let localizer = MockFaceLocalizer::with_faces(vec![
            face(0.1, 0.1, 0.5, 0.5, 0.9),
            face(1.5, 1.5, 0.2, 0.2, 0.9),
        ]);
        let engine = engine(localizer, MockClassifier::fixed([0.1, 0.3, 0.6]));
        let frame = textured_frame(80, 80, 3);
        let analysis = engine.analyze(&frame, false);
        assert_eq!(analysis.faces.len(), 2);
        assert_eq!(analysis.usable_faces, 1);
        assert_eq!(analysis.result.label, FrameLabel::DeepfakeLatest);
        assert_eq!(analysis.result.probabilities, ClassProbabilities([0.1, 0.3, 0.6]));
        assert!((analysis.result.confidence - 0.6).abs() < 1e-6);

        let single = FrameInferenceEngine::new(
            Arc::new(MockFaceLocalizer::with_faces(vec![face(0.1, 0.1, 0.5, 0.5, 0.9)])),
            Arc::new(MockClassifier::fixed([0.1, 0.3, 0.6])),
        );
        assert_eq!(single.infer_frame(&frame, false), analysis.result);
    }

    #[test]
    fn test_single_face_argmax() {
        let localizer = MockFaceLocalizer::with_faces(vec![face(0.1, 0.1, 0.5, 0.5, 0.95)]);
        let engine = engine(localizer, MockClassifier::fixed([0.2, 0.7, 0.1]));
        let result = engine.infer_frame(&textured_frame(80, 60, 2), false);
        assert_eq!(result.label, FrameLabel::DeepfakeOg);
        assert!((result.confidence - 0.7).abs() < 1e-6);
        assert_eq!(result.descriptor.len(), 63);
        assert!(result.descriptor.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_faces_are_averaged() {
        let localizer = MockFaceLocalizer::with_faces(vec![
            face(0.0, 0.0, 0.4, 0.4, 0.9),
            face(0.5, 0.5, 0.4, 0.4, 0.9),
        ]);
        // 左上角那张脸判为真，另一张判为新型伪造
        let calls = AtomicUsize::new(0);
        let classifier = MockClassifier::with_pattern(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                ClassProbabilities([0.8, 0.1, 0.1])
            } else {
                ClassProbabilities([0.2, 0.1, 0.7])
            }
        });
        let engine = engine(localizer, classifier);
        let result = engine.infer_frame(&textured_frame(100, 100, 0), false);
        assert_eq!(result.label, FrameLabel::Real);
        assert!((result.probabilities.0[0] - 0.5).abs() < 1e-6);
        assert!((result.probabilities.0[2] - 0.4).abs() < 1e-6);
        assert!((result.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_low_confidence_faces_are_ignored() {
        let localizer = MockFaceLocalizer::with_faces(vec![face(0.1, 0.1, 0.5, 0.5, 0.4)]);
        let engine = engine(localizer, MockClassifier::fixed([0.9, 0.05, 0.05]));
        let analysis = engine.analyze(&textured_frame(64, 64, 0), false);
        assert!(analysis.result.is_no_face());
        assert!(analysis.faces.is_empty());
    }

    struct FailingClassifier;

    impl FaceClassifier for FailingClassifier {
        fn classify(&self, _descriptor: &BetaDescriptor) -> DetectResult<ClassProbabilities> {
            Err(DetectError::Inference("session poisoned".to_string()))
        }
    }

    #[test]
    fn test_classifier_failure_is_absorbed() {
        let localizer = MockFaceLocalizer::with_faces(vec![face(0.1, 0.1, 0.5, 0.5, 0.9)]);
        let engine = FrameInferenceEngine::new(Arc::new(localizer), Arc::new(FailingClassifier));
        let result = engine.infer_frame(&textured_frame(64, 64, 7), false);
        assert_eq!(result, FrameResult::no_face(7));
    }

    #[test]
    fn test_pixel_boxes_use_frame_size() {
        let localizer = MockFaceLocalizer::with_faces(vec![face(0.25, 0.5, 0.5, 0.25, 0.9)]);
        let engine = engine(localizer, MockClassifier::fixed([1.0, 0.0, 0.0]));
        let analysis = engine.analyze(&textured_frame(200, 100, 0), false);
        assert_eq!(
            analysis.faces,
            vec![PixelRect {
                x: 50,
                y: 50,
                width: 100,
                height: 25
            }]
        );
    }

    #[test]
    fn test_masking_precedes_localization() {
        // 定位器只在左上角被涂白时才“看到”人脸
        let localizer = MockFaceLocalizer::with_pattern(|img| {
            if img.get_pixel(1, 1) == &Rgb([255, 255, 255]) {
                vec![face(0.2, 0.2, 0.6, 0.6, 0.9)]
            } else {
                Vec::new()
            }
        });
        let detector = MockTextDetector::with_fixed_regions(vec![TextRegion::rect(0.0, 0.0, 4.0, 4.0, 0.9)]);
        let masker = TextMasker::new(Arc::new(detector), 0.25, [255, 255, 255]);
        let engine = FrameInferenceEngine::with_config(
            Arc::new(localizer),
            Arc::new(MockClassifier::fixed([0.1, 0.1, 0.8])),
            Some(masker),
            &InferenceConfig::default(),
        );
        let frame = textured_frame(64, 64, 0);

        let unmasked = engine.infer_frame(&frame, false);
        assert!(unmasked.is_no_face());

        let masked = engine.analyze(&frame, true);
        assert_eq!(masked.result.label, FrameLabel::DeepfakeLatest);
        assert_eq!(masked.image.get_pixel(1, 1), &Rgb([255, 255, 255]));
        // 输入帧不被修改
        assert_ne!(frame.image.get_pixel(1, 1), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_mask_without_detector_is_noop() {
        let localizer = MockFaceLocalizer::with_faces(vec![face(0.1, 0.1, 0.5, 0.5, 0.9)]);
        let engine = engine(localizer, MockClassifier::fixed([0.6, 0.3, 0.1]));
        let frame = textured_frame(64, 64, 0);
        assert_eq!(engine.infer_frame(&frame, true), engine.infer_frame(&frame, false));
    }

    #[test]
    fn test_inference_is_deterministic() {
        let localizer = MockFaceLocalizer::with_faces(vec![face(0.1, 0.2, 0.6, 0.5, 0.9)]);
        let classifier = MockClassifier::with_pattern(|d| {
            let s: f32 = d.as_slice().iter().sum();
            let fake = (s / (s + 10.0)).clamp(0.0, 1.0);
            ClassProbabilities([1.0 - fake, fake, 0.0])
        });
        let engine = engine(localizer, classifier);
        let frame = textured_frame(90, 70, 3);
        let a = engine.infer_frame(&frame, false);
        let b = engine.infer_frame(&frame, false);
        assert_eq!(a, b);
    }
}
