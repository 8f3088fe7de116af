#![cfg(feature = "onnx")]
//! ONNX Runtime 后端：β 描述子分类器与 UltraFace 人脸检测器
//!
//! 会话加载一次后在请求之间共享；`Session::run` 需要独占访问，所以各自包一把锁。

use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::RgbImage;
use log::{debug, info};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{Tensor, Value, ValueType};

use crate::core::classifier::FaceClassifier;
use crate::core::detection::{non_max_suppression, FaceDetection, FaceLocalizer, RelativeBox};
use crate::core::error::{DetectError, DetectResult};
use crate::core::features::{BetaDescriptor, DESCRIPTOR_LEN};
use crate::core::label::{ClassProbabilities, NUM_CLASSES};

/// 分类器概率输出的名字（导出时需关闭 zipmap）
const PROBABILITY_OUTPUT: &str = "probabilities";

/// 模型输出的形态，只有 f32 张量能当概率读
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputKind {
    FloatTensor,
    OtherTensor,
    NonTensor,
}

impl OutputKind {
    fn of(value_type: &ValueType) -> Self {
        match value_type {
            ValueType::Tensor {
                ty: TensorElementType::Float32,
                ..
            } => OutputKind::FloatTensor,
            ValueType::Tensor { .. } => OutputKind::OtherTensor,
            _ => OutputKind::NonTensor,
        }
    }
}

/// 选出概率输出：优先名为 probabilities 的 f32 张量，否则第一个 f32 张量
///
/// ZipMap 导出的概率是 map 序列，这里直接拒绝，避免推理时逐脸失败。
fn pick_probability_output(outputs: &[(String, OutputKind)]) -> DetectResult<String> {
    if let Some((name, kind)) = outputs.iter().find(|(n, _)| n == PROBABILITY_OUTPUT) {
        if *kind == OutputKind::FloatTensor {
            return Ok(name.clone());
        }
        return Err(DetectError::ModelLoadFailed(format!(
            "classifier output '{}' is {:?}, expected a float tensor (re-export with zipmap disabled)",
            name, kind
        )));
    }
    outputs
        .iter()
        .find(|(_, kind)| *kind == OutputKind::FloatTensor)
        .map(|(name, _)| name.clone())
        .ok_or_else(|| {
            DetectError::ModelLoadFailed(format!(
                "classifier has no float tensor output among {:?} (re-export with zipmap disabled)",
                outputs
            ))
        })
}

/// UltraFace RFB-320 输入尺寸
const FACE_INPUT_WIDTH: u32 = 320;
const FACE_INPUT_HEIGHT: u32 = 240;

fn load_session(path: &Path) -> DetectResult<Session> {
    if !path.exists() {
        return Err(DetectError::ModelLoadFailed(format!(
            "model not found at {}",
            path.display()
        )));
    }
    Session::builder()
        .map_err(|e| DetectError::ModelLoadFailed(format!("ORT session builder: {e}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| DetectError::ModelLoadFailed(format!("ORT opt level: {e}")))?
        .commit_from_file(path)
        .map_err(|e| DetectError::ModelLoadFailed(format!("ORT load {}: {e}", path.display())))
}

fn output_names(session: &Session) -> Vec<String> {
    session.outputs.iter().map(|o| o.name.clone()).collect()
}

fn inference_error(context: &str, e: impl std::fmt::Display) -> DetectError {
    DetectError::Inference(format!("{context}: {e}"))
}

/// 梯度提升树分类器：输入 [1,63] 浮点，输出 [1,3] 概率
pub struct OnnxClassifier {
    session: Mutex<Session>,
    probability_output: String,
}

impl OnnxClassifier {
    pub fn load<P: AsRef<Path>>(path: P) -> DetectResult<Self> {
        let path = path.as_ref();
        let session = load_session(path)?;
        let outputs: Vec<(String, OutputKind)> = session
            .outputs
            .iter()
            .map(|o| (o.name.clone(), OutputKind::of(&o.output_type)))
            .collect();
        let names = output_names(&session);
        let probability_output = pick_probability_output(&outputs)?;

        info!(
            "✅ Classifier loaded from {} (outputs {:?}, using '{}')",
            path.display(),
            names,
            probability_output
        );
        Ok(Self {
            session: Mutex::new(session),
            probability_output,
        })
    }
}

impl FaceClassifier for OnnxClassifier {
    fn classify(&self, descriptor: &BetaDescriptor) -> DetectResult<ClassProbabilities> {
        let shape = vec![1usize, DESCRIPTOR_LEN];
        let tensor = Tensor::from_array((shape, descriptor.to_vec().into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| inference_error("ORT tensor", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectError::Inference("classifier session poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| inference_error("ORT run", e))?;
        let output = outputs.get(self.probability_output.as_str()).ok_or_else(|| {
            DetectError::Inference(format!("missing output '{}'", self.probability_output))
        })?;
        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| inference_error("ORT extract probabilities", e))?;

        if data.len() < NUM_CLASSES {
            return Err(DetectError::Inference(format!(
                "expected {} probabilities, got {}",
                NUM_CLASSES,
                data.len()
            )));
        }
        ClassProbabilities::from_raw(&data[..NUM_CLASSES])
            .ok_or_else(|| DetectError::Inference(format!("invalid probabilities {:?}", &data[..NUM_CLASSES])))
    }
}

impl Drop for OnnxClassifier {
    fn drop(&mut self) {
        debug!("🗑️ OnnxClassifier: session released");
    }
}

/// UltraFace 人脸检测：输入 [1,3,240,320]，输出 scores [1,N,2] 与 boxes [1,N,4]（相对角点）
pub struct UltraFaceLocalizer {
    session: Mutex<Session>,
    scores_output: String,
    boxes_output: String,
    min_confidence: f32,
    nms_iou: f32,
}

impl UltraFaceLocalizer {
    pub fn load<P: AsRef<Path>>(path: P, min_confidence: f32, nms_iou: f32) -> DetectResult<Self> {
        let path = path.as_ref();
        let session = load_session(path)?;
        let names = output_names(&session);
        if names.len() < 2 {
            return Err(DetectError::ModelLoadFailed(format!(
                "face detector needs scores and boxes outputs, got {:?}",
                names
            )));
        }
        let pick = |wanted: &str, fallback: usize| {
            names
                .iter()
                .find(|n| n.as_str() == wanted)
                .unwrap_or(&names[fallback])
                .clone()
        };
        let scores_output = pick("scores", 0);
        let boxes_output = pick("boxes", 1);

        info!("✅ Face detector loaded from {}", path.display());
        Ok(Self {
            session: Mutex::new(session),
            scores_output,
            boxes_output,
            min_confidence,
            nms_iou,
        })
    }

    fn input_tensor(image: &RgbImage) -> DetectResult<Value> {
        let resized = image::imageops::resize(image, FACE_INPUT_WIDTH, FACE_INPUT_HEIGHT, FilterType::Triangle);
        let (w, h) = (FACE_INPUT_WIDTH as usize, FACE_INPUT_HEIGHT as usize);
        let data = resized.as_raw();

        // HWC -> CHW，(px - 127) / 128
        let mut chw = Vec::with_capacity(3 * w * h);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let v = data[(y * w + x) * 3 + c] as f32;
                    chw.push((v - 127.0) / 128.0);
                }
            }
        }
        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| inference_error("ORT tensor", e))
    }
}

impl FaceLocalizer for UltraFaceLocalizer {
    fn locate(&self, image: &RgbImage) -> DetectResult<Vec<FaceDetection>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let tensor = Self::input_tensor(image)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectError::Inference("face detector session poisoned".to_string()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| inference_error("ORT run", e))?;

        let scores = outputs
            .get(self.scores_output.as_str())
            .ok_or_else(|| DetectError::Inference("missing scores output".to_string()))?;
        let boxes = outputs
            .get(self.boxes_output.as_str())
            .ok_or_else(|| DetectError::Inference("missing boxes output".to_string()))?;
        let (_, scores) = scores
            .try_extract_tensor::<f32>()
            .map_err(|e| inference_error("ORT extract scores", e))?;
        let (_, boxes) = boxes
            .try_extract_tensor::<f32>()
            .map_err(|e| inference_error("ORT extract boxes", e))?;

        let candidates = decode_ultraface(scores, boxes, self.min_confidence);
        let faces = non_max_suppression(candidates, self.nms_iou);
        debug!("UltraFace: {} faces", faces.len());
        Ok(faces)
    }
}

impl Drop for UltraFaceLocalizer {
    fn drop(&mut self) {
        debug!("🗑️ UltraFaceLocalizer: session released");
    }
}

/// 取第二列（人脸）分数达到阈值的候选框，坐标截断到 [0,1]
fn decode_ultraface(scores: &[f32], boxes: &[f32], min_confidence: f32) -> Vec<FaceDetection> {
    let count = (scores.len() / 2).min(boxes.len() / 4);
    (0..count)
        .filter_map(|i| {
            let score = scores[i * 2 + 1];
            if score < min_confidence {
                return None;
            }
            let b = &boxes[i * 4..i * 4 + 4];
            let bbox = RelativeBox::from_corners(
                b[0].clamp(0.0, 1.0),
                b[1].clamp(0.0, 1.0),
                b[2].clamp(0.0, 1.0),
                b[3].clamp(0.0, 1.0),
            );
            (bbox.area() > 0.0).then_some(FaceDetection { bbox, score })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ultraface_threshold() {
        let scores = [0.9, 0.1, 0.2, 0.8, 0.6, 0.4];
        let boxes = [
            0.0, 0.0, 0.5, 0.5, //
            0.1, 0.2, 0.4, 0.6, //
            0.5, 0.5, 0.9, 0.9,
        ];
        let faces = decode_ultraface(&scores, &boxes, 0.5);
        assert_eq!(faces.len(), 1);
        assert!((faces[0].bbox.xmin - 0.1).abs() < 1e-6);
        assert!((faces[0].bbox.height - 0.4).abs() < 1e-6);
    }

    fn outputs(items: &[(&str, OutputKind)]) -> Vec<(String, OutputKind)> {
        items.iter().map(|(n, k)| (n.to_string(), *k)).collect()
    }

    #[test]
    fn test_probability_output_prefers_named_tensor() {
        let picked = pick_probability_output(&outputs(&[
            ("label", OutputKind::OtherTensor),
            ("scores", OutputKind::FloatTensor),
            ("probabilities", OutputKind::FloatTensor),
        ]))
        .unwrap();
        assert_eq!(picked, "probabilities");

        let picked = pick_probability_output(&outputs(&[
            ("output_label", OutputKind::OtherTensor),
            ("output_probability", OutputKind::FloatTensor),
        ]))
        .unwrap();
        assert_eq!(picked, "output_probability");
    }

    #[test]
    fn test_zipmap_probability_output_rejected_at_load() {
        // 默认 ZipMap 导出：label 为 int64 张量，probabilities 为 map 序列
        let err = pick_probability_output(&outputs(&[
            ("label", OutputKind::OtherTensor),
            ("probabilities", OutputKind::NonTensor),
        ]))
        .unwrap_err();
        assert!(matches!(err, DetectError::ModelLoadFailed(ref m) if m.contains("zipmap")));

        let err = pick_probability_output(&outputs(&[
            ("output_label", OutputKind::OtherTensor),
            ("output_probability", OutputKind::NonTensor),
        ]))
        .unwrap_err();
        assert!(matches!(err, DetectError::ModelLoadFailed(_)));
    }

    #[test]
    fn test_missing_model_file() {
        let result = OnnxClassifier::load("/tmp/nonexistent-beta-classifier.onnx");
        assert!(matches!(result, Err(DetectError::ModelLoadFailed(_))));
    }
}
