use crate::core::error::DetectResult;
use crate::core::video::PixelRect;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// 相对坐标 [0,1] 的人脸框（左上角 + 宽高）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeBox {
    pub xmin: f32,
    pub ymin: f32,
    pub width: f32,
    pub height: f32,
}

impl RelativeBox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
        }
    }

    /// 由左上、右下角点构造
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }

    /// 按画面实际宽高换算成像素坐标（向零取整）
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> PixelRect {
        let w = frame_width as f32;
        let h = frame_height as f32;
        PixelRect {
            x: (self.xmin * w) as i64,
            y: (self.ymin * h) as i64,
            width: (self.width * w).max(0.0) as u32,
            height: (self.height * h).max(0.0) as u32,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn iou(&self, other: &RelativeBox) -> f32 {
        let x1 = self.xmin.max(other.xmin);
        let y1 = self.ymin.max(other.ymin);
        let x2 = (self.xmin + self.width).min(other.xmin + other.width);
        let y2 = (self.ymin + self.height).min(other.ymin + other.height);
        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: RelativeBox,
    pub score: f32,
}

/// 人脸定位器：输入 RGB 画面，输出相对坐标的人脸框
pub trait FaceLocalizer: Send + Sync {
    fn locate(&self, image: &RgbImage) -> DetectResult<Vec<FaceDetection>>;
}

/// 按分数降序做非极大值抑制
pub fn non_max_suppression(mut detections: Vec<FaceDetection>, iou_threshold: f32) -> Vec<FaceDetection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<FaceDetection> = Vec::with_capacity(detections.len());
    for det in detections {
        if kept.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

pub struct MockFaceLocalizer {
    // 根据画面内容决定返回哪些人脸
    pattern: Box<dyn Fn(&RgbImage) -> Vec<FaceDetection> + Send + Sync>,
}

impl MockFaceLocalizer {
    pub fn none() -> Self {
        Self::with_pattern(|_| Vec::new())
    }

    pub fn with_faces(faces: Vec<FaceDetection>) -> Self {
        Self::with_pattern(move |_| faces.clone())
    }

    pub fn with_pattern<F>(pattern: F) -> Self
    where
        F: Fn(&RgbImage) -> Vec<FaceDetection> + Send + Sync + 'static,
    {
        Self {
            pattern: Box::new(pattern),
        }
    }
}

impl FaceLocalizer for MockFaceLocalizer {
    fn locate(&self, image: &RgbImage) -> DetectResult<Vec<FaceDetection>> {
        Ok((self.pattern)(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, score: f32) -> FaceDetection {
        FaceDetection {
            bbox: RelativeBox::new(x, y, w, h),
            score,
        }
    }

    #[test]
    fn test_to_pixels_truncates() {
        let rect = RelativeBox::new(0.25, 0.1, 0.5, 0.333).to_pixels(101, 50);
        assert_eq!(rect.x, 25);
        assert_eq!(rect.y, 5);
        assert_eq!(rect.width, 50);
        assert_eq!(rect.height, 16);
    }

    #[test]
    fn test_to_pixels_negative_origin() {
        let rect = RelativeBox::new(-0.1, 0.0, 0.5, 0.5).to_pixels(100, 100);
        assert_eq!(rect.x, -10);
        let clipped = rect.clip_to(100, 100).unwrap();
        assert_eq!(clipped.x, 0);
        assert_eq!(clipped.width, 40);
    }

    #[test]
    fn test_iou() {
        let a = RelativeBox::new(0.0, 0.0, 0.5, 0.5);
        let b = RelativeBox::new(0.25, 0.0, 0.5, 0.5);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-5);
        assert_eq!(a.iou(&RelativeBox::new(0.6, 0.6, 0.1, 0.1)), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlap() {
        let kept = non_max_suppression(
            vec![
                det(0.1, 0.1, 0.3, 0.3, 0.7),
                det(0.11, 0.1, 0.3, 0.3, 0.9),
                det(0.6, 0.6, 0.2, 0.2, 0.8),
            ],
            0.3,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.8);
    }

    #[test]
    fn test_mock_localizer_pattern() {
        let localizer = MockFaceLocalizer::with_pattern(|img| {
            if img.get_pixel(0, 0)[0] > 100 {
                vec![det(0.0, 0.0, 1.0, 1.0, 0.9)]
            } else {
                Vec::new()
            }
        });
        let bright = RgbImage::from_pixel(4, 4, image::Rgb([200, 0, 0]));
        let dark = RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0]));
        assert_eq!(localizer.locate(&bright).unwrap().len(), 1);
        assert!(localizer.locate(&dark).unwrap().is_empty());
        assert!(MockFaceLocalizer::none().locate(&bright).unwrap().is_empty());
    }
}
