//! 证据渲染：置信度时间线、可疑帧截图、人脸标注图
//!
//! 所有产物都以内存中的 PNG 返回，落盘或上传交给存储层。

use crate::core::aggregate::SuspiciousFrame;
use crate::core::config::RenderConfig;
use crate::core::detection::TextMasker;
use crate::core::error::DetectResult;
use crate::core::inference::FrameResult;
use crate::core::label::{FaceClass, FrameLabel};
use crate::core::video::{PixelRect, VideoSource};
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use log::{debug, warn};

pub const TIMELINE_NAME: &str = "timeseries.png";
pub const ANNOTATION_NAME: &str = "prediction_plot.png";

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const AXIS: Rgb<u8> = Rgb([90, 90, 90]);
const NO_FACE_BAND: Rgb<u8> = Rgb([211, 211, 211]);
const REAL_DOT: Rgb<u8> = Rgb([0, 160, 0]);
const FAKE_DOT: Rgb<u8> = Rgb([220, 0, 0]);
const FACE_BOX: Rgb<u8> = Rgb([0, 255, 0]);
const CLASS_LINES: [Rgb<u8>; 3] = [Rgb([31, 119, 180]), Rgb([255, 127, 14]), Rgb([148, 103, 189])];

/// 渲染产物：文件名、MIME 类型、编码后的字节
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn png(name: impl Into<String>, image: &RgbImage) -> DetectResult<Self> {
        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes).write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)?;
        Ok(Self {
            name: name.into(),
            content_type: "image/png".to_string(),
            bytes,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// 可疑帧及其截图
#[derive(Debug, Clone)]
pub struct SuspiciousEvidence {
    pub rank: usize,
    pub frame: SuspiciousFrame,
    pub artifact: Artifact,
}

pub fn suspicious_frame_name(rank: usize, frame_index: u64) -> String {
    format!("top_suspicious_{}_frame_{}.png", rank, frame_index)
}

/// 绘图区域（像素坐标，闭区间）
#[derive(Debug, Clone, Copy)]
struct Plot {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
}

impl Plot {
    fn new(x: u32, y: u32, width: u32, height: u32, margin: u32) -> Self {
        Self {
            left: (x + margin) as f32,
            top: (y + margin) as f32,
            right: (x + width).saturating_sub(margin).max(x + margin + 1) as f32,
            bottom: (y + height).saturating_sub(margin).max(y + margin + 1) as f32,
        }
    }

    fn width(&self) -> f32 {
        self.right - self.left
    }

    /// 帧序号 -> x；只有一帧时放在中间
    fn x_of(&self, index: u64, max_index: u64) -> f32 {
        if max_index == 0 {
            return self.left + self.width() / 2.0;
        }
        self.left + self.width() * index as f32 / max_index as f32
    }

    /// [0,1] -> y，越大越靠上
    fn y_of(&self, value: f32) -> f32 {
        self.bottom - (self.bottom - self.top) * value.clamp(0.0, 1.0)
    }

    fn draw_axes(&self, canvas: &mut RgbImage) {
        draw_line_segment_mut(canvas, (self.left, self.bottom), (self.right, self.bottom), AXIS);
        draw_line_segment_mut(canvas, (self.left, self.top), (self.left, self.bottom), AXIS);
        // 0.5 参考线
        let mid = self.y_of(0.5);
        let mut x = self.left;
        while x < self.right {
            let end = (x + 4.0).min(self.right);
            draw_line_segment_mut(canvas, (x, mid), (end, mid), NO_FACE_BAND);
            x += 8.0;
        }
    }
}

pub struct EvidenceRenderer {
    config: RenderConfig,
}

impl EvidenceRenderer {
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// 左侧主图：每帧最大类别置信度（绿=real，红=伪造），无人脸帧画灰色竖带；
    /// 右侧每个类别一张小图：该类别概率随帧变化。空序列只画坐标轴。
    pub fn render_timeline(&self, frames: &[FrameResult]) -> DetectResult<Artifact> {
        let width = self.config.timeline_width.max(90);
        let height = self.config.timeline_height.max(90);
        let mut canvas = RgbImage::from_pixel(width, height, WHITE);

        let main_width = width * 2 / 3;
        let main = Plot::new(0, 0, main_width, height, 30);
        main.draw_axes(&mut canvas);

        let max_index = frames.iter().map(|f| f.frame_index).max().unwrap_or(0);
        let band = (main.width() / (max_index + 1) as f32).max(1.0);

        for frame in frames.iter().filter(|f| f.is_no_face()) {
            let x = main.x_of(frame.frame_index, max_index) - band / 2.0;
            let left = x.max(main.left).round() as i32;
            let right = (x + band).min(main.right).round() as i32;
            let w = (right - left).max(1) as u32;
            let h = (main.bottom - main.top).max(1.0) as u32;
            draw_filled_rect_mut(&mut canvas, Rect::at(left, main.top as i32).of_size(w, h), NO_FACE_BAND);
        }

        let points: Vec<(f32, f32, FrameLabel)> = frames
            .iter()
            .filter(|f| !f.is_no_face())
            .map(|f| (main.x_of(f.frame_index, max_index), main.y_of(f.confidence), f.label))
            .collect();
        for pair in points.windows(2) {
            draw_line_segment_mut(&mut canvas, (pair[0].0, pair[0].1), (pair[1].0, pair[1].1), BLACK);
        }
        for &(x, y, label) in &points {
            let color = if label == FrameLabel::Real { REAL_DOT } else { FAKE_DOT };
            draw_filled_circle_mut(&mut canvas, (x.round() as i32, y.round() as i32), 3, color);
        }

        let mini_height = height / FaceClass::ALL.len() as u32;
        for (row, class) in FaceClass::ALL.iter().enumerate() {
            let plot = Plot::new(main_width, row as u32 * mini_height, width - main_width, mini_height, 20);
            plot.draw_axes(&mut canvas);
            let series: Vec<(f32, f32)> = frames
                .iter()
                .map(|f| (plot.x_of(f.frame_index, max_index), plot.y_of(f.probabilities.get(*class))))
                .collect();
            for pair in series.windows(2) {
                draw_line_segment_mut(&mut canvas, pair[0], pair[1], CLASS_LINES[class.index()]);
            }
            if let [only] = series.as_slice() {
                draw_filled_circle_mut(&mut canvas, (only.0 as i32, only.1 as i32), 2, CLASS_LINES[class.index()]);
            }
        }

        debug!("Timeline rendered for {} frames", frames.len());
        Artifact::png(TIMELINE_NAME, &canvas)
    }

    /// 按帧序号重新解码每个可疑帧；单帧失败只记日志并跳过
    pub fn render_suspicious_frames(
        &self,
        source: &dyn VideoSource,
        entries: &[SuspiciousFrame],
        masker: Option<&TextMasker>,
    ) -> Vec<SuspiciousEvidence> {
        let mut evidence = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let rank = i + 1;
            let frame = match source.frame_at(entry.frame_index) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    warn!("⚠️ Suspicious frame {} not found on re-seek", entry.frame_index);
                    continue;
                }
                Err(e) => {
                    warn!("⚠️ Re-seek to frame {} failed: {}", entry.frame_index, e);
                    continue;
                }
            };
            let image = match masker {
                Some(masker) => masker.mask(&frame.image),
                None => frame.image,
            };
            match Artifact::png(suspicious_frame_name(rank, entry.frame_index), &image) {
                Ok(artifact) => evidence.push(SuspiciousEvidence {
                    rank,
                    frame: *entry,
                    artifact,
                }),
                Err(e) => warn!("⚠️ Encoding suspicious frame {} failed: {}", entry.frame_index, e),
            }
        }
        evidence
    }

    /// 在画面上用 2 像素宽的绿框标出每张人脸
    pub fn render_face_annotations(&self, image: &RgbImage, faces: &[PixelRect]) -> DetectResult<Artifact> {
        let mut canvas = image.clone();
        for face in faces {
            let Some(clipped) = face.clip_to(canvas.width(), canvas.height()) else {
                continue;
            };
            let outer = Rect::at(clipped.x as i32, clipped.y as i32).of_size(clipped.width, clipped.height);
            draw_hollow_rect_mut(&mut canvas, outer, FACE_BOX);
            if clipped.width > 2 && clipped.height > 2 {
                let inner = Rect::at(clipped.x as i32 + 1, clipped.y as i32 + 1)
                    .of_size(clipped.width - 2, clipped.height - 2);
                draw_hollow_rect_mut(&mut canvas, inner, FACE_BOX);
            }
        }
        Artifact::png(ANNOTATION_NAME, &canvas)
    }
}

impl Default for EvidenceRenderer {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}
