use crate::core::error::DetectResult;
use image::{GrayImage, Rgb, RgbImage};
use imageproc::point::Point;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 检测到的一处叠加文字：四边形顶点（像素坐标）、识别文本、置信度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRegion {
    pub quad: [(f32, f32); 4],
    pub text: String,
    pub score: f32,
}

impl TextRegion {
    /// 轴对齐矩形区域
    pub fn rect(x: f32, y: f32, width: f32, height: f32, score: f32) -> Self {
        Self {
            quad: [(x, y), (x + width, y), (x + width, y + height), (x, y + height)],
            text: String::new(),
            score,
        }
    }
}

pub trait TextDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> DetectResult<Vec<TextRegion>>;
}

pub struct MockTextDetector {
    // 根据画面内容返回文字区域
    pattern: Option<Box<dyn Fn(&RgbImage) -> Vec<TextRegion> + Send + Sync>>,
}

impl MockTextDetector {
    pub fn new() -> Self {
        Self { pattern: None }
    }

    pub fn with_pattern<F>(pattern: F) -> Self
    where
        F: Fn(&RgbImage) -> Vec<TextRegion> + Send + Sync + 'static,
    {
        Self {
            pattern: Some(Box::new(pattern)),
        }
    }

    pub fn with_fixed_regions(regions: Vec<TextRegion>) -> Self {
        Self::with_pattern(move |_| regions.clone())
    }
}

impl Default for MockTextDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TextDetector for MockTextDetector {
    fn detect(&self, image: &RgbImage) -> DetectResult<Vec<TextRegion>> {
        Ok(self.pattern.as_ref().map(|p| p(image)).unwrap_or_default())
    }
}

/// 字幕条带检测器（无需 OCR 模型）
/// 针对叠加字幕的特点：
/// 1. 字幕通常在画面底部 40% 区域
/// 2. 字幕颜色通常是白色/黄色，亮度高
/// 3. 字幕呈水平条带，文字有水平笔画特征
pub struct CaptionBandDetector {
    /// 亮度阈值 (0-255)，用于检测白字/黄字
    brightness_threshold: u8,
    /// 行内高亮像素占比阈值
    row_ratio_threshold: f32,
    /// 条带高度占画面高度的范围
    min_band_ratio: f32,
    max_band_ratio: f32,
}

impl CaptionBandDetector {
    pub fn new() -> Self {
        Self {
            brightness_threshold: 180,
            row_ratio_threshold: 0.15,
            min_band_ratio: 0.03,
            max_band_ratio: 0.15,
        }
    }

    /// 找出底部区域所有连续的高亮行，返回 (起始行, 高度)
    fn find_bands(&self, gray: &GrayImage) -> Vec<(u32, u32)> {
        let (w, h) = gray.dimensions();
        if w == 0 || h == 0 {
            return Vec::new();
        }
        let start_y = h * 6 / 10;
        let min_height = ((h as f32 * self.min_band_ratio) as u32).max(1);
        let max_height = (h as f32 * self.max_band_ratio) as u32;

        let mut bands = Vec::new();
        let mut run_start: Option<u32> = None;
        for y in start_y..=h {
            let is_caption_row = y < h && {
                let bright = (0..w)
                    .filter(|&x| gray.get_pixel(x, y)[0] > self.brightness_threshold)
                    .count();
                bright as f32 / w as f32 > self.row_ratio_threshold
            };
            match (is_caption_row, run_start) {
                (true, None) => run_start = Some(y),
                (false, Some(start)) => {
                    let height = y - start;
                    if height >= min_height && height <= max_height {
                        bands.push((start, height));
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
        bands
    }

    /// 条带内的高亮像素横向范围和置信度
    fn describe_band(&self, gray: &GrayImage, band_y: u32, band_height: u32) -> Option<TextRegion> {
        let w = gray.width();
        let mut min_x = u32::MAX;
        let mut max_x = 0u32;
        let mut bright = 0u32;
        let mut edges = 0u32;
        let mut total = 0u32;

        for y in band_y..band_y + band_height {
            for x in 0..w {
                let v = gray.get_pixel(x, y)[0];
                if v > self.brightness_threshold {
                    bright += 1;
                    min_x = min_x.min(x);
                    max_x = max_x.max(x);
                }
                if x > 0 && x + 1 < w {
                    let left = gray.get_pixel(x - 1, y)[0] as i32;
                    let right = gray.get_pixel(x + 1, y)[0] as i32;
                    if (right - left).abs() > 30 {
                        edges += 1;
                    }
                }
                total += 1;
            }
        }

        if bright == 0 || total == 0 {
            return None;
        }

        let bright_ratio = bright as f32 / total as f32;
        let edge_ratio = edges as f32 / total as f32;
        let score = (bright_ratio.min(0.5) + (edge_ratio * 5.0).min(0.5)).min(1.0);

        let pad = 2.0;
        let x0 = (min_x as f32 - pad).max(0.0);
        let x1 = (max_x as f32 + 1.0 + pad).min(w as f32);
        let y0 = (band_y as f32 - pad).max(0.0);
        let y1 = ((band_y + band_height) as f32 + pad).min(gray.height() as f32);
        Some(TextRegion::rect(x0, y0, x1 - x0, y1 - y0, score))
    }
}

impl Default for CaptionBandDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl TextDetector for CaptionBandDetector {
    fn detect(&self, image: &RgbImage) -> DetectResult<Vec<TextRegion>> {
        let gray = image::imageops::grayscale(image);
        let regions: Vec<TextRegion> = self
            .find_bands(&gray)
            .into_iter()
            .filter_map(|(y, h)| self.describe_band(&gray, y, h))
            .collect();
        debug!("CaptionBandDetector: {} caption bands", regions.len());
        Ok(regions)
    }
}

/// 文字遮挡：把置信度高于阈值的文字区域填成纯色
#[derive(Clone)]
pub struct TextMasker {
    detector: Arc<dyn TextDetector>,
    min_score: f32,
    fill: Rgb<u8>,
}

impl TextMasker {
    pub fn new(detector: Arc<dyn TextDetector>, min_score: f32, fill: [u8; 3]) -> Self {
        Self {
            detector,
            min_score,
            fill: Rgb(fill),
        }
    }

    /// 返回遮挡后的副本；检测失败时原样返回
    pub fn mask(&self, image: &RgbImage) -> RgbImage {
        let mut output = image.clone();
        let regions = match self.detector.detect(image) {
            Ok(regions) => regions,
            Err(e) => {
                warn!("⚠️ Text detection failed, frame left unmasked: {}", e);
                return output;
            }
        };

        let mut filled = 0;
        for region in regions.iter().filter(|r| r.score > self.min_score) {
            if fill_quad(&mut output, &region.quad, self.fill) {
                filled += 1;
            }
        }
        debug!("TextMasker: filled {}/{} regions", filled, regions.len());
        output
    }
}

/// 填充四边形，退化（少于三个不同顶点）时跳过
fn fill_quad(image: &mut RgbImage, quad: &[(f32, f32); 4], color: Rgb<u8>) -> bool {
    let mut points: Vec<Point<i32>> = Vec::with_capacity(4);
    for &(x, y) in quad {
        let p = Point::new(x.round() as i32, y.round() as i32);
        if points.last() != Some(&p) {
            points.push(p);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return false;
    }
    imageproc::drawing::draw_polygon_mut(image, &points, color);
    true
}
