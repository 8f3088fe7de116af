use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 帧数据结构
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: Duration,
    pub frame_number: u64,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp_ms: u64, frame_number: u64) -> Self {
        Self {
            image,
            timestamp: Duration::from_millis(timestamp_ms),
            frame_number,
        }
    }

    /// 从任意格式的解码图像构造（静态图片按第 0 帧处理）
    pub fn from_dynamic(image: DynamicImage, frame_number: u64) -> Self {
        Self::new(image.to_rgb8(), 0, frame_number)
    }

    /// 从 RGB24 原始数据构造，数据长度不符时返回 None
    pub fn from_rgb_raw(
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(|image| Self::new(image, timestamp_ms, frame_number))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// 裁剪像素区域；区域与画面无交集时返回 None
    pub fn crop(&self, region: &PixelRect) -> Option<RgbImage> {
        let clipped = region.clip_to(self.width(), self.height())?;
        Some(
            image::imageops::crop_imm(
                &self.image,
                clipped.x as u32,
                clipped.y as u32,
                clipped.width,
                clipped.height,
            )
            .to_image(),
        )
    }
}

/// 绝对像素坐标的矩形，左上角可以落在画面外
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// 裁到画面范围内；裁剪后为空则返回 None
    pub fn clip_to(&self, frame_width: u32, frame_height: u32) -> Option<PixelRect> {
        let x0 = self.x.max(0);
        let y0 = self.y.max(0);
        let x1 = (self.x + self.width as i64).min(frame_width as i64);
        let y1 = (self.y + self.height as i64).min(frame_height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect {
            x: x0,
            y: y0,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}
