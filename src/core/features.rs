//! β 向量特征提取
//!
//! 人脸区域按 BT.601 灰度化，双线性缩放到 256x256（半像素对齐、不做抗混叠），
//! 切成 32x32 个 8x8 块，逐块做正交二维 DCT。
//! 对 64 个系数位置分别求跨块标准差并除以 √2，去掉直流分量后得到 63 维描述子。

use image::{DynamicImage, GrayImage, Luma, RgbImage};
use rustdct::{Dct2, DctPlanner, TransformType2And3};
use std::sync::Arc;
use thiserror::Error;

/// DCT 块边长
const BLOCK: usize = 8;
/// 每块系数个数
const COEFFS: usize = BLOCK * BLOCK;
/// 描述子长度（去掉直流项）
pub const DESCRIPTOR_LEN: usize = COEFFS - 1;
/// 默认缩放边长
pub const DEFAULT_RESIZE: u32 = 256;

/// 63 维 β 描述子，按系数行优先顺序排列（位置 1..64）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BetaDescriptor([f32; DESCRIPTOR_LEN]);

impl BetaDescriptor {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.0.to_vec()
    }

    /// 逐元素平均（多张人脸合并为帧描述子）
    pub fn mean(items: &[BetaDescriptor]) -> Vec<f32> {
        let mut sum = [0.0f64; DESCRIPTOR_LEN];
        for item in items {
            for (acc, &v) in sum.iter_mut().zip(item.0.iter()) {
                *acc += v as f64;
            }
        }
        let n = items.len().max(1) as f64;
        sum.iter().map(|acc| (acc / n) as f32).collect()
    }
}

/// 人脸区域无法产出描述子的原因
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("face region is empty")]
    EmptyRegion,
    #[error("DCT produced non-finite coefficients")]
    NonFinite,
}

/// 分块 DCT 特征提取器，持有复用的 8 点 DCT 计划
pub struct BetaExtractor {
    dct: Arc<dyn TransformType2And3<f64>>,
    resize: u32,
}

impl BetaExtractor {
    pub fn new() -> Self {
        Self::with_resize(DEFAULT_RESIZE)
    }

    /// 自定义缩放边长，会向下取整到 8 的倍数（最小 8）
    pub fn with_resize(resize: u32) -> Self {
        let resize = (resize / BLOCK as u32).max(1) * BLOCK as u32;
        let mut planner = DctPlanner::new();
        Self {
            dct: planner.plan_dct2(BLOCK),
            resize,
        }
    }

    pub fn resize(&self) -> u32 {
        self.resize
    }

    /// 从任意彩色或灰度图像提取描述子
    pub fn extract(&self, image: &DynamicImage) -> Result<BetaDescriptor, ExtractError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ExtractError::EmptyRegion);
        }
        match image {
            DynamicImage::ImageLuma8(gray) => self.extract_gray(gray),
            other => self.extract_gray(&luma_bt601(&other.to_rgb8())),
        }
    }

    /// RGB 人脸区域，先按 BT.601 转灰度
    pub fn extract_rgb(&self, rgb: &RgbImage) -> Result<BetaDescriptor, ExtractError> {
        self.extract_gray(&luma_bt601(rgb))
    }

    pub fn extract_gray(&self, gray: &GrayImage) -> Result<BetaDescriptor, ExtractError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(ExtractError::EmptyRegion);
        }

        let resized = resize_linear(gray, self.resize, self.resize);
        let stats = self.block_statistics(&resized);
        let mut beta = [0.0f32; DESCRIPTOR_LEN];
        for (k, slot) in beta.iter_mut().enumerate() {
            // 跳过位置 0（直流项，反映亮度）
            let sigma = stats.std_dev(k + 1);
            let value = (sigma / std::f64::consts::SQRT_2) as f32;
            if !value.is_finite() {
                return Err(ExtractError::NonFinite);
            }
            *slot = value;
        }
        Ok(BetaDescriptor(beta))
    }

    /// 对每个 8x8 块做 DCT，并累积每个系数位置的一阶、二阶矩
    fn block_statistics(&self, img: &GrayImage) -> CoefficientStats {
        let side = img.width() as usize;
        let blocks = side / BLOCK;
        let mut stats = CoefficientStats::default();
        let mut block = [0.0f64; COEFFS];

        for by in 0..blocks {
            for bx in 0..blocks {
                for y in 0..BLOCK {
                    for x in 0..BLOCK {
                        let px = img.get_pixel((bx * BLOCK + x) as u32, (by * BLOCK + y) as u32);
                        block[y * BLOCK + x] = px[0] as f64;
                    }
                }
                self.dct_2d(&mut block);
                stats.push(&block);
            }
        }
        stats
    }

    /// 正交归一化的二维 DCT-II，结果按 [垂直频率][水平频率] 行优先排列
    fn dct_2d(&self, block: &mut [f64; COEFFS]) {
        for row in block.chunks_exact_mut(BLOCK) {
            self.dct.process_dct2(row);
        }

        let mut column = [0.0f64; BLOCK];
        for x in 0..BLOCK {
            for y in 0..BLOCK {
                column[y] = block[y * BLOCK + x];
            }
            self.dct.process_dct2(&mut column);
            for y in 0..BLOCK {
                block[y * BLOCK + x] = column[y];
            }
        }

        // rustdct 不做归一化：第 0 项乘 √(1/N)，其余乘 √(2/N)，两个方向各一次
        let n = BLOCK as f64;
        let scale = |k: usize| if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        for v in 0..BLOCK {
            for u in 0..BLOCK {
                block[v * BLOCK + u] *= scale(v) * scale(u);
            }
        }
    }
}

impl Default for BetaExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// BT.601 亮度，定点系数与舍入方式同 OpenCV 的 8 位 RGB 转灰度
pub fn luma_bt601(rgb: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let p = rgb.get_pixel(x, y);
        let v = (p[0] as u32 * R + p[1] as u32 * G + p[2] as u32 * B + (1 << (SHIFT - 1))) >> SHIFT;
        Luma([v.min(255) as u8])
    })
}

/// 像素中心对齐的双线性缩放，每个方向固定两个采样点
///
/// 缩小时不扩大采样窗口，高频纹理按原样保留。
pub fn resize_linear(src: &GrayImage, dst_width: u32, dst_height: u32) -> GrayImage {
    let (src_width, src_height) = src.dimensions();
    if (src_width, src_height) == (dst_width, dst_height) {
        return src.clone();
    }
    let xs = linear_taps(src_width, dst_width);
    let ys = linear_taps(src_height, dst_height);
    GrayImage::from_fn(dst_width, dst_height, |dx, dy| {
        let (x0, x1, wx) = xs[dx as usize];
        let (y0, y1, wy) = ys[dy as usize];
        let at = |x: u32, y: u32| src.get_pixel(x, y)[0] as f64;
        let top = at(x0, y0) * (1.0 - wx) + at(x1, y0) * wx;
        let bottom = at(x0, y1) * (1.0 - wx) + at(x1, y1) * wx;
        let v = top * (1.0 - wy) + bottom * wy;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// 每个目标坐标对应的 (左, 右, 右侧权重)；越界部分钳到边缘像素
fn linear_taps(src_len: u32, dst_len: u32) -> Vec<(u32, u32, f64)> {
    let scale = src_len as f64 / dst_len as f64;
    let last = src_len.saturating_sub(1);
    (0..dst_len)
        .map(|d| {
            let f = ((d as f64 + 0.5) * scale - 0.5).max(0.0);
            let i0 = (f.floor() as u32).min(last);
            if i0 >= last {
                return (last, last, 0.0);
            }
            (i0, i0 + 1, f - i0 as f64)
        })
        .collect()
}

/// 每个系数位置的样本计数、和、平方和（总体标准差）
struct CoefficientStats {
    count: usize,
    sum: [f64; COEFFS],
    sum_sq: [f64; COEFFS],
}

impl Default for CoefficientStats {
    fn default() -> Self {
        Self {
            count: 0,
            sum: [0.0; COEFFS],
            sum_sq: [0.0; COEFFS],
        }
    }
}

impl CoefficientStats {
    fn push(&mut self, block: &[f64; COEFFS]) {
        for (k, &c) in block.iter().enumerate() {
            self.sum[k] += c;
            self.sum_sq[k] += c * c;
        }
        self.count += 1;
    }

    fn std_dev(&self, k: usize) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let mean = self.sum[k] / n;
        (self.sum_sq[k] / n - mean * mean).max(0.0).sqrt()
    }
}
