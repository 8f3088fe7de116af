//! 视频帧来源
//!
//! 扫描阶段严格按帧序号顺序解码；证据渲染阶段按帧序号随机访问。
//! 解码句柄只在单次调用内存活，任何退出路径都会随作用域释放。

use super::frame::Frame;
use crate::core::error::DetectResult;
use image::RgbImage;
use std::ops::ControlFlow;

pub trait VideoSource {
    /// 从第 0 帧开始顺序解码，每帧回调一次；回调返回 Break 时提前结束。
    /// 返回已回调的帧数。中途解码失败时返回错误，已回调的帧仍然有效。
    fn scan(&self, visit: &mut dyn FnMut(Frame) -> ControlFlow<()>) -> DetectResult<u64>;

    /// 解码指定序号的帧，超出范围返回 None
    fn frame_at(&self, index: u64) -> DetectResult<Option<Frame>> {
        let mut found = None;
        self.scan(&mut |frame| {
            if frame.frame_number == index {
                found = Some(frame);
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(found)
    }

    /// 日志用的来源描述
    fn describe(&self) -> String;
}

/// 内存中的帧序列（宿主层已解码好的帧、测试）
pub struct MemoryVideoSource {
    frames: Vec<RgbImage>,
    frame_interval_ms: u64,
}

impl MemoryVideoSource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames,
            frame_interval_ms: 33,
        }
    }

    pub fn with_frame_interval(mut self, interval_ms: u64) -> Self {
        self.frame_interval_ms = interval_ms;
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn make_frame(&self, index: usize) -> Frame {
        let number = index as u64;
        Frame::new(self.frames[index].clone(), number * self.frame_interval_ms, number)
    }
}

impl VideoSource for MemoryVideoSource {
    fn scan(&self, visit: &mut dyn FnMut(Frame) -> ControlFlow<()>) -> DetectResult<u64> {
        let mut visited = 0u64;
        for index in 0..self.frames.len() {
            visited += 1;
            if visit(self.make_frame(index)).is_break() {
                break;
            }
        }
        Ok(visited)
    }

    fn frame_at(&self, index: u64) -> DetectResult<Option<Frame>> {
        let index = index as usize;
        if index < self.frames.len() {
            Ok(Some(self.make_frame(index)))
        } else {
            Ok(None)
        }
    }

    fn describe(&self) -> String {
        format!("memory({} frames)", self.frames.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(count: usize) -> Vec<RgbImage> {
        (0..count)
            .map(|i| RgbImage::from_pixel(4, 4, image::Rgb([i as u8, 0, 0])))
            .collect()
    }

    #[test]
    fn test_memory_scan_in_order() {
        let source = MemoryVideoSource::new(frames(5));
        let mut seen = Vec::new();
        let count = source
            .scan(&mut |frame| {
                seen.push(frame.frame_number);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(count, 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_memory_scan_break() {
        let source = MemoryVideoSource::new(frames(5));
        let count = source
            .scan(&mut |frame| {
                if frame.frame_number == 1 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_frame_at_random_access() {
        let source = MemoryVideoSource::new(frames(3)).with_frame_interval(40);
        let frame = source.frame_at(2).unwrap().unwrap();
        assert_eq!(frame.frame_number, 2);
        assert_eq!(frame.timestamp.as_millis(), 80);
        assert_eq!(frame.image.get_pixel(0, 0)[0], 2);
        assert!(source.frame_at(3).unwrap().is_none());
    }

    struct CountingSource(MemoryVideoSource);

    impl VideoSource for CountingSource {
        fn scan(&self, visit: &mut dyn FnMut(Frame) -> ControlFlow<()>) -> DetectResult<u64> {
            self.0.scan(visit)
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    #[test]
    fn test_default_frame_at_uses_scan() {
        let source = CountingSource(MemoryVideoSource::new(frames(4)));
        let frame = source.frame_at(3).unwrap().unwrap();
        assert_eq!(frame.frame_number, 3);
        assert!(source.frame_at(9).unwrap().is_none());
    }
}
