#![cfg(feature = "backend-ffmpeg")]

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use ffmpeg::util::error::{EAGAIN, EWOULDBLOCK};
use ffmpeg_next as ffmpeg;
use log::{debug, info};

use super::frame::Frame;
use super::source::VideoSource;
use crate::core::error::{DetectError, DetectResult};

/// FFmpeg 解码的视频文件
///
/// 每次 scan 都重新打开输入，句柄在函数返回时释放。
pub struct FfmpegVideoSource {
    input: PathBuf,
}

impl FfmpegVideoSource {
    pub fn open<P: AsRef<Path>>(path: P) -> DetectResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DetectError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("input file {} does not exist", path.display()),
            )));
        }
        ffmpeg::init().map_err(decode_error)?;
        Ok(Self {
            input: path.to_path_buf(),
        })
    }

    /// 解码并把 `selection` 选中的帧转成 RGB 交给回调；未选中的帧只计数不做缩放
    fn decode_loop(
        &self,
        selection: FrameSelection,
        visit: &mut dyn FnMut(Frame) -> ControlFlow<()>,
    ) -> DetectResult<u64> {
        let mut ictx = ffmpeg::format::input(&self.input).map_err(decode_error)?;
        let input_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| DetectError::VideoDecode("no video stream found".to_string()))?;
        let stream_index = input_stream.index();
        let time_base = input_stream.time_base();

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(decode_error)?;
        let mut decoder = context.decoder().video().map_err(decode_error)?;

        info!(
            "🎥 FFmpeg: {}x{} {:?} from {}",
            decoder.width(),
            decoder.height(),
            decoder.format(),
            self.input.display()
        );

        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(decode_error)?;

        let mut decoded = ffmpeg::util::frame::Video::empty();
        let mut converted = ffmpeg::util::frame::Video::empty();
        let mut frame_number = 0u64;

        // 返回 true 表示调用方要求停止
        let mut drain = |decoder: &mut ffmpeg::decoder::Video| -> DetectResult<bool> {
            loop {
                match decoder.receive_frame(&mut decoded) {
                    Ok(()) => {
                        let number = frame_number;
                        frame_number += 1;
                        if !selection.wants(number) {
                            continue;
                        }
                        scaler.run(&decoded, &mut converted).map_err(decode_error)?;
                        let frame = frame_from_converted(&converted, decoded.pts(), time_base, number)?;
                        if visit(frame).is_break() || selection.is_last(number) {
                            return Ok(true);
                        }
                    }
                    Err(err) => {
                        if is_retryable_error(&err) || matches!(err, ffmpeg::Error::Eof) {
                            return Ok(false);
                        }
                        return Err(decode_error(err));
                    }
                }
            }
        };

        let mut stopped = false;
        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            if let Err(err) = decoder.send_packet(&packet) {
                if !is_retryable_error(&err) {
                    return Err(decode_error(err));
                }
            }
            if drain(&mut decoder)? {
                stopped = true;
                break;
            }
        }

        if !stopped {
            decoder.send_eof().map_err(decode_error)?;
            drain(&mut decoder)?;
        } else {
            debug!("FFmpeg: scan stopped early by caller");
        }
        Ok(frame_number)
    }
}

impl VideoSource for FfmpegVideoSource {
    fn scan(&self, visit: &mut dyn FnMut(Frame) -> ControlFlow<()>) -> DetectResult<u64> {
        self.decode_loop(FrameSelection::All, visit)
    }

    fn frame_at(&self, index: u64) -> DetectResult<Option<Frame>> {
        let mut found = None;
        self.decode_loop(FrameSelection::Only(index), &mut |frame| {
            found = Some(frame);
            ControlFlow::Break(())
        })?;
        Ok(found)
    }

    fn describe(&self) -> String {
        format!("ffmpeg({})", self.input.display())
    }
}

impl Drop for FfmpegVideoSource {
    fn drop(&mut self) {
        debug!("🗑️ FfmpegVideoSource: released {}", self.input.display());
    }
}

/// 解码时需要转成 RGB 的帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameSelection {
    All,
    Only(u64),
}

impl FrameSelection {
    fn wants(self, frame_number: u64) -> bool {
        match self {
            FrameSelection::All => true,
            FrameSelection::Only(target) => frame_number == target,
        }
    }

    /// 之后不再有需要的帧，可以停止解码
    fn is_last(self, frame_number: u64) -> bool {
        match self {
            FrameSelection::All => false,
            FrameSelection::Only(target) => frame_number >= target,
        }
    }
}

fn frame_from_converted(
    frame: &ffmpeg::util::frame::Video,
    pts: Option<i64>,
    time_base: ffmpeg::Rational,
    frame_number: u64,
) -> DetectResult<Frame> {
    let plane = frame.data(0);
    let stride = frame.stride(0);
    let width = frame.width();
    let height = frame.height();
    let row_bytes = width as usize * 3;
    let mut buffer = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let offset = row * stride;
        buffer.extend_from_slice(&plane[offset..offset + row_bytes]);
    }
    let timestamp_ms = pts
        .map(|pts| (pts as f64 * f64::from(time_base) * 1000.0).max(0.0) as u64)
        .unwrap_or(0);
    Frame::from_rgb_raw(width, height, buffer, timestamp_ms, frame_number).ok_or_else(|| {
        DetectError::VideoDecode(format!("frame {} has inconsistent size", frame_number))
    })
}

fn is_retryable_error(error: &ffmpeg::Error) -> bool {
    matches!(
        error,
        ffmpeg::Error::Other { errno }
            if *errno == EAGAIN || *errno == EWOULDBLOCK
    )
}

fn decode_error(err: ffmpeg::Error) -> DetectError {
    DetectError::VideoDecode(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_only_converts_target() {
        let only = FrameSelection::Only(3);
        let wanted: Vec<u64> = (0..6).filter(|&n| only.wants(n)).collect();
        assert_eq!(wanted, vec![3]);
        assert!(!only.is_last(2));
        assert!(only.is_last(3));

        assert!((0..6).all(|n| FrameSelection::All.wants(n)));
        assert!(!FrameSelection::All.is_last(u64::MAX));
    }

    #[test]
    fn missing_file_returns_error() {
        let result = FfmpegVideoSource::open("/tmp/nonexistent-deepfake-input.mp4");
        assert!(result.is_err());
    }
}
