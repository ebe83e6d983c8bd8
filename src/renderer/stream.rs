/// 推流输出 (标注帧 → JPEG / MJPEG 分片)
/// Pull-side interface for stream consumers
use crate::input::lifecycle::BoxLifecycle;
use crate::input::queue::DropOldestQueue;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, RgbImage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 标注完成的帧 (识别线程 → 推流消费者)
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    pub box_id: u32,
    pub seq: u64,
    pub image: Arc<RgbImage>,
    pub faces: usize,
    pub placeholder: bool,
    pub produced_at: Instant,
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::with_capacity((image.width() * image.height()) as usize / 4);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode_image(image)?;
    Ok(buf)
}

/// multipart/x-mixed-replace 单个分片
pub fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// 单路拉流接口; 未启动的摄像头返回 "NO SIGNAL" 占位帧
pub struct FrameStream {
    box_id: u32,
    source: Option<(Arc<DropOldestQueue<AnnotatedFrame>>, Arc<BoxLifecycle>)>,
    no_signal: Arc<RgbImage>,
    quality: u8,
}

impl FrameStream {
    pub fn live(
        box_id: u32,
        queue: Arc<DropOldestQueue<AnnotatedFrame>>,
        lifecycle: Arc<BoxLifecycle>,
        no_signal: Arc<RgbImage>,
        quality: u8,
    ) -> Self {
        Self {
            box_id,
            source: Some((queue, lifecycle)),
            no_signal,
            quality,
        }
    }

    pub fn offline(box_id: u32, no_signal: Arc<RgbImage>, quality: u8) -> Self {
        Self {
            box_id,
            source: None,
            no_signal,
            quality,
        }
    }

    pub fn box_id(&self) -> u32 {
        self.box_id
    }

    pub fn is_live(&self) -> bool {
        self.source
            .as_ref()
            .map(|(_, lifecycle)| lifecycle.is_active())
            .unwrap_or(false)
    }

    /// 取下一帧; 摄像头已停止或未启动时返回占位帧, 超时返回 None
    pub fn next_frame(&self, timeout: Duration) -> Option<AnnotatedFrame> {
        match &self.source {
            Some((queue, lifecycle)) if lifecycle.is_active() => queue.pop_timeout(timeout),
            _ => Some(AnnotatedFrame {
                box_id: self.box_id,
                seq: 0,
                image: self.no_signal.clone(),
                faces: 0,
                placeholder: true,
                produced_at: Instant::now(),
            }),
        }
    }

    pub fn next_jpeg(&self, timeout: Duration) -> Option<Result<Vec<u8>, ImageError>> {
        self.next_frame(timeout)
            .map(|frame| encode_jpeg(&frame.image, self.quality))
    }

    pub fn next_part(&self, timeout: Duration) -> Option<Result<Vec<u8>, ImageError>> {
        self.next_jpeg(timeout)
            .map(|jpeg| jpeg.map(|bytes| mjpeg_part(&bytes)))
    }
}

/// 各路最近一次发布的 JPEG; 发布线程写入, 截图等读取方只读不消费队列
#[derive(Default)]
pub struct LatestFrames {
    frames: Mutex<HashMap<u32, Arc<Vec<u8>>>>,
}

impl LatestFrames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, box_id: u32, jpeg: Vec<u8>) {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(box_id, Arc::new(jpeg));
    }

    pub fn latest(&self, box_id: u32) -> Option<Arc<Vec<u8>>> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&box_id)
            .cloned()
    }

    /// 清除已停止摄像头的缓存帧
    pub fn retain(&self, active: &[u32]) {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|id, _| active.contains(id));
    }
}
