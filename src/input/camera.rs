//! 摄像头采集模块 - 每路摄像头一个独立采集线程
//!
//! 连续读帧失败达到上限后断开重连 (有限次数, 间隔逐次翻倍);
//! 重连彻底失败则进入 Failed 状态, 低频输出占位帧, 不会空转也不会崩溃。

use super::device::{CaptureDevice, DeviceOpener, DeviceSelector, Frame};
use super::lifecycle::BoxLifecycle;
use super::queue::DropOldestQueue;
use crate::config::CameraProfile;
use crate::error::CaptureError;
use image::RgbImage;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

// ========== 状态 ==========

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraState {
    Disconnected,
    Connecting,
    Streaming,
    Failed,
}

/// 跨线程可读的采集状态
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: CameraState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> CameraState {
        match self.0.load(Ordering::Acquire) {
            0 => CameraState::Disconnected,
            1 => CameraState::Connecting,
            2 => CameraState::Streaming,
            _ => CameraState::Failed,
        }
    }

    pub fn set(&self, state: CameraState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// 采集统计
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub frames: AtomicU64,
    pub read_failures: AtomicU64,
    pub reconnects: AtomicU64,
}

// ========== 采集源 ==========

pub struct CameraSource {
    box_id: u32,
    selector: DeviceSelector,
    opener: Arc<dyn DeviceOpener>,
    profile: CameraProfile,
    device: Option<Box<dyn CaptureDevice>>,
    state: Arc<StateCell>,
    stats: Arc<CaptureStats>,
    failures: u32,
    seq: u64,
    placeholder: Arc<RgbImage>,
    last_placeholder: Option<Instant>,
}

impl CameraSource {
    /// 打开设备并读取一帧验证; 成功时返回采集源与首帧
    pub fn open(
        box_id: u32,
        selector: DeviceSelector,
        opener: Arc<dyn DeviceOpener>,
        profile: CameraProfile,
        placeholder: Arc<RgbImage>,
    ) -> Result<(Self, Frame), CaptureError> {
        let state = Arc::new(StateCell::new(CameraState::Connecting));
        info!("📹 摄像头 {} 连接中: {}", box_id, selector);

        let mut device = opener.open(&selector, &profile)?;
        let first = device.read().map_err(|e| match e {
            CaptureError::ReadFailure { .. } => e,
            other => CaptureError::ReadFailure {
                selector: selector.to_string(),
                reason: other.to_string(),
            },
        })?;

        state.set(CameraState::Streaming);
        info!(
            "✅ 摄像头 {} 连接成功 ({}x{})",
            box_id,
            first.width(),
            first.height()
        );

        let stats = Arc::new(CaptureStats::default());
        stats.frames.fetch_add(1, Ordering::Relaxed);

        let source = Self {
            box_id,
            selector,
            opener,
            profile,
            device: Some(device),
            state,
            stats,
            failures: 0,
            seq: 1,
            placeholder,
            last_placeholder: None,
        };
        Ok((source, Frame::new(first, 0)))
    }

    pub fn box_id(&self) -> u32 {
        self.box_id
    }

    pub fn state(&self) -> CameraState {
        self.state.get()
    }

    pub fn state_handle(&self) -> Arc<StateCell> {
        self.state.clone()
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    /// 采集循环, 直到收到停止请求
    pub fn run(mut self, queue: Arc<DropOldestQueue<Frame>>, lifecycle: Arc<BoxLifecycle>) {
        info!("🎥 摄像头 {} 采集线程启动", self.box_id);
        while lifecycle.is_active() {
            self.poll_once(&queue, &lifecycle);
        }
        self.release();
        info!("📹 摄像头 {} 采集线程结束", self.box_id);
    }

    /// 执行一轮采集
    pub fn poll_once(&mut self, queue: &DropOldestQueue<Frame>, lifecycle: &BoxLifecycle) {
        match self.state.get() {
            CameraState::Streaming => self.read_step(queue, lifecycle),
            CameraState::Failed => self.placeholder_step(queue, lifecycle),
            CameraState::Connecting | CameraState::Disconnected => {
                if !self.reconnect(lifecycle) && lifecycle.is_active() {
                    self.enter_failed();
                }
            }
        }
    }

    fn read_step(&mut self, queue: &DropOldestQueue<Frame>, lifecycle: &BoxLifecycle) {
        let result = match self.device.as_mut() {
            Some(device) => device.read(),
            None => Err(CaptureError::ReadFailure {
                selector: self.selector.to_string(),
                reason: "device released".to_string(),
            }),
        };

        match result {
            Ok(image) => {
                if self.failures > 0 {
                    debug!("摄像头 {} 恢复读帧 (此前连续失败 {} 次)", self.box_id, self.failures);
                }
                self.failures = 0;
                let frame = Frame::new(image, self.next_seq());
                self.stats.frames.fetch_add(1, Ordering::Relaxed);
                queue.push(frame);
            }
            Err(e) => {
                self.failures += 1;
                self.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                if self.failures <= 3 || self.failures % 10 == 0 {
                    warn!(
                        "⚠️ 摄像头 {} 读帧失败 ({}/{}): {}",
                        self.box_id, self.failures, self.profile.max_failures, e
                    );
                }
                if self.failures >= self.profile.max_failures {
                    warn!("⚠️ 摄像头 {} 连续失败 {} 次, 尝试重连", self.box_id, self.failures);
                    if !self.reconnect(lifecycle) && lifecycle.is_active() {
                        self.enter_failed();
                    }
                }
            }
        }
    }

    /// 有限次数重连; 成功返回 true
    fn reconnect(&mut self, lifecycle: &BoxLifecycle) -> bool {
        self.state.set(CameraState::Connecting);
        self.release_device();

        let mut backoff = self.profile.reconnect_backoff();
        for attempt in 1..=self.profile.reconnect_attempts {
            if !lifecycle.sleep(backoff) {
                return false;
            }
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            match self.try_open() {
                Ok(device) => {
                    self.device = Some(device);
                    self.failures = 0;
                    self.state.set(CameraState::Streaming);
                    info!("✅ 摄像头 {} 重连成功 (第{}次)", self.box_id, attempt);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "⚠️ 摄像头 {} 重连失败 ({}/{}): {}",
                        self.box_id, attempt, self.profile.reconnect_attempts, e
                    );
                }
            }
            backoff = backoff.saturating_mul(2);
        }
        false
    }

    fn try_open(&self) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        let mut device = self.opener.open(&self.selector, &self.profile)?;
        device.read()?;
        Ok(device)
    }

    fn enter_failed(&mut self) {
        self.release_device();
        self.state.set(CameraState::Failed);
        error!(
            "❌ 摄像头 {} 重连失败 (重试{}次), 切换为无信号模式",
            self.box_id, self.profile.reconnect_attempts
        );
    }

    fn placeholder_step(&mut self, queue: &DropOldestQueue<Frame>, lifecycle: &BoxLifecycle) {
        let interval = self.profile.placeholder_interval();
        if let Some(last) = self.last_placeholder {
            let elapsed = last.elapsed();
            if elapsed < interval && !lifecycle.sleep(interval - elapsed) {
                return;
            }
        }
        let frame = Frame::placeholder(self.placeholder.clone(), self.next_seq());
        queue.push(frame);
        self.last_placeholder = Some(Instant::now());
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn release_device(&mut self) {
        if self.device.take().is_some() {
            debug!("摄像头 {} 设备已释放", self.box_id);
        }
    }

    fn release(&mut self) {
        self.release_device();
        self.state.set(CameraState::Disconnected);
    }
}
