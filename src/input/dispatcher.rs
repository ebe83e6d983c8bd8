//! 摄像头调度器 - 按操作员请求启停各路摄像头
//!
//! 每路摄像头的资源 (采集源, 两个队列, 两个线程, 生命周期) 作为一个整体创建与销毁;
//! 启停由控制锁串行化, 停止要等线程退出、设备释放后才放开控制锁。
//! 状态与拉流只取表锁, 不等待启停。

use super::camera::{CameraSource, CameraState, CaptureStats, StateCell};
use super::device::{DeviceSelector, Frame};
use super::lifecycle::BoxLifecycle;
use super::queue::DropOldestQueue;
use crate::error::CaptureError;
use crate::pipeline::{BoxStats, PipelineContext};
use crate::recognition::worker::RecognitionWorker;
use crate::renderer::stream::{AnnotatedFrame, FrameStream};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tracing::{info, warn};

/// 单路摄像头运行资源
struct BoxUnit {
    selector: DeviceSelector,
    lifecycle: Arc<BoxLifecycle>,
    raw: Arc<DropOldestQueue<Frame>>,
    output: Arc<DropOldestQueue<AnnotatedFrame>>,
    camera_state: Arc<StateCell>,
    capture_stats: Arc<CaptureStats>,
    stats: Arc<BoxStats>,
    threads: Vec<JoinHandle<()>>,
}

/// 状态查询结果
#[derive(Clone, Debug, PartialEq)]
pub struct BoxStatus {
    pub box_id: u32,
    pub selector: String,
    pub state: CameraState,
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub faces_seen: u64,
    pub reconnects: u64,
    pub dropped_frames: u64,
    pub fps: f64,
}

pub struct FrameDispatcher {
    ctx: Arc<PipelineContext>,
    /// 启停控制锁
    control: Mutex<()>,
    boxes: Mutex<BTreeMap<u32, BoxUnit>>,
}

impl FrameDispatcher {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            control: Mutex::new(()),
            boxes: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u32, BoxUnit>> {
        self.boxes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn control(&self) -> MutexGuard<'_, ()> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 启动一路摄像头: 打开设备并验证读帧, 成功后创建采集与识别线程
    pub fn start(&self, box_id: u32, selector: &str) -> Result<(), CaptureError> {
        let selector = DeviceSelector::parse(selector)?;
        let _control = self.control();
        if self.lock().contains_key(&box_id) {
            return Err(CaptureError::BoxBusy(box_id));
        }

        let profile = self.ctx.config.camera.clone();
        let failed = self
            .ctx
            .painter
            .placeholder(profile.width, profile.height, "CAMERA FAILED", box_id);
        let (source, first) = CameraSource::open(
            box_id,
            selector.clone(),
            self.ctx.opener.clone(),
            profile.clone(),
            failed,
        )?;

        let lifecycle = Arc::new(BoxLifecycle::new());
        let raw = Arc::new(DropOldestQueue::new(profile.raw_queue_capacity));
        let output = Arc::new(DropOldestQueue::new(profile.output_queue_capacity));
        let stats = Arc::new(BoxStats::default());
        let camera_state = source.state_handle();
        let capture_stats = source.stats();
        raw.push(first);

        let mut threads = Vec::with_capacity(2);
        let capture = {
            let (raw, lifecycle) = (raw.clone(), lifecycle.clone());
            std::thread::Builder::new()
                .name(format!("capture-{}", box_id))
                .spawn(move || source.run(raw, lifecycle))
        };
        match capture {
            Ok(handle) => threads.push(handle),
            Err(source) => return Err(CaptureError::Spawn { box_id, source }),
        }

        let worker = RecognitionWorker::new(box_id, self.ctx.clone(), stats.clone());
        let recognition = {
            let (raw, output, lifecycle) = (raw.clone(), output.clone(), lifecycle.clone());
            std::thread::Builder::new()
                .name(format!("recognize-{}", box_id))
                .spawn(move || worker.run(raw, output, lifecycle))
        };
        match recognition {
            Ok(handle) => threads.push(handle),
            Err(source) => {
                lifecycle.request_stop();
                for t in threads {
                    let _ = t.join();
                }
                return Err(CaptureError::Spawn { box_id, source });
            }
        }

        self.lock().insert(
            box_id,
            BoxUnit {
                selector,
                lifecycle,
                raw,
                output,
                camera_state,
                capture_stats,
                stats,
                threads,
            },
        );
        info!("▶️ 摄像头 {} 已启动", box_id);
        Ok(())
    }

    /// 停止一路摄像头: 通知线程退出, 等待结束, 释放队列
    pub fn stop(&self, box_id: u32) -> Result<(), CaptureError> {
        let _control = self.control();
        let unit = self
            .lock()
            .remove(&box_id)
            .ok_or(CaptureError::UnknownBox(box_id))?;
        Self::teardown(box_id, unit);
        Ok(())
    }

    pub fn stop_all(&self) {
        let _control = self.control();
        let units = std::mem::take(&mut *self.lock());
        for (box_id, unit) in units {
            Self::teardown(box_id, unit);
        }
    }

    fn teardown(box_id: u32, unit: BoxUnit) {
        unit.lifecycle.request_stop();
        for handle in unit.threads {
            if handle.join().is_err() {
                warn!("⚠️ 摄像头 {} 的工作线程异常退出", box_id);
            }
        }
        unit.raw.clear();
        unit.output.clear();
        unit.lifecycle.mark_stopped();
        info!("⏹️ 摄像头 {} 已停止", box_id);
    }

    pub fn is_running(&self, box_id: u32) -> bool {
        self.lock().contains_key(&box_id)
    }

    pub fn active_boxes(&self) -> Vec<u32> {
        self.lock().keys().copied().collect()
    }

    /// 拉流接口; 未启动的摄像头返回占位流
    pub fn stream(&self, box_id: u32) -> FrameStream {
        let profile = &self.ctx.config.camera;
        let no_signal = self
            .ctx
            .painter
            .placeholder(profile.width, profile.height, "NO SIGNAL", box_id);
        let quality = self.ctx.config.audit.jpeg_quality;
        match self.lock().get(&box_id) {
            Some(unit) => FrameStream::live(
                box_id,
                unit.output.clone(),
                unit.lifecycle.clone(),
                no_signal,
                quality,
            ),
            None => FrameStream::offline(box_id, no_signal, quality),
        }
    }

    pub fn status(&self) -> Vec<BoxStatus> {
        self.lock()
            .iter()
            .map(|(box_id, unit)| BoxStatus {
                box_id: *box_id,
                selector: unit.selector.to_string(),
                state: unit.camera_state.get(),
                frames_captured: unit.capture_stats.frames.load(Ordering::Relaxed),
                frames_processed: unit.stats.frames_processed.load(Ordering::Relaxed),
                faces_seen: unit.stats.faces_seen.load(Ordering::Relaxed),
                reconnects: unit.capture_stats.reconnects.load(Ordering::Relaxed),
                dropped_frames: unit.raw.dropped() + unit.output.dropped(),
                fps: unit.stats.fps(),
            })
            .collect()
    }
}

impl Drop for FrameDispatcher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::access_log::AccessLogThrottler;
    use crate::alerting::audit::FileAuditStore;
    use crate::alerting::throttle::{AlertThrottler, CooldownScope};
    use crate::alerting::transport::LogTransport;
    use crate::config::{CameraProfile, SentinelConfig};
    use crate::detection::adapter::{DetectionEmbeddingAdapter, NullAnalyzer};
    use crate::input::device::{CaptureDevice, DeviceOpener};
    use crate::recognition::enrollment::EnrollmentListener;
    use crate::recognition::store::EmbeddingStore;
    use crate::renderer::draw::Painter;
    use image::RgbImage;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    struct SolidDevice;

    impl CaptureDevice for SolidDevice {
        fn read(&mut self) -> Result<RgbImage, CaptureError> {
            std::thread::sleep(Duration::from_millis(5));
            Ok(RgbImage::new(64, 48))
        }
    }

    struct TestOpener;

    impl DeviceOpener for TestOpener {
        fn open(
            &self,
            selector: &DeviceSelector,
            _profile: &CameraProfile,
        ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            match selector {
                DeviceSelector::Index(0) | DeviceSelector::Index(1) => Ok(Box::new(SolidDevice)),
                other => Err(CaptureError::NoDevice(other.to_string())),
            }
        }
    }

    /// 读帧较慢的设备, 记录同时打开的设备数
    struct SlowDevice {
        live: Arc<AtomicUsize>,
    }

    impl CaptureDevice for SlowDevice {
        fn read(&mut self) -> Result<RgbImage, CaptureError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(RgbImage::new(64, 48))
        }
    }

    impl Drop for SlowDevice {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct SlowOpener {
        live: Arc<AtomicUsize>,
        peak: AtomicUsize,
    }

    impl DeviceOpener for SlowOpener {
        fn open(
            &self,
            _selector: &DeviceSelector,
            _profile: &CameraProfile,
        ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(SlowDevice {
                live: self.live.clone(),
            }))
        }
    }

    fn dispatcher(dir: &std::path::Path) -> FrameDispatcher {
        dispatcher_with(dir, Arc::new(TestOpener))
    }

    fn dispatcher_with(dir: &std::path::Path, opener: Arc<dyn DeviceOpener>) -> FrameDispatcher {
        let mut config = SentinelConfig::default();
        config.camera.width = 64;
        config.camera.height = 48;
        config.audit.root = dir.to_path_buf();
        let config = Arc::new(config);
        let audit = Arc::new(FileAuditStore::new(dir, 85));
        let (reload, _rx) = EnrollmentListener::channel();
        let ctx = PipelineContext {
            config: config.clone(),
            store: Arc::new(EmbeddingStore::new(Duration::from_secs(300))),
            adapter: Arc::new(DetectionEmbeddingAdapter::new(
                Arc::new(NullAnalyzer),
                config.recognition.filter.clone(),
            )),
            alerts: Arc::new(AlertThrottler::new(
                Duration::from_secs(900),
                CooldownScope::Global,
                Vec::new(),
                "ISSC System",
                Arc::new(LogTransport),
            )),
            access_log: Arc::new(AccessLogThrottler::new(Duration::from_secs(2), audit.clone())),
            audit,
            opener,
            painter: Painter::without_font(),
            reload,
        };
        FrameDispatcher::new(Arc::new(ctx))
    }

    #[test]
    fn test_start_stream_stop() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        d.start(1, "0").unwrap();
        assert!(d.is_running(1));
        assert!(matches!(d.start(1, "1"), Err(CaptureError::BoxBusy(1))));

        let stream = d.stream(1);
        assert!(stream.is_live());
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut got = None;
        while got.is_none() && Instant::now() < deadline {
            got = stream.next_frame(Duration::from_millis(50));
        }
        let frame = got.unwrap();
        assert_eq!(frame.box_id, 1);
        assert!(!frame.placeholder);

        let status = d.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].state, CameraState::Streaming);

        d.stop(1).unwrap();
        assert!(!d.is_running(1));
        assert!(!stream.is_live());
        assert!(matches!(d.stop(1), Err(CaptureError::UnknownBox(1))));
    }

    #[test]
    fn test_start_unknown_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        assert!(matches!(d.start(3, "7"), Err(CaptureError::NoDevice(_))));
        assert!(matches!(d.start(3, "???"), Err(CaptureError::NoDevice(_))));
        assert!(d.active_boxes().is_empty());
    }

    #[test]
    fn test_offline_stream_for_unstarted_box() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let frame = d
            .stream(5)
            .next_frame(Duration::from_millis(1))
            .unwrap();
        assert!(frame.placeholder);
        assert_eq!((frame.image.width(), frame.image.height()), (64, 48));
    }

    #[test]
    fn test_stop_all_independent_boxes() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        d.start(1, "0").unwrap();
        d.start(2, "1").unwrap();
        assert_eq!(d.active_boxes(), vec![1, 2]);
        d.stop(1).unwrap();
        assert_eq!(d.active_boxes(), vec![2]);
        d.stop_all();
        assert!(d.active_boxes().is_empty());
    }

    #[test]
    fn test_restart_waits_for_previous_device_release() {
        let dir = tempfile::tempdir().unwrap();
        let opener = Arc::new(SlowOpener::default());
        let d = Arc::new(dispatcher_with(dir.path(), opener.clone()));
        d.start(1, "0").unwrap();
        assert_eq!(opener.live.load(Ordering::SeqCst), 1);

        let stopper = {
            let d = d.clone();
            std::thread::spawn(move || d.stop(1))
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while d.is_running(1) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        // 旧设备仍在读帧时发起重启
        d.start(1, "0").unwrap();
        stopper.join().unwrap().unwrap();

        assert_eq!(opener.peak.load(Ordering::SeqCst), 1);
        assert_eq!(opener.live.load(Ordering::SeqCst), 1);
        d.stop(1).unwrap();
        assert_eq!(opener.live.load(Ordering::SeqCst), 0);
    }
}
