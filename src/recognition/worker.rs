/// 识别线程 (每路摄像头一个)
/// Per-box recognition worker: raw frame → detect → match → log/alert → annotate
use crate::detection::types::BBox;
use crate::input::device::Frame;
use crate::input::lifecycle::BoxLifecycle;
use crate::input::queue::DropOldestQueue;
use crate::pipeline::{BoxStats, PipelineContext};
use crate::renderer::overlay::{FaceOverlay, StableOverlayRenderer};
use crate::renderer::stream::AnnotatedFrame;
use chrono::Local;
use image::imageops;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// 单帧处理阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStage {
    Idle,
    Detecting,
    Matching,
    Annotating,
    Dispatched,
}

pub struct RecognitionWorker {
    box_id: u32,
    ctx: Arc<PipelineContext>,
    overlay: StableOverlayRenderer,
    stats: Arc<BoxStats>,
    stage: WorkerStage,
    counter: u64,
    detect_errors: u64,
    last_unauthorized_save: Option<Instant>,

    // 统计
    count: u64,
    last: Instant,
}

impl RecognitionWorker {
    pub fn new(box_id: u32, ctx: Arc<PipelineContext>, stats: Arc<BoxStats>) -> Self {
        let overlay = StableOverlayRenderer::new(
            ctx.config.overlay.history_len,
            ctx.config.overlay.clear_after(),
        );
        Self {
            box_id,
            ctx,
            overlay,
            stats,
            stage: WorkerStage::Idle,
            counter: 0,
            detect_errors: 0,
            last_unauthorized_save: None,
            count: 0,
            last: Instant::now(),
        }
    }

    pub fn stage(&self) -> WorkerStage {
        self.stage
    }

    /// 识别循环: 队列读超时后短暂退避, 收到停止请求一轮内退出
    pub fn run(
        mut self,
        raw: Arc<DropOldestQueue<Frame>>,
        output: Arc<DropOldestQueue<AnnotatedFrame>>,
        lifecycle: Arc<BoxLifecycle>,
    ) {
        info!("🔍 摄像头 {} 识别线程启动", self.box_id);
        let poll = self.ctx.config.camera.poll_timeout();
        let backoff = self.ctx.config.camera.idle_backoff();

        while lifecycle.is_active() {
            let Some(frame) = raw.pop_timeout(poll) else {
                if !lifecycle.sleep(backoff) {
                    break;
                }
                continue;
            };
            if !lifecycle.is_active() {
                break;
            }
            let annotated = self.process(&frame, Instant::now());
            output.push(annotated);
            self.tick();
        }
        info!("🔍 摄像头 {} 识别线程结束", self.box_id);
    }

    /// 每秒更新一次处理帧率
    fn tick(&mut self) {
        self.count += 1;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            let fps = self.count as f64 / elapsed;
            self.stats.set_fps(fps);
            debug!("📊 摄像头 {} 识别统计: {:.1} FPS", self.box_id, fps);
            self.count = 0;
            self.last = Instant::now();
        }
    }

    /// 处理一帧; 仅每 N 帧执行完整识别, 其余帧沿用上次叠加层
    pub fn process(&mut self, frame: &Frame, now: Instant) -> AnnotatedFrame {
        self.stage = WorkerStage::Idle;
        self.counter += 1;

        if frame.placeholder {
            self.overlay.reset();
            self.stage = WorkerStage::Dispatched;
            return AnnotatedFrame {
                box_id: self.box_id,
                seq: frame.seq,
                image: frame.image.clone(),
                faces: 0,
                placeholder: true,
                produced_at: now,
            };
        }

        let skip = self.ctx.config.recognition.frame_skip.max(1) as u64;
        let faces = if (self.counter - 1) % skip == 0 {
            let overlays = self.recognize(frame, now);
            self.stage = WorkerStage::Annotating;
            self.overlay.update(overlays, now)
        } else {
            self.stage = WorkerStage::Annotating;
            self.overlay.current(now)
        };

        let mut image = (*frame.image).clone();
        self.ctx.painter.annotate(&mut image, self.box_id, &faces);
        self.stats.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.stage = WorkerStage::Dispatched;

        AnnotatedFrame {
            box_id: self.box_id,
            seq: frame.seq,
            image: Arc::new(image),
            faces: faces.len(),
            placeholder: false,
            produced_at: now,
        }
    }

    /// 检测 + 匹配 + 出入记录/告警
    fn recognize(&mut self, frame: &Frame, now: Instant) -> Vec<FaceOverlay> {
        self.stage = WorkerStage::Detecting;
        let detections = match self.ctx.adapter.detect(frame) {
            Ok(d) => d,
            Err(e) => {
                self.detect_errors += 1;
                if self.detect_errors <= 3 || self.detect_errors % 100 == 0 {
                    warn!(
                        "⚠️ 摄像头 {} 人脸检测失败 (累计{}次): {}",
                        self.box_id, self.detect_errors, e
                    );
                }
                Vec::new()
            }
        };

        self.stage = WorkerStage::Matching;
        let threshold = self.ctx.config.recognition.distance_threshold;
        let mut overlays = Vec::with_capacity(detections.len());
        let mut strangers: Vec<(usize, BBox)> = Vec::new();

        for (index, det) in detections.into_iter().enumerate() {
            let result = self.ctx.store.match_embedding(&det.embedding, threshold);
            match (&result.identity, result.authorized) {
                (Some(identity), true) => {
                    self.ctx.access_log.log_at(self.box_id, identity, now);
                }
                _ => strangers.push((index, det.bbox)),
            }
            overlays.push(FaceOverlay {
                bbox: det.bbox,
                result,
            });
        }

        self.stats
            .faces_seen
            .fetch_add(overlays.len() as u64, Ordering::Relaxed);
        if !strangers.is_empty() {
            self.handle_strangers(frame, &strangers, now);
        }
        overlays
    }

    /// `strangers` 为 (帧内人脸序号, 框)
    fn handle_strangers(&mut self, frame: &Frame, strangers: &[(usize, BBox)], now: Instant) {
        self.stats.unauthorized_events.fetch_add(1, Ordering::Relaxed);
        self.ctx.alerts.notify_at(self.box_id, now);

        let interval = self.ctx.config.audit.unauthorized_save_interval();
        if let Some(last) = self.last_unauthorized_save {
            if now.saturating_duration_since(last) < interval {
                return;
            }
        }
        self.last_unauthorized_save = Some(now);

        let padding = self.ctx.config.audit.crop_padding;
        let at = Local::now();
        for (face, bbox) in strangers {
            let Some((x, y, w, h)) = bbox.padded_rect(padding, frame.width(), frame.height()) else {
                continue;
            };
            let crop = imageops::crop_imm(frame.image.as_ref(), x, y, w, h).to_image();
            match self.ctx.audit.record_unauthorized(self.box_id, *face, &crop, at) {
                Ok(path) => info!("📸 陌生人截图已保存: {}", path.display()),
                Err(e) => error!("❌ 陌生人截图保存失败: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::access_log::AccessLogThrottler;
    use crate::alerting::audit::{
        read_records, AccessRecord, AuditSink, FileAuditStore, UnauthorizedRecord,
    };
    use crate::alerting::throttle::{AlertThrottler, CooldownScope};
    use crate::alerting::transport::NotificationTransport;
    use crate::config::SentinelConfig;
    use crate::detection::adapter::{DetectionEmbeddingAdapter, FaceAnalyzer};
    use crate::detection::types::Embedding;
    use crate::error::{AnalyzerError, AuditError, TransportError};
    use crate::input::device::DefaultOpener;
    use crate::recognition::enrollment::{EnrollmentListener, EnrollmentRecord, MemoryEnrollments};
    use crate::recognition::store::EmbeddingStore;
    use crate::renderer::draw::Painter;
    use chrono::DateTime;
    use image::RgbImage;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 每个框返回同一特征; embedding 为 None 时模拟检测失败
    struct ScriptedAnalyzer {
        embedding: Mutex<Option<Vec<f32>>>,
        boxes: Vec<BBox>,
        calls: AtomicUsize,
    }

    impl FaceAnalyzer for ScriptedAnalyzer {
        fn name(&self) -> &str {
            "scripted"
        }

        fn analyze(&self, _image: &RgbImage) -> Result<Vec<(BBox, Embedding)>, AnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.embedding.lock().unwrap().clone() {
                Some(e) => Ok(self
                    .boxes
                    .iter()
                    .map(|b| (*b, Embedding::from_vec(e.clone())))
                    .collect()),
                None => Err(AnalyzerError::Failed("model crashed".into())),
            }
        }
    }

    #[derive(Default)]
    struct MemorySink {
        access: Mutex<Vec<AccessRecord>>,
        crops: Mutex<Vec<(u32, u32, u32)>>,
    }

    impl AuditSink for MemorySink {
        fn record_unauthorized(
            &self,
            box_id: u32,
            _face: usize,
            crop: &RgbImage,
            _at: DateTime<Local>,
        ) -> Result<PathBuf, AuditError> {
            self.crops
                .lock()
                .unwrap()
                .push((box_id, crop.width(), crop.height()));
            Ok(PathBuf::from("mem"))
        }

        fn record_access(&self, record: &AccessRecord) -> Result<(), AuditError> {
            self.access.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingTransport(AtomicUsize);

    impl NotificationTransport for CountingTransport {
        fn send(&self, _r: &str, _m: &str) -> Result<(), TransportError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        worker: RecognitionWorker,
        analyzer: Arc<ScriptedAnalyzer>,
        sink: Arc<MemorySink>,
        stats: Arc<BoxStats>,
    }

    const ENROLLED: [f32; 4] = [0.9, 0.1, 0.0, 0.2];

    fn harness(embedding: Option<Vec<f32>>) -> Harness {
        harness_with(embedding, vec![BBox::from_xywh(100.0, 100.0, 100.0, 120.0)], None)
    }

    /// `audit` 为 None 时截图写入内存 sink
    fn harness_with(
        embedding: Option<Vec<f32>>,
        boxes: Vec<BBox>,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Harness {
        let config = Arc::new(SentinelConfig::default());
        let store = Arc::new(EmbeddingStore::new(Duration::from_secs(300)));
        store
            .reload(&MemoryEnrollments::new(vec![EnrollmentRecord {
                id_number: "S001".into(),
                first_name: "Ana".into(),
                last_name: "Cruz".into(),
                front: Some(ENROLLED.to_vec()),
                ..Default::default()
            }]))
            .unwrap();

        let analyzer = Arc::new(ScriptedAnalyzer {
            embedding: Mutex::new(embedding),
            boxes,
            calls: AtomicUsize::new(0),
        });
        let sink = Arc::new(MemorySink::default());
        let audit: Arc<dyn AuditSink> = audit.unwrap_or_else(|| sink.clone() as Arc<dyn AuditSink>);
        let alerts = Arc::new(AlertThrottler::new(
            Duration::from_secs(900),
            CooldownScope::Global,
            vec!["09945349194".into()],
            "ISSC System",
            Arc::new(CountingTransport::default()),
        ));
        let (reload, _rx) = EnrollmentListener::channel();
        let ctx = Arc::new(PipelineContext {
            config: config.clone(),
            store,
            adapter: Arc::new(DetectionEmbeddingAdapter::new(
                analyzer.clone(),
                config.recognition.filter.clone(),
            )),
            alerts,
            access_log: Arc::new(AccessLogThrottler::new(Duration::from_secs(2), sink.clone())),
            audit,
            opener: Arc::new(DefaultOpener),
            painter: Painter::without_font(),
            reload,
        });
        let stats = Arc::new(BoxStats::default());
        Harness {
            worker: RecognitionWorker::new(1, ctx, stats.clone()),
            analyzer,
            sink,
            stats,
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(RgbImage::new(640, 480), seq)
    }

    #[test]
    fn test_authorized_face_logs_access_once() {
        let mut h = harness(Some(ENROLLED.to_vec()));
        let t0 = Instant::now();
        let out = h.worker.process(&frame(1), t0);
        assert_eq!(out.faces, 1);
        assert_eq!(h.worker.stage(), WorkerStage::Dispatched);
        h.worker.process(&frame(2), t0);
        h.worker.process(&frame(3), t0);

        let access = h.sink.access.lock().unwrap();
        assert_eq!(access.len(), 1);
        assert_eq!(access[0].id_number, "S001");
        assert!(h.sink.crops.lock().unwrap().is_empty());
    }

    #[test]
    fn test_frame_skip_reuses_overlay() {
        let mut h = harness(Some(ENROLLED.to_vec()));
        let t0 = Instant::now();
        for seq in 1..=4 {
            let out = h.worker.process(&frame(seq), t0);
            assert_eq!(out.faces, 1);
        }
        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.stats.frames_processed.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_stranger_alerts_and_saves_crop() {
        let mut h = harness(Some(vec![-0.2, 0.1, 0.9, -0.4]));
        let t0 = Instant::now();
        let out = h.worker.process(&frame(1), t0);
        assert_eq!(out.faces, 1);
        assert_eq!(*out.image.get_pixel(100, 100), crate::renderer::draw::UNAUTHORIZED);

        let crops = h.sink.crops.lock().unwrap().clone();
        assert_eq!(crops, vec![(1, 140, 160)]);

        // 2秒内不重复截图
        h.worker.process(&frame(2), t0);
        h.worker.process(&frame(3), t0 + Duration::from_millis(500));
        assert_eq!(h.sink.crops.lock().unwrap().len(), 1);
        h.worker.process(&frame(4), t0 + Duration::from_secs(3));
        h.worker.process(&frame(5), t0 + Duration::from_secs(3));
        assert_eq!(h.sink.crops.lock().unwrap().len(), 2);
        assert_eq!(h.stats.unauthorized_events.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_two_strangers_save_two_crops() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileAuditStore::new(dir.path(), 85));
        let mut h = harness_with(
            Some(vec![-0.2, 0.1, 0.9, -0.4]),
            vec![
                BBox::from_xywh(100.0, 100.0, 100.0, 120.0),
                BBox::from_xywh(350.0, 100.0, 100.0, 120.0),
            ],
            Some(store.clone() as Arc<dyn AuditSink>),
        );
        let out = h.worker.process(&frame(1), Instant::now());
        assert_eq!(out.faces, 2);

        let mut jpgs = Vec::new();
        for day in std::fs::read_dir(store.unauthorized_dir()).unwrap() {
            let day = day.unwrap().path();
            if day.is_dir() {
                for f in std::fs::read_dir(&day).unwrap() {
                    jpgs.push(f.unwrap().path());
                }
            }
        }
        assert_eq!(jpgs.len(), 2);
        assert_ne!(jpgs[0], jpgs[1]);

        let rows: Vec<UnauthorizedRecord> = read_records(&store.unauthorized_log()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].image_path, rows[1].image_path);
    }

    #[test]
    fn test_detection_failure_is_no_face() {
        let mut h = harness(None);
        let out = h.worker.process(&frame(1), Instant::now());
        assert_eq!(out.faces, 0);
        assert_eq!(h.worker.stage(), WorkerStage::Dispatched);
    }

    #[test]
    fn test_placeholder_passthrough() {
        let mut h = harness(Some(ENROLLED.to_vec()));
        let placeholder = Frame::placeholder(Arc::new(RgbImage::new(8, 8)), 9);
        let out = h.worker.process(&placeholder, Instant::now());
        assert!(out.placeholder);
        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_run_stops_on_request() {
        let h = harness(Some(ENROLLED.to_vec()));
        let raw = Arc::new(DropOldestQueue::new(3));
        let output = Arc::new(DropOldestQueue::new(2));
        let lifecycle = Arc::new(BoxLifecycle::new());
        raw.push(frame(1));
        let handle = {
            let (raw, output, lifecycle) = (raw.clone(), output.clone(), lifecycle.clone());
            std::thread::spawn(move || h.worker.run(raw, output, lifecycle))
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while output.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(output.try_pop().unwrap().seq, 1);
        lifecycle.request_stop();
        handle.join().unwrap();
    }
}
