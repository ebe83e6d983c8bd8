/// 门禁识别流水线 (Recognition Pipeline)
///
/// 每路摄像头两个独立线程, 通过有界丢旧队列通信:
/// - 采集线程: CameraSource 读帧 → 原始帧队列
/// - 识别线程: RecognitionWorker 检测+匹配+告警+叠加 → 标注帧队列
///
/// 跨摄像头共享的只有人脸库快照 (原子替换)。
use crate::alerting::access_log::AccessLogThrottler;
use crate::alerting::audit::{AuditSink, FileAuditStore};
use crate::alerting::throttle::AlertThrottler;
use crate::alerting::transport::{LogTransport, NotificationTransport, SmsTransport};
use crate::config::SentinelConfig;
use crate::detection::adapter::{analyzer_from_backend, DetectionEmbeddingAdapter};
use crate::input::device::{DefaultOpener, DeviceOpener};
use crate::input::dispatcher::FrameDispatcher;
use crate::recognition::enrollment::{
    EnrollmentListener, EnrollmentSource, JsonEnrollmentFile, ReloadTrigger,
};
use crate::recognition::store::EmbeddingStore;
use crate::renderer::draw::Painter;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, warn};

// ========== 共享依赖 ==========

/// 进程启动时构建一次, 以句柄形式注入各线程
pub struct PipelineContext {
    pub config: Arc<SentinelConfig>,
    pub store: Arc<EmbeddingStore>,
    pub adapter: Arc<DetectionEmbeddingAdapter>,
    pub alerts: Arc<AlertThrottler>,
    pub access_log: Arc<AccessLogThrottler>,
    pub audit: Arc<dyn AuditSink>,
    pub opener: Arc<dyn DeviceOpener>,
    pub painter: Painter,
    pub reload: ReloadTrigger,
}

impl PipelineContext {
    /// 按配置构建全部组件
    pub fn from_config(
        config: Arc<SentinelConfig>,
        store: Arc<EmbeddingStore>,
        reload: ReloadTrigger,
    ) -> Result<Self> {
        let analyzer = analyzer_from_backend(&config.recognition.detector_backend)
            .context("无法创建人脸分析后端")?;
        info!("🧠 人脸分析后端: {}", analyzer.name());
        let adapter = Arc::new(DetectionEmbeddingAdapter::new(
            analyzer,
            config.recognition.filter.clone(),
        ));

        let transport: Arc<dyn NotificationTransport> = match SmsTransport::new(&config.alert.sms) {
            Ok(sms) => {
                info!("📱 短信网关已配置");
                Arc::new(sms)
            }
            Err(e) => {
                warn!("⚠️ 短信网关不可用 ({}), 告警仅写日志", e);
                Arc::new(LogTransport)
            }
        };
        let alerts = Arc::new(AlertThrottler::from_config(&config.alert, transport));

        let audit: Arc<dyn AuditSink> = Arc::new(FileAuditStore::new(
            &config.audit.root,
            config.audit.jpeg_quality,
        ));
        let access_log = Arc::new(AccessLogThrottler::new(
            config.audit.log_suppression(),
            audit.clone(),
        ));

        let painter = Painter::load(config.overlay.font_path.as_deref());

        Ok(Self {
            config,
            store,
            adapter,
            alerts,
            access_log,
            audit,
            opener: Arc::new(DefaultOpener),
            painter,
            reload,
        })
    }
}

// ========== 每路统计 ==========

#[derive(Debug, Default)]
pub struct BoxStats {
    pub frames_processed: AtomicU64,
    pub faces_seen: AtomicU64,
    pub unauthorized_events: AtomicU64,
    fps_centi: AtomicU64,
}

impl BoxStats {
    pub fn set_fps(&self, fps: f64) {
        self.fps_centi
            .store((fps.max(0.0) * 100.0) as u64, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        self.fps_centi.load(Ordering::Relaxed) as f64 / 100.0
    }
}

// ========== 运行时 ==========

/// 完整运行时: 人脸库 + 注册监听 + 调度器
pub struct Sentinel {
    pub context: Arc<PipelineContext>,
    pub dispatcher: FrameDispatcher,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Sentinel {
    pub fn start(config: SentinelConfig) -> Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(EmbeddingStore::new(config.store.cache_ttl()));
        let source: Arc<dyn EnrollmentSource> =
            Arc::new(JsonEnrollmentFile::new(&config.store.enrollment_path));

        match store.reload(source.as_ref()) {
            Ok(n) => info!("✅ 人脸库加载成功: {} 人", n),
            Err(e) => warn!("⚠️ 人脸库初始加载失败, 以空库启动: {}", e),
        }

        let (reload, rx) = EnrollmentListener::channel();
        let listener = EnrollmentListener::spawn(store.clone(), source, rx)
            .context("无法启动注册事件监听线程")?;

        let context = Arc::new(PipelineContext::from_config(config, store, reload)?);
        let dispatcher = FrameDispatcher::new(context.clone());
        Ok(Self {
            context,
            dispatcher,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// 注册完成事件 → 重新加载人脸库
    pub fn enrollment_completed(&self, identity: &str) -> bool {
        self.context.reload.enrollment_completed(identity)
    }

    /// 停止全部摄像头与注册监听; 重复调用无副作用
    pub fn shutdown(&self) {
        self.dispatcher.stop_all();
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = listener {
            self.context.reload.shutdown();
            let _ = handle.join();
            info!("👋 系统已关闭");
        }
    }
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_roundtrip_precision() {
        let stats = BoxStats::default();
        stats.set_fps(12.345);
        assert!((stats.fps() - 12.34).abs() < 0.011);
    }

    #[test]
    fn test_context_from_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SentinelConfig::default();
        config.audit.root = dir.path().join("media");
        let (reload, _rx) = EnrollmentListener::channel();
        let ctx = PipelineContext::from_config(
            Arc::new(config),
            Arc::new(EmbeddingStore::new(std::time::Duration::from_secs(300))),
            reload,
        )
        .unwrap();
        assert_eq!(ctx.adapter.backend(), "none");
    }

    #[test]
    fn test_unknown_backend_fails() {
        let mut config = SentinelConfig::default();
        config.recognition.detector_backend = "tensor-magic".into();
        let (reload, _rx) = EnrollmentListener::channel();
        let result = PipelineContext::from_config(
            Arc::new(config),
            Arc::new(EmbeddingStore::new(std::time::Duration::from_secs(300))),
            reload,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sentinel_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SentinelConfig::default();
        config.audit.root = dir.path().join("media");
        config.store.enrollment_path = dir.path().join("missing.json");
        let sentinel = Sentinel::start(config).unwrap();
        assert!(sentinel.context.store.is_empty());
        sentinel.shutdown();
        sentinel.shutdown();
    }
}
