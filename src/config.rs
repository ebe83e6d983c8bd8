//! 门禁监控配置 - 通过JSON文件调整参数
//!
//! 所有时长字段以秒/毫秒为单位存储,读取时转换为 `Duration`。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// 单路摄像头参数 (CameraSource 与 RecognitionWorker 共用)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraProfile {
    // === 采集参数 ===
    pub width: u32,                    // 目标宽度
    pub height: u32,                   // 目标高度
    pub fps: u32,                      // 目标帧率 (回放/快照源的节拍)
    pub raw_queue_capacity: usize,     // 原始帧队列容量
    pub output_queue_capacity: usize,  // 标注帧队列容量

    // === 断线重连 ===
    pub max_failures: u32,             // 连续读帧失败上限
    pub reconnect_attempts: u32,       // 重连次数上限
    pub reconnect_backoff_ms: u64,     // 重连间隔 (逐次翻倍)
    pub placeholder_interval_ms: u64,  // 无信号占位帧刷新间隔

    // === 工作线程 ===
    pub poll_timeout_ms: u64,          // 队列读取超时
    pub idle_backoff_ms: u64,          // 空闲退避
}

impl Default for CameraProfile {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            raw_queue_capacity: 3,
            output_queue_capacity: 2,

            max_failures: 15,
            reconnect_attempts: 3,
            reconnect_backoff_ms: 1000,
            placeholder_interval_ms: 1000,

            poll_timeout_ms: 100,
            idle_backoff_ms: 10,
        }
    }
}

impl CameraProfile {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.fps.max(1) as u64)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn placeholder_interval(&self) -> Duration {
        Duration::from_millis(self.placeholder_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

/// 人脸框有效性过滤
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FaceFilter {
    pub min_side: f32,        // 最小边长(像素)
    pub min_area_ratio: f32,  // 占画面最小比例
    pub max_area_ratio: f32,  // 占画面最大比例
    pub min_aspect: f32,      // 宽高比下限
    pub max_aspect: f32,      // 宽高比上限
}

impl Default for FaceFilter {
    fn default() -> Self {
        Self {
            min_side: 60.0,
            min_area_ratio: 0.01,
            max_area_ratio: 0.5,
            min_aspect: 0.6,
            max_aspect: 1.6,
        }
    }
}

/// 识别参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub frame_skip: u32,          // 每N帧执行一次完整识别
    pub distance_threshold: f32,  // 余弦距离阈值 (小于该值视为匹配)
    pub detector_backend: String, // 检测/特征后端名称
    pub filter: FaceFilter,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            frame_skip: 2,
            distance_threshold: 0.45,
            detector_backend: "external".to_string(),
            filter: FaceFilter::default(),
        }
    }
}

/// 人脸库参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub enrollment_path: PathBuf, // 注册数据文件 (JSON)
    pub cache_ttl_secs: u64,      // 快照有效期
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enrollment_path: PathBuf::from("data/enrollments.json"),
            cache_ttl_secs: 300,
        }
    }
}

impl StoreConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// 短信网关参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmsConfig {
    pub api_base: String,
    pub api_token: String,
    pub sender_id: String,
    pub timeout_secs: u64,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            api_base: "https://dashboard.philsms.com/api/v3".to_string(),
            api_token: String::new(),
            sender_id: "PhilSMS".to_string(),
            timeout_secs: 15,
        }
    }
}

/// 告警参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub cooldown_secs: u64,      // 告警冷却时间
    pub per_recipient: bool,     // 按接收人分别冷却
    pub recipients: Vec<String>, // 接收人号码
    pub site_name: String,       // 短信抬头
    pub sms: SmsConfig,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 15 * 60,
            per_recipient: false,
            recipients: Vec::new(),
            site_name: "ISSC System".to_string(),
            sms: SmsConfig::default(),
        }
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// 审计存储参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditConfig {
    pub root: PathBuf,                    // 审计根目录
    pub unauthorized_save_interval_ms: u64, // 同一路陌生人截图最小间隔
    pub crop_padding: u32,                // 截图外扩像素
    pub jpeg_quality: u8,                 // 截图/推流JPEG质量
    pub log_suppression_secs: f64,        // 同一人出入记录去重窗口
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("media"),
            unauthorized_save_interval_ms: 2000,
            crop_padding: 20,
            jpeg_quality: 85,
            log_suppression_secs: 2.0,
        }
    }
}

impl AuditConfig {
    pub fn unauthorized_save_interval(&self) -> Duration {
        Duration::from_millis(self.unauthorized_save_interval_ms)
    }

    pub fn log_suppression(&self) -> Duration {
        Duration::from_secs_f64(self.log_suppression_secs.max(0.0))
    }
}

/// 叠加层参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OverlayConfig {
    pub history_len: usize,          // 平滑窗口帧数
    pub clear_after_ms: u64,         // 无检测多久后清除
    pub font_path: Option<PathBuf>,  // TTF字体 (为空时不绘制文字)
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            history_len: 3,
            clear_after_ms: 1000,
            font_path: None,
        }
    }
}

impl OverlayConfig {
    pub fn clear_after(&self) -> Duration {
        Duration::from_millis(self.clear_after_ms)
    }
}

/// 启动时自动打开的摄像头
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoxBinding {
    pub box_id: u32,
    pub selector: String,
}

/// 系统总配置
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SentinelConfig {
    pub camera: CameraProfile,
    pub recognition: RecognitionConfig,
    pub store: StoreConfig,
    pub alert: AlertConfig,
    pub audit: AuditConfig,
    pub overlay: OverlayConfig,
    pub boxes: Vec<BoxBinding>,
}

impl SentinelConfig {
    /// 从JSON文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("❌ 创建配置目录失败: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    error!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => error!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前门禁配置:");
        info!(
            "  采集: {}x{} @{}fps, 队列 {}/{}",
            self.camera.width,
            self.camera.height,
            self.camera.fps,
            self.camera.raw_queue_capacity,
            self.camera.output_queue_capacity
        );
        info!(
            "  断线: 连续失败 {} 次重连, 最多 {} 次",
            self.camera.max_failures, self.camera.reconnect_attempts
        );
        info!(
            "  识别: 每 {} 帧, 距离阈值 {:.2}, 后端 {}",
            self.recognition.frame_skip,
            self.recognition.distance_threshold,
            self.recognition.detector_backend
        );
        info!(
            "  人脸库: {} (TTL {}s)",
            self.store.enrollment_path.display(),
            self.store.cache_ttl_secs
        );
        info!(
            "  告警: 冷却 {}s, 接收人 {} 个",
            self.alert.cooldown_secs,
            self.alert.recipients.len()
        );
        info!("  审计目录: {}", self.audit.root.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SentinelConfig::default();
        assert_eq!(config.recognition.frame_skip, 2);
        assert!((config.recognition.distance_threshold - 0.45).abs() < 1e-6);
        assert_eq!(config.camera.raw_queue_capacity, 3);
        assert_eq!(config.camera.output_queue_capacity, 2);
        assert_eq!(config.alert.cooldown(), Duration::from_secs(900));
        assert_eq!(config.store.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.audit.log_suppression(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "recognition": { "distance_threshold": 0.3 }, "boxes": [ { "box_id": 1, "selector": "0" } ] }"#;
        let config: SentinelConfig = serde_json::from_str(json).unwrap();
        assert!((config.recognition.distance_threshold - 0.3).abs() < 1e-6);
        assert_eq!(config.recognition.frame_skip, 2);
        assert_eq!(config.camera, CameraProfile::default());
        assert_eq!(config.boxes.len(), 1);
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("sentinel.json");
        let config = SentinelConfig::load(&path);
        assert_eq!(config, SentinelConfig::default());
        assert!(path.exists());

        let reloaded = SentinelConfig::load(&path);
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(SentinelConfig::load(&path), SentinelConfig::default());
    }
}
