//! 人脸注册数据源 (只读) 与注册完成事件监听
//!
//! 注册记录格式 (JSON 数组):
//! `{ "id_number": "S001", "first_name": "..", "middle_name": "..", "last_name": "..",
//!    "status": "allowed", "front": [..], "left": [..], "right": [..] }`

use super::store::EmbeddingStore;
use crate::error::EnrollmentError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// 单个注册人员
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EnrollmentRecord {
    pub id_number: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub front: Option<Vec<f32>>,
    #[serde(default)]
    pub left: Option<Vec<f32>>,
    #[serde(default)]
    pub right: Option<Vec<f32>>,
}

impl EnrollmentRecord {
    pub fn display_name(&self) -> String {
        let mut parts = vec![self.first_name.trim()];
        if let Some(middle) = self.middle_name.as_deref().map(str::trim) {
            if !middle.is_empty() {
                parts.push(middle);
            }
        }
        parts.push(self.last_name.trim());
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }

    /// 未设置状态视为允许通行
    pub fn is_allowed(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("allowed"))
            .unwrap_or(true)
    }

    /// 命名特征槽位 (front/left/right), 顺序固定
    pub fn slots(&self) -> [(&'static str, Option<&[f32]>); 3] {
        [
            ("front", self.front.as_deref()),
            ("left", self.left.as_deref()),
            ("right", self.right.as_deref()),
        ]
    }
}

/// 注册数据来源
pub trait EnrollmentSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<EnrollmentRecord>, EnrollmentError>;
}

/// JSON 文件注册库
pub struct JsonEnrollmentFile {
    path: PathBuf,
}

impl JsonEnrollmentFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EnrollmentSource for JsonEnrollmentFile {
    fn fetch(&self) -> Result<Vec<EnrollmentRecord>, EnrollmentError> {
        let json = std::fs::read_to_string(&self.path).map_err(|source| EnrollmentError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// 内存注册库 (测试与嵌入式调用)
#[derive(Default)]
pub struct MemoryEnrollments {
    records: RwLock<Vec<EnrollmentRecord>>,
}

impl MemoryEnrollments {
    pub fn new(records: Vec<EnrollmentRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn replace(&self, records: Vec<EnrollmentRecord>) {
        let mut guard = self.records.write().unwrap_or_else(|e| e.into_inner());
        *guard = records;
    }

    pub fn upsert(&self, record: EnrollmentRecord) {
        let mut guard = self.records.write().unwrap_or_else(|e| e.into_inner());
        match guard.iter_mut().find(|r| r.id_number == record.id_number) {
            Some(existing) => *existing = record,
            None => guard.push(record),
        }
    }
}

impl EnrollmentSource for MemoryEnrollments {
    fn fetch(&self) -> Result<Vec<EnrollmentRecord>, EnrollmentError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

// ========== 注册事件 ==========

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnrollmentEvent {
    /// 外部注册流程完成
    Completed { identity: String },
    /// 快照过期刷新
    Refresh,
    Shutdown,
}

/// 事件发送端; 队列容量为1, 已有待处理刷新时合并
#[derive(Clone)]
pub struct ReloadTrigger {
    tx: Sender<EnrollmentEvent>,
}

impl ReloadTrigger {
    /// 非阻塞发送; 返回 false 表示已有待处理事件或监听已退出
    pub fn send(&self, event: EnrollmentEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn enrollment_completed(&self, identity: &str) -> bool {
        self.send(EnrollmentEvent::Completed {
            identity: identity.to_string(),
        })
    }

    pub fn shutdown(&self) {
        // 关闭事件必须送达, 使用阻塞发送
        let _ = self
            .tx
            .send_timeout(EnrollmentEvent::Shutdown, Duration::from_secs(1));
    }
}

/// 注册事件监听线程: 每个事件触发一次 `reload()`
pub struct EnrollmentListener;

impl EnrollmentListener {
    pub fn channel() -> (ReloadTrigger, Receiver<EnrollmentEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (ReloadTrigger { tx }, rx)
    }

    pub fn spawn(
        store: Arc<EmbeddingStore>,
        source: Arc<dyn EnrollmentSource>,
        rx: Receiver<EnrollmentEvent>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("enrollment-listener".to_string())
            .spawn(move || Self::run(&store, source.as_ref(), &rx))
    }

    fn run(store: &EmbeddingStore, source: &dyn EnrollmentSource, rx: &Receiver<EnrollmentEvent>) {
        info!("👂 注册事件监听启动");
        loop {
            match rx.recv_timeout(Duration::from_millis(500)) {
                Ok(EnrollmentEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(event) => {
                    if let EnrollmentEvent::Completed { identity } = &event {
                        info!("🆕 注册完成: {}, 重新加载人脸库", identity);
                    }
                    match store.reload(source) {
                        Ok(n) => info!("✅ 人脸库已加载 {} 人", n),
                        Err(e) => error!("❌ 人脸库加载失败, 保留旧快照: {}", e),
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if store.is_stale() {
                        warn!("⏰ 人脸库快照过期, 自动刷新");
                        if let Err(e) = store.reload(source) {
                            error!("❌ 人脸库刷新失败, 保留旧快照: {}", e);
                        }
                    }
                }
            }
        }
        info!("👂 注册事件监听结束");
    }
}
