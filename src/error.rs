//! 错误类型定义
//! Typed errors for the capture, enrollment, notification and audit layers

use std::path::PathBuf;

/// 采集错误 (摄像头打开/读取/启停)
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no capture device for selector `{0}`")]
    NoDevice(String),

    #[error("device `{selector}` opened but returned no frame: {reason}")]
    ReadFailure { selector: String, reason: String },

    #[error("camera box {0} is already running")]
    BoxBusy(u32),

    #[error("camera box {0} is not running")]
    UnknownBox(u32),

    #[error("failed to spawn thread for box {box_id}: {source}")]
    Spawn {
        box_id: u32,
        #[source]
        source: std::io::Error,
    },
}

/// 人脸库错误
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("enrollment store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid enrollment data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("identity {identity} slot `{slot}` has dimension {got}, store uses {expected}")]
    Dimension {
        identity: String,
        slot: String,
        expected: usize,
        got: usize,
    },
}

/// 通知发送错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("notification transport is not configured")]
    NotConfigured,

    #[error("invalid recipient `{0}`")]
    InvalidRecipient(String),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("gateway rejected message: status {status}, body {body}")]
    Rejected { status: u16, body: String },
}

/// 审计存储错误
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image encode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("metadata encode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// 人脸分析错误 (检测/特征提取)
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("detector backend `{0}` is not available")]
    Backend(String),

    #[error("analysis failed: {0}")]
    Failed(String),
}
