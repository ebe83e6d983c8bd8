// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod alerting; // 告警与审计
pub mod config; // 配置参数
pub mod detection; // 人脸检测接入
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod pipeline; // 流水线装配
pub mod recognition; // 人脸识别
pub mod renderer; // 叠加层与推流

pub use crate::config::{CameraProfile, SentinelConfig};
pub use crate::error::{AnalyzerError, AuditError, CaptureError, EnrollmentError, TransportError};
pub use crate::input::FrameDispatcher;
pub use crate::pipeline::{PipelineContext, Sentinel};
pub use crate::recognition::EmbeddingStore;

/// 本地时间字符串, 各字段以 `delimiter` 分隔 (用于文件名)
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_time_string_fields() {
        let s = gen_time_string("-");
        assert_eq!(s.split('-').count(), 7);
        assert!(s.starts_with(&chrono::Local::now().format("%Y").to_string()));
    }
}
