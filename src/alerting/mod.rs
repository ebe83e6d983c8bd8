/// 告警与审计 (Alerting & Audit)
///
/// - AlertThrottler:     陌生人告警限流
/// - AccessLogThrottler: 出入记录去重
/// - Transport:          短信网关
/// - Audit:              截图与记录存储
pub mod access_log;
pub mod audit;
pub mod throttle;
pub mod transport;

pub use access_log::AccessLogThrottler;
pub use audit::{AccessRecord, AuditSink, FileAuditStore, UnauthorizedRecord};
pub use throttle::{AlertThrottler, CooldownScope};
pub use transport::{normalize_number, LogTransport, NotificationTransport, SmsTransport};
