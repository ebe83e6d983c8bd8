//! 出入记录去重: 同一 (摄像头, 人员) 在抑制窗口内只写一行

use super::audit::{AccessRecord, AuditSink};
use crate::detection::types::IdentityMatch;
use chrono::Local;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// 记录表超过该规模时清理过期项
const PRUNE_THRESHOLD: usize = 1024;

pub struct AccessLogThrottler {
    window: Duration,
    last: Mutex<HashMap<(u32, String), Instant>>,
    sink: Arc<dyn AuditSink>,
}

impl AccessLogThrottler {
    pub fn new(window: Duration, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
            sink,
        }
    }

    pub fn log(&self, box_id: u32, identity: &IdentityMatch) -> bool {
        self.log_at(box_id, identity, Instant::now())
    }

    /// 返回是否写入了新记录
    pub fn log_at(&self, box_id: u32, identity: &IdentityMatch, now: Instant) -> bool {
        {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            let key = (box_id, identity.id.clone());
            if let Some(at) = last.get(&key) {
                if now.saturating_duration_since(*at) < self.window {
                    return false;
                }
            }
            last.insert(key, now);
            if last.len() > PRUNE_THRESHOLD {
                let window = self.window;
                last.retain(|_, at| now.saturating_duration_since(*at) < window);
            }
        }

        let record = AccessRecord::new(&identity.id, &identity.display_name, box_id, Local::now());
        match self.sink.record_access(&record) {
            Ok(()) => {
                debug!("📝 出入记录: {} @ 摄像头 {}", identity.id, box_id);
                true
            }
            Err(e) => {
                error!("❌ 出入记录写入失败: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuditError;
    use chrono::DateTime;
    use image::RgbImage;
    use std::path::PathBuf;

    #[derive(Default)]
    struct MemorySink {
        rows: Mutex<Vec<AccessRecord>>,
    }

    impl AuditSink for MemorySink {
        fn record_unauthorized(
            &self,
            _box_id: u32,
            _face: usize,
            _crop: &RgbImage,
            _at: DateTime<Local>,
        ) -> Result<PathBuf, AuditError> {
            Ok(PathBuf::new())
        }

        fn record_access(&self, record: &AccessRecord) -> Result<(), AuditError> {
            self.rows.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn who(id: &str) -> IdentityMatch {
        IdentityMatch {
            id: id.to_string(),
            display_name: format!("Person {}", id),
        }
    }

    #[test]
    fn test_same_pair_within_window_logs_once() {
        let sink = Arc::new(MemorySink::default());
        let t = AccessLogThrottler::new(Duration::from_secs(2), sink.clone());
        let t0 = Instant::now();
        assert!(t.log_at(1, &who("X"), t0));
        assert!(!t.log_at(1, &who("X"), t0 + Duration::from_millis(1500)));
        assert_eq!(sink.rows.lock().unwrap().len(), 1);
        assert!(t.log_at(1, &who("X"), t0 + Duration::from_millis(2500)));
        assert_eq!(sink.rows.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_pairs_are_independent() {
        let sink = Arc::new(MemorySink::default());
        let t = AccessLogThrottler::new(Duration::from_secs(2), sink.clone());
        let t0 = Instant::now();
        assert!(t.log_at(1, &who("X"), t0));
        assert!(t.log_at(2, &who("X"), t0));
        assert!(t.log_at(1, &who("Y"), t0));
        let rows = sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].camera_box_id, 2);
    }
}
