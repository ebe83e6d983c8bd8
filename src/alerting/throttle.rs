//! 陌生人告警限流
//!
//! 冷却窗口内同一范围 (全局 / 每个接收人) 最多发送一次;
//! 发送在后台线程执行, 失败只记录日志。

use super::transport::NotificationTransport;
use crate::config::AlertConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CooldownScope {
    Global,
    PerRecipient,
}

#[derive(Default)]
struct AlertState {
    global_last: Option<Instant>,
    per_recipient: HashMap<String, Instant>,
}

pub struct AlertThrottler {
    cooldown: Duration,
    scope: CooldownScope,
    recipients: Vec<String>,
    site_name: String,
    transport: Arc<dyn NotificationTransport>,
    state: Mutex<AlertState>,
}

fn within(last: Option<Instant>, now: Instant, cooldown: Duration) -> bool {
    last.map(|at| now.saturating_duration_since(at) < cooldown)
        .unwrap_or(false)
}

impl AlertThrottler {
    pub fn new(
        cooldown: Duration,
        scope: CooldownScope,
        recipients: Vec<String>,
        site_name: impl Into<String>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self {
            cooldown,
            scope,
            recipients,
            site_name: site_name.into(),
            transport,
            state: Mutex::new(AlertState::default()),
        }
    }

    pub fn from_config(config: &AlertConfig, transport: Arc<dyn NotificationTransport>) -> Self {
        let scope = if config.per_recipient {
            CooldownScope::PerRecipient
        } else {
            CooldownScope::Global
        };
        Self::new(
            config.cooldown(),
            scope,
            config.recipients.clone(),
            config.site_name.clone(),
            transport,
        )
    }

    pub fn message(&self, box_id: u32) -> String {
        format!(
            "{}\nUnauthorized Person detected in Camera {}",
            self.site_name, box_id
        )
    }

    pub fn notify(&self, box_id: u32) -> usize {
        self.notify_at(box_id, Instant::now())
    }

    /// 返回本次实际派发的通知数 (冷却中为0)
    pub fn notify_at(&self, box_id: u32, now: Instant) -> usize {
        if self.recipients.is_empty() {
            debug!("未配置告警接收人, 跳过摄像头 {} 的告警", box_id);
            return 0;
        }

        let targets: Vec<String> = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match self.scope {
                CooldownScope::Global => {
                    if within(state.global_last, now, self.cooldown) {
                        return 0;
                    }
                    state.global_last = Some(now);
                    self.recipients.clone()
                }
                CooldownScope::PerRecipient => {
                    let due: Vec<String> = self
                        .recipients
                        .iter()
                        .filter(|r| !within(state.per_recipient.get(*r).copied(), now, self.cooldown))
                        .cloned()
                        .collect();
                    for r in &due {
                        state.per_recipient.insert(r.clone(), now);
                    }
                    due
                }
            }
        };

        if targets.is_empty() {
            return 0;
        }

        let message = self.message(box_id);
        info!("🚨 摄像头 {} 发现陌生人, 通知 {} 位接收人", box_id, targets.len());
        let count = targets.len();
        for recipient in targets {
            self.dispatch(recipient, message.clone());
        }
        count
    }

    fn dispatch(&self, recipient: String, message: String) {
        let transport = self.transport.clone();
        let spawned = std::thread::Builder::new()
            .name("alert-dispatch".to_string())
            .spawn(move || match transport.send(&recipient, &message) {
                Ok(()) => info!("📨 告警已发送: {}", recipient),
                Err(e) => error!("❌ 告警发送失败 {}: {}", recipient, e),
            });
        if let Err(e) = spawned {
            warn!("⚠️ 无法启动告警发送线程: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        sent: AtomicUsize,
        messages: Mutex<Vec<(String, String)>>,
    }

    impl NotificationTransport for CountingTransport {
        fn send(&self, recipient: &str, message: &str) -> Result<(), TransportError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            self.messages
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.to_string()));
            Ok(())
        }
    }

    struct FailingTransport;

    impl NotificationTransport for FailingTransport {
        fn send(&self, _recipient: &str, _message: &str) -> Result<(), TransportError> {
            Err(TransportError::Http("gateway down".into()))
        }
    }

    fn throttler(scope: CooldownScope, transport: Arc<dyn NotificationTransport>) -> AlertThrottler {
        AlertThrottler::new(
            Duration::from_secs(900),
            scope,
            vec!["09945349194".to_string()],
            "ISSC System",
            transport,
        )
    }

    fn wait_for(counter: &AtomicUsize, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < n && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_twice_within_cooldown_dispatches_once() {
        let transport = Arc::new(CountingTransport::default());
        let t = throttler(CooldownScope::Global, transport.clone());
        let t0 = Instant::now();
        assert_eq!(t.notify_at(2, t0), 1);
        assert_eq!(t.notify_at(2, t0 + Duration::from_secs(5)), 0);

        wait_for(&transport.sent, 1);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
        let messages = transport.messages.lock().unwrap();
        assert_eq!(
            messages[0].1,
            "ISSC System\nUnauthorized Person detected in Camera 2"
        );
    }

    #[test]
    fn test_after_cooldown_dispatches_again() {
        let transport = Arc::new(CountingTransport::default());
        let t = throttler(CooldownScope::Global, transport.clone());
        let t0 = Instant::now();
        assert_eq!(t.notify_at(1, t0), 1);
        assert_eq!(t.notify_at(1, t0 + Duration::from_secs(901)), 1);
        wait_for(&transport.sent, 2);
        assert_eq!(transport.sent.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_global_scope_spans_boxes() {
        let t = throttler(CooldownScope::Global, Arc::new(CountingTransport::default()));
        let t0 = Instant::now();
        assert_eq!(t.notify_at(1, t0), 1);
        assert_eq!(t.notify_at(3, t0 + Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_per_recipient_scope() {
        let t = AlertThrottler::new(
            Duration::from_secs(60),
            CooldownScope::PerRecipient,
            vec!["09170000001".into(), "09170000002".into()],
            "ISSC System",
            Arc::new(CountingTransport::default()),
        );
        let t0 = Instant::now();
        assert_eq!(t.notify_at(1, t0), 2);
        assert_eq!(t.notify_at(1, t0 + Duration::from_secs(30)), 0);
        assert_eq!(t.notify_at(1, t0 + Duration::from_secs(61)), 2);
    }

    #[test]
    fn test_transport_failure_is_swallowed() {
        let t = throttler(CooldownScope::Global, Arc::new(FailingTransport));
        let t0 = Instant::now();
        assert_eq!(t.notify_at(1, t0), 1);
        // 失败不重置冷却
        assert_eq!(t.notify_at(1, t0 + Duration::from_secs(1)), 0);
    }

    #[test]
    fn test_no_recipients() {
        let t = AlertThrottler::new(
            Duration::from_secs(60),
            CooldownScope::Global,
            Vec::new(),
            "ISSC System",
            Arc::new(CountingTransport::default()),
        );
        assert_eq!(t.notify(1), 0);
    }
}
