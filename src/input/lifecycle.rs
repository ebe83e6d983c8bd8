//! 单路摄像头生命周期: Active → Stopping → Stopped
//!
//! 采集线程与识别线程每轮循环检查一次, 停止请求在一轮内生效。

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

const ACTIVE: u8 = 0;
const STOPPING: u8 = 1;
const STOPPED: u8 = 2;

/// 可中断睡眠的切片长度
const SLEEP_SLICE: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    Stopping,
    Stopped,
}

#[derive(Debug)]
pub struct BoxLifecycle {
    state: AtomicU8,
}

impl Default for BoxLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl BoxLifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ACTIVE),
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => LifecycleState::Active,
            STOPPING => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    /// 返回 true 表示本次调用完成了 Active → Stopping
    pub fn request_stop(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn mark_stopped(&self) {
        self.state.store(STOPPED, Ordering::Release);
    }

    /// 睡眠 `duration`, 期间收到停止请求则提前返回 false
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if !self.is_active() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_transitions() {
        let lc = BoxLifecycle::new();
        assert_eq!(lc.state(), LifecycleState::Active);
        assert!(lc.request_stop());
        assert!(!lc.request_stop());
        assert_eq!(lc.state(), LifecycleState::Stopping);
        lc.mark_stopped();
        assert_eq!(lc.state(), LifecycleState::Stopped);
        assert!(!lc.is_active());
    }

    #[test]
    fn test_sleep_interrupted_by_stop() {
        let lc = Arc::new(BoxLifecycle::new());
        let stopper = {
            let lc = lc.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                lc.request_stop();
            })
        };
        let start = Instant::now();
        assert!(!lc.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(2));
        stopper.join().unwrap();
    }

    #[test]
    fn test_sleep_completes() {
        let lc = BoxLifecycle::new();
        assert!(lc.sleep(Duration::from_millis(5)));
    }
}
