//! 稳定叠加层 - 按人脸序号对最近几帧的框坐标取平均,抑制抖动与闪烁

use crate::detection::types::{BBox, MatchResult};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 单张人脸的叠加信息
#[derive(Clone, Debug, PartialEq)]
pub struct FaceOverlay {
    pub bbox: BBox,
    pub result: MatchResult,
}

/// 每路摄像头一个实例
pub struct StableOverlayRenderer {
    history: VecDeque<Vec<FaceOverlay>>,
    capacity: usize,
    clear_after: Duration,
    last_detection: Option<Instant>,
    last_overlay: Vec<FaceOverlay>,
}

impl StableOverlayRenderer {
    pub fn new(capacity: usize, clear_after: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            clear_after,
            last_detection: None,
            last_overlay: Vec::new(),
        }
    }

    /// 写入本帧识别结果, 返回平滑后的叠加层
    pub fn update(&mut self, faces: Vec<FaceOverlay>, now: Instant) -> Vec<FaceOverlay> {
        if faces.is_empty() {
            return self.current(now);
        }

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(faces);
        self.last_detection = Some(now);
        self.last_overlay = self.smoothed();
        self.last_overlay.clone()
    }

    /// 无新结果时的叠加层: 最近一次结果, 超时后清空
    pub fn current(&mut self, now: Instant) -> Vec<FaceOverlay> {
        match self.last_detection {
            Some(at) if now.saturating_duration_since(at) <= self.clear_after => {
                self.last_overlay.clone()
            }
            Some(_) => {
                self.reset();
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_detection = None;
        self.last_overlay.clear();
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// 以最新一帧为准, 每个序号的坐标取历史窗口内同序号框的均值
    fn smoothed(&self) -> Vec<FaceOverlay> {
        let Some(latest) = self.history.back() else {
            return Vec::new();
        };
        latest
            .iter()
            .enumerate()
            .map(|(idx, face)| {
                let (mut x1, mut y1, mut x2, mut y2) = (0.0, 0.0, 0.0, 0.0);
                let mut n = 0.0;
                for frame in &self.history {
                    if let Some(past) = frame.get(idx) {
                        x1 += past.bbox.x1;
                        y1 += past.bbox.y1;
                        x2 += past.bbox.x2;
                        y2 += past.bbox.y2;
                        n += 1.0;
                    }
                }
                FaceOverlay {
                    bbox: BBox::new(x1 / n, y1 / n, x2 / n, y2 / n, face.bbox.confidence),
                    result: face.result.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32) -> FaceOverlay {
        FaceOverlay {
            bbox: BBox::new(x, 0.0, x + 100.0, 100.0, 0.9),
            result: MatchResult::unknown(0.9),
        }
    }

    #[test]
    fn test_average_over_window() {
        let mut r = StableOverlayRenderer::new(3, Duration::from_secs(1));
        let t = Instant::now();
        r.update(vec![face(0.0)], t);
        r.update(vec![face(30.0)], t);
        let out = r.update(vec![face(60.0)], t);
        assert_eq!(out.len(), 1);
        assert!((out[0].bbox.x1 - 30.0).abs() < 1e-4);

        // 窗口只保留3帧
        let out = r.update(vec![face(90.0)], t);
        assert_eq!(r.history_len(), 3);
        assert!((out[0].bbox.x1 - 60.0).abs() < 1e-4);
    }

    #[test]
    fn test_index_without_history_uses_current() {
        let mut r = StableOverlayRenderer::new(3, Duration::from_secs(1));
        let t = Instant::now();
        r.update(vec![face(0.0)], t);
        let out = r.update(vec![face(10.0), face(300.0)], t);
        assert_eq!(out.len(), 2);
        assert!((out[0].bbox.x1 - 5.0).abs() < 1e-4);
        assert!((out[1].bbox.x1 - 300.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_frame_reuses_last_then_clears() {
        let mut r = StableOverlayRenderer::new(3, Duration::from_secs(1));
        let t = Instant::now();
        r.update(vec![face(0.0)], t);
        let held = r.update(Vec::new(), t + Duration::from_millis(500));
        assert_eq!(held.len(), 1);

        let cleared = r.update(Vec::new(), t + Duration::from_millis(1500));
        assert!(cleared.is_empty());
        assert_eq!(r.history_len(), 0);
    }

    #[test]
    fn test_label_follows_latest_result() {
        let mut r = StableOverlayRenderer::new(3, Duration::from_secs(1));
        let t = Instant::now();
        r.update(vec![face(0.0)], t);
        let mut known = face(0.0);
        known.result = MatchResult {
            identity: None,
            distance: 0.1,
            authorized: true,
        };
        let out = r.update(vec![known], t);
        assert!(out[0].result.authorized);
    }
}
