/// 人脸检测数据结构定义
/// Data structures shared by detection, matching and rendering
use ndarray::Array1;

// ========== 检测框 ==========

/// 检测框 (Detection bounding box), 像素坐标
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(x, y, x + w, y + h, 1.0)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let l = self.x1.max(other.x1);
        let r = self.x2.min(other.x2);
        let t = self.y1.max(other.y1);
        let b = self.y2.min(other.y2);
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// 外扩 `pad` 像素并裁剪到画面内, 返回 (x, y, w, h)
    pub fn padded_rect(&self, pad: u32, frame_w: u32, frame_h: u32) -> Option<(u32, u32, u32, u32)> {
        let pad = pad as f32;
        let x1 = (self.x1 - pad).max(0.0).floor() as u32;
        let y1 = (self.y1 - pad).max(0.0).floor() as u32;
        let x2 = ((self.x2 + pad).min(frame_w as f32)).ceil() as u32;
        let y2 = ((self.y2 + pad).min(frame_h as f32)).ceil() as u32;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

// ========== 特征向量 ==========

/// 原始人脸特征向量 (未归一化)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Embedding {
    data: Array1<f32>,
}

impl Embedding {
    pub fn new(data: Array1<f32>) -> Self {
        Self { data }
    }

    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            data: Array1::from(values),
        }
    }

    pub fn data(&self) -> &Array1<f32> {
        &self.data
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }

    pub fn l2_norm(&self) -> f32 {
        self.data.dot(&self.data).sqrt()
    }

    /// L2归一化; 零向量或含NaN时返回 None (无法参与匹配)
    pub fn normalize(&self) -> Option<UnitEmbedding> {
        let norm = self.l2_norm();
        if !norm.is_finite() || norm <= f32::EPSILON {
            return None;
        }
        Some(UnitEmbedding {
            data: &self.data / norm,
        })
    }
}

/// 单位长度特征向量, 余弦距离 = 1 - 点积
#[derive(Debug, Clone, PartialEq)]
pub struct UnitEmbedding {
    data: Array1<f32>,
}

impl UnitEmbedding {
    pub fn data(&self) -> &Array1<f32> {
        &self.data
    }

    pub fn dim(&self) -> usize {
        self.data.len()
    }

    pub fn cosine_distance(&self, other: &UnitEmbedding) -> f32 {
        1.0 - self.data.dot(&other.data)
    }
}

// ========== 检测与匹配结果 ==========

/// 单帧中的一张人脸 (框 + 特征)
#[derive(Clone, Debug)]
pub struct DetectionResult {
    pub bbox: BBox,
    pub embedding: Embedding,
    pub seq: u64, // 帧序号
}

/// 匹配到的人员
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityMatch {
    pub id: String,
    pub display_name: String,
}

/// 匹配结果
#[derive(Clone, Debug, PartialEq)]
pub struct MatchResult {
    pub identity: Option<IdentityMatch>,
    pub distance: f32,
    pub authorized: bool,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self {
            identity: None,
            distance,
            authorized: false,
        }
    }

    /// 显示用置信度 (1 - 距离), 限制在 [0, 1]
    pub fn confidence(&self) -> f32 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}
