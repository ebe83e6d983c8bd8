//! 人脸检测/特征提取适配层
//!
//! 模型本身不在本crate内: 通过 `FaceAnalyzer` 接入外部能力,
//! 适配层负责有效性过滤与帧序号绑定。

use super::types::{BBox, DetectionResult, Embedding};
use crate::config::FaceFilter;
use crate::error::AnalyzerError;
use crate::input::device::Frame;
use crate::renderer::stream::encode_jpeg;
use image::RgbImage;
use serde::Deserialize;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

/// 检测响应体上限
const MAX_RESPONSE_BYTES: u64 = 8 * 1024 * 1024;

/// 外部人脸分析能力: 一帧 → 若干 (框, 特征)
pub trait FaceAnalyzer: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(&self, image: &RgbImage) -> Result<Vec<(BBox, Embedding)>, AnalyzerError>;
}

/// 空后端: 永远没有人脸
#[derive(Default)]
pub struct NullAnalyzer;

impl FaceAnalyzer for NullAnalyzer {
    fn name(&self) -> &str {
        "none"
    }

    fn analyze(&self, _image: &RgbImage) -> Result<Vec<(BBox, Embedding)>, AnalyzerError> {
        Ok(Vec::new())
    }
}

// ========== HTTP 推理服务 ==========

#[derive(Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    faces: Vec<AnalyzedFace>,
}

#[derive(Deserialize)]
struct AnalyzedFace {
    #[serde(rename = "box")]
    bbox: [f32; 4], // x1, y1, x2, y2
    #[serde(default = "default_confidence")]
    confidence: f32,
    embedding: Vec<f32>,
}

fn default_confidence() -> f32 {
    1.0
}

/// POST JPEG 到推理服务, 返回 `{"faces": [{"box": [x1,y1,x2,y2], "confidence": c, "embedding": [...]}]}`
pub struct HttpAnalyzer {
    url: String,
    agent: ureq::Agent,
}

impl HttpAnalyzer {
    pub fn new(url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        Self {
            url: url.to_string(),
            agent,
        }
    }

    fn parse(body: &str) -> Result<Vec<(BBox, Embedding)>, AnalyzerError> {
        let response: AnalyzeResponse =
            serde_json::from_str(body).map_err(|e| AnalyzerError::Failed(e.to_string()))?;
        Ok(response
            .faces
            .into_iter()
            .map(|f| {
                let [x1, y1, x2, y2] = f.bbox;
                (
                    BBox::new(x1, y1, x2, y2, f.confidence),
                    Embedding::from_vec(f.embedding),
                )
            })
            .collect())
    }
}

impl FaceAnalyzer for HttpAnalyzer {
    fn name(&self) -> &str {
        &self.url
    }

    fn analyze(&self, image: &RgbImage) -> Result<Vec<(BBox, Embedding)>, AnalyzerError> {
        let jpeg = encode_jpeg(image, 90).map_err(|e| AnalyzerError::Failed(e.to_string()))?;
        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "image/jpeg")
            .send_bytes(&jpeg)
            .map_err(|e| AnalyzerError::Failed(e.to_string()))?;
        let mut body = String::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_string(&mut body)
            .map_err(|e| AnalyzerError::Failed(e.to_string()))?;
        Self::parse(&body)
    }
}

/// 根据配置的后端名称构建分析器
pub fn analyzer_from_backend(backend: &str) -> Result<Arc<dyn FaceAnalyzer>, AnalyzerError> {
    let backend = backend.trim();
    if backend.starts_with("http://") || backend.starts_with("https://") {
        return Ok(Arc::new(HttpAnalyzer::new(backend)));
    }
    match backend {
        "" | "none" | "external" => Ok(Arc::new(NullAnalyzer)),
        other => Err(AnalyzerError::Backend(other.to_string())),
    }
}

// ========== 适配层 ==========

/// 有效性过滤: 过小/形状不像人脸/几乎占满画面的框丢弃
pub fn is_plausible_face(filter: &FaceFilter, bbox: &BBox, frame_w: u32, frame_h: u32) -> bool {
    let (w, h) = (bbox.width(), bbox.height());
    if w < filter.min_side || h < filter.min_side {
        return false;
    }
    let frame_area = (frame_w as f32) * (frame_h as f32);
    if frame_area <= 0.0 {
        return false;
    }
    let ratio = bbox.area() / frame_area;
    if ratio < filter.min_area_ratio || ratio > filter.max_area_ratio {
        return false;
    }
    let aspect = w / h;
    (filter.min_aspect..=filter.max_aspect).contains(&aspect)
}

pub struct DetectionEmbeddingAdapter {
    analyzer: Arc<dyn FaceAnalyzer>,
    filter: FaceFilter,
}

impl DetectionEmbeddingAdapter {
    pub fn new(analyzer: Arc<dyn FaceAnalyzer>, filter: FaceFilter) -> Self {
        Self { analyzer, filter }
    }

    pub fn backend(&self) -> &str {
        self.analyzer.name()
    }

    /// 检测一帧; 不合格的框与空特征被丢弃
    pub fn detect(&self, frame: &Frame) -> Result<Vec<DetectionResult>, AnalyzerError> {
        let (fw, fh) = (frame.width(), frame.height());
        let faces = self.analyzer.analyze(&frame.image)?;
        Ok(faces
            .into_iter()
            .filter(|(bbox, embedding)| {
                embedding.dim() > 0 && is_plausible_face(&self.filter, bbox, fw, fh)
            })
            .map(|(bbox, embedding)| DetectionResult {
                bbox,
                embedding,
                seq: frame.seq,
            })
            .collect())
    }
}
