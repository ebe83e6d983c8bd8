/// 检测系统 (Detection System)
///
/// - Adapter: 外部人脸检测/特征提取能力的接入与过滤
/// - Types:   检测框/特征向量/匹配结果
pub mod adapter;
pub mod types;

pub use adapter::{DetectionEmbeddingAdapter, FaceAnalyzer, HttpAnalyzer, NullAnalyzer};
pub use types::{BBox, DetectionResult, Embedding, IdentityMatch, MatchResult, UnitEmbedding};
