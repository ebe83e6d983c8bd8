//! 人脸特征库 (内存快照)
//!
//! 重新加载时先完整构建新快照再原子替换, 读者只会看到完整的旧快照或新快照。

use super::enrollment::{EnrollmentRecord, EnrollmentSource};
use crate::detection::types::{Embedding, IdentityMatch, MatchResult, UnitEmbedding};
use crate::error::EnrollmentError;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 已注册人员 (特征已归一化)
#[derive(Clone, Debug)]
pub struct EnrolledIdentity {
    pub id: String,
    pub display_name: String,
    pub references: Vec<UnitEmbedding>,
    pub loaded_at: Instant,
}

/// 不可变快照
#[derive(Debug)]
pub struct StoreSnapshot {
    identities: Vec<EnrolledIdentity>,
    dim: Option<usize>,
    version: u64,
    loaded_at: Option<Instant>,
}

impl StoreSnapshot {
    pub fn empty() -> Self {
        Self {
            identities: Vec::new(),
            dim: None,
            version: 0,
            loaded_at: None,
        }
    }

    /// 由注册记录构建; 不合格的槽位/人员跳过并告警
    pub fn build(records: &[EnrollmentRecord], version: u64) -> Self {
        let now = Instant::now();
        let mut dim: Option<usize> = None;
        let mut identities: Vec<EnrolledIdentity> = Vec::with_capacity(records.len());

        for record in records.iter().filter(|r| r.is_allowed()) {
            let mut references = Vec::new();
            for (slot, values) in record.slots() {
                let Some(values) = values.filter(|v| !v.is_empty()) else {
                    continue;
                };
                if let Some(expected) = dim {
                    if values.len() != expected {
                        let err = EnrollmentError::Dimension {
                            identity: record.id_number.clone(),
                            slot: slot.to_string(),
                            expected,
                            got: values.len(),
                        };
                        warn!("⚠️ 跳过特征槽位: {}", err);
                        continue;
                    }
                }
                match Embedding::from_vec(values.to_vec()).normalize() {
                    Some(unit) => {
                        dim.get_or_insert(unit.dim());
                        references.push(unit);
                    }
                    None => debug!("{} 的 {} 槽位为零向量, 跳过", record.id_number, slot),
                }
            }

            if references.is_empty() {
                warn!("⚠️ {} 没有可用的人脸特征, 未加载", record.id_number);
                continue;
            }

            let identity = EnrolledIdentity {
                id: record.id_number.clone(),
                display_name: record.display_name(),
                references,
                loaded_at: now,
            };
            match identities.iter_mut().find(|i| i.id == identity.id) {
                Some(existing) => {
                    warn!("⚠️ 重复的人员编号 {}, 使用后出现的记录", identity.id);
                    *existing = identity;
                }
                None => identities.push(identity),
            }
        }

        Self {
            identities,
            dim,
            version,
            loaded_at: Some(now),
        }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn identities(&self) -> &[EnrolledIdentity] {
        &self.identities
    }

    /// 每人取各角度中的最小余弦距离, 再取全局最优
    pub fn best_match(&self, query: &UnitEmbedding) -> Option<(&EnrolledIdentity, f32)> {
        if self.dim != Some(query.dim()) {
            return None;
        }
        self.identities
            .iter()
            .filter_map(|identity| {
                identity
                    .references
                    .iter()
                    .map(|r| query.cosine_distance(r))
                    .min_by(|a, b| a.total_cmp(b))
                    .map(|d| (identity, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

pub struct EmbeddingStore {
    snapshot: ArcSwap<StoreSnapshot>,
    ttl: Duration,
    versions: AtomicU64,
    reloading: Mutex<()>,
}

impl EmbeddingStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(StoreSnapshot::empty()),
            ttl,
            versions: AtomicU64::new(0),
            reloading: Mutex::new(()),
        }
    }

    /// 拉取注册库, 构建新快照后原子替换; 失败时保留旧快照
    pub fn reload(&self, source: &dyn EnrollmentSource) -> Result<usize, EnrollmentError> {
        let _guard = self.reloading.lock().unwrap_or_else(|e| e.into_inner());
        let records = source.fetch()?;
        let version = self.versions.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = StoreSnapshot::build(&records, version);
        let count = snapshot.len();
        self.snapshot.store(Arc::new(snapshot));
        Ok(count)
    }

    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 从未加载或超过 TTL
    pub fn is_stale(&self) -> bool {
        match self.snapshot.load().loaded_at {
            Some(at) => at.elapsed() >= self.ttl,
            None => true,
        }
    }

    /// 匹配; 零向量/维度不符/空库都视为未匹配
    pub fn match_embedding(&self, embedding: &Embedding, threshold: f32) -> MatchResult {
        let Some(query) = embedding.normalize() else {
            return MatchResult::unknown(f32::INFINITY);
        };
        let snapshot = self.snapshot.load();
        match snapshot.best_match(&query) {
            Some((identity, distance)) if distance < threshold => MatchResult {
                identity: Some(IdentityMatch {
                    id: identity.id.clone(),
                    display_name: identity.display_name.clone(),
                }),
                distance,
                authorized: true,
            },
            Some((_, distance)) => MatchResult::unknown(distance),
            None => MatchResult::unknown(f32::INFINITY),
        }
    }
}
