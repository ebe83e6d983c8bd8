//! 审计存储
//!
//! - 陌生人: 截图 + 元数据行
//! - 已授权人员: 出入记录行

use crate::error::AuditError;
use crate::renderer::stream::encode_jpeg;
use chrono::{DateTime, Local};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 陌生人记录元数据
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UnauthorizedRecord {
    pub image_path: String,
    pub camera_box_id: u32,
    pub detection_timestamp: String,
    pub notes: String,
}

/// 出入记录
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AccessRecord {
    pub id_number: String,
    pub display_name: String,
    pub camera_box_id: u32,
    pub date: String,
    pub time: String,
    pub created_at: String,
}

impl AccessRecord {
    pub fn new(id_number: &str, display_name: &str, box_id: u32, at: DateTime<Local>) -> Self {
        Self {
            id_number: id_number.to_string(),
            display_name: display_name.to_string(),
            camera_box_id: box_id,
            date: at.format("%Y-%m-%d").to_string(),
            time: at.format("%H:%M:%S").to_string(),
            created_at: at.to_rfc3339(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    /// 保存陌生人截图与元数据, 返回截图路径
    /// `face` 为该人脸在本帧中的序号, 同一帧的多张截图互不覆盖
    fn record_unauthorized(
        &self,
        box_id: u32,
        face: usize,
        crop: &RgbImage,
        at: DateTime<Local>,
    ) -> Result<PathBuf, AuditError>;

    fn record_access(&self, record: &AccessRecord) -> Result<(), AuditError>;
}

/// 文件审计存储 (截图 JPEG + JSONL)
pub struct FileAuditStore {
    root: PathBuf,
    jpeg_quality: u8,
    write_lock: Mutex<()>,
}

impl FileAuditStore {
    pub fn new(root: impl AsRef<Path>, jpeg_quality: u8) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            jpeg_quality,
            write_lock: Mutex::new(()),
        }
    }

    pub fn unauthorized_dir(&self) -> PathBuf {
        self.root.join("unauthorized_faces")
    }

    pub fn unauthorized_log(&self) -> PathBuf {
        self.unauthorized_dir().join("records.jsonl")
    }

    pub fn access_log(&self) -> PathBuf {
        self.root.join("access_logs").join("access.jsonl")
    }

    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> AuditError + '_ {
        move |source| AuditError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn append_line<T: Serialize>(&self, path: &Path, row: &T) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(row)?;
        line.push('\n');
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Self::io(parent))?;
        }
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Self::io(path))?;
        file.write_all(line.as_bytes()).map_err(Self::io(path))
    }
}

impl FileAuditStore {
    /// 以 `create_new` 写入截图; 文件名已存在时追加序号, 不覆盖旧截图
    fn write_new(dir: &Path, stem: &str, bytes: &[u8]) -> Result<PathBuf, AuditError> {
        let mut n = 0u32;
        loop {
            let name = if n == 0 {
                format!("{}.jpg", stem)
            } else {
                format!("{}-{}.jpg", stem, n)
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes).map_err(Self::io(&path))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(source) => return Err(AuditError::Io { path, source }),
            }
        }
    }
}

impl AuditSink for FileAuditStore {
    fn record_unauthorized(
        &self,
        box_id: u32,
        face: usize,
        crop: &RgbImage,
        at: DateTime<Local>,
    ) -> Result<PathBuf, AuditError> {
        let day_dir = self.unauthorized_dir().join(at.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&day_dir).map_err(Self::io(&day_dir))?;

        let stem = format!("camera{}_{}_{}", box_id, at.format("%H-%M-%S-%6f"), face);
        let jpeg = encode_jpeg(crop, self.jpeg_quality)?;
        let path = Self::write_new(&day_dir, &stem, &jpeg)?;

        let record = UnauthorizedRecord {
            image_path: path.display().to_string(),
            camera_box_id: box_id,
            detection_timestamp: at.to_rfc3339(),
            notes: format!("Detected at {}", at.format("%Y-%m-%d %H:%M:%S")),
        };
        self.append_line(&self.unauthorized_log(), &record)?;
        Ok(path)
    }

    fn record_access(&self, record: &AccessRecord) -> Result<(), AuditError> {
        self.append_line(&self.access_log(), record)
    }
}

/// 读取 JSONL 记录 (跳过损坏行)
pub fn read_records<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, AuditError> {
    let text = fs::read_to_string(path).map_err(FileAuditStore::io(path))?;
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}
