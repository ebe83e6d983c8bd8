//! 采集设备抽象
//!
//! 设备选择器格式:
//! - `0`, `1` ...          本地设备索引
//! - `dir:<path>`          图片目录循环回放
//! - `http://...` 等       HTTP 快照摄像头 (每次读帧拉取一张 JPEG)

use crate::config::CameraProfile;
use crate::error::CaptureError;
use image::{imageops, RgbImage};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 单帧快照上限
const MAX_SNAPSHOT_BYTES: u64 = 16 * 1024 * 1024;

// ========== 帧 ==========

/// 采集帧 (采集线程 → 识别线程)
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: Arc<RgbImage>, // 使用Arc共享数据,避免复制
    pub seq: u64,
    pub captured_at: Instant,
    pub placeholder: bool, // 无信号占位帧
}

impl Frame {
    pub fn new(image: RgbImage, seq: u64) -> Self {
        Self {
            image: Arc::new(image),
            seq,
            captured_at: Instant::now(),
            placeholder: false,
        }
    }

    pub fn placeholder(image: Arc<RgbImage>, seq: u64) -> Self {
        Self {
            image,
            seq,
            captured_at: Instant::now(),
            placeholder: true,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

// ========== 设备选择器 ==========

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceSelector {
    Index(u32),
    Directory(PathBuf),
    Snapshot(String),
}

impl DeviceSelector {
    pub fn parse(input: &str) -> Result<Self, CaptureError> {
        let s = input.trim();
        if let Ok(index) = s.parse::<u32>() {
            return Ok(Self::Index(index));
        }
        if let Some(path) = s.strip_prefix("dir:") {
            return Ok(Self::Directory(PathBuf::from(path)));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Self::Snapshot(s.to_string()));
        }
        Err(CaptureError::NoDevice(input.to_string()))
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{}", i),
            Self::Directory(p) => write!(f, "dir:{}", p.display()),
            Self::Snapshot(url) => write!(f, "{}", url),
        }
    }
}

// ========== 设备接口 ==========

/// 已打开的采集设备; drop 即释放
pub trait CaptureDevice: Send {
    fn read(&mut self) -> Result<RgbImage, CaptureError>;
}

/// 根据选择器打开设备
pub trait DeviceOpener: Send + Sync {
    fn open(
        &self,
        selector: &DeviceSelector,
        profile: &CameraProfile,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError>;
}

/// 默认设备工厂: 图片目录 + HTTP快照
#[derive(Default)]
pub struct DefaultOpener;

impl DeviceOpener for DefaultOpener {
    fn open(
        &self,
        selector: &DeviceSelector,
        profile: &CameraProfile,
    ) -> Result<Box<dyn CaptureDevice>, CaptureError> {
        match selector {
            DeviceSelector::Index(_) => Err(CaptureError::NoDevice(format!(
                "{} (本地设备需要外部采集后端)",
                selector
            ))),
            DeviceSelector::Directory(dir) => {
                Ok(Box::new(ImageSequenceDevice::open(dir, profile)?))
            }
            DeviceSelector::Snapshot(url) => Ok(Box::new(SnapshotDevice::new(url, profile))),
        }
    }
}

/// 按帧率节拍等待
fn pace(last: &mut Option<Instant>, interval: Duration) {
    if let Some(prev) = *last {
        let elapsed = prev.elapsed();
        if elapsed < interval {
            std::thread::sleep(interval - elapsed);
        }
    }
    *last = Some(Instant::now());
}

/// 统一到目标分辨率
fn fit(image: RgbImage, profile: &CameraProfile) -> RgbImage {
    if profile.width == 0
        || profile.height == 0
        || (image.width() == profile.width && image.height() == profile.height)
    {
        return image;
    }
    imageops::resize(
        &image,
        profile.width,
        profile.height,
        imageops::FilterType::Triangle,
    )
}

// ========== 图片目录回放 ==========

/// 循环回放目录中的图片 (按文件名排序)
pub struct ImageSequenceDevice {
    files: Vec<PathBuf>,
    cursor: usize,
    profile: CameraProfile,
    last_read: Option<Instant>,
}

impl ImageSequenceDevice {
    pub fn open(dir: &Path, profile: &CameraProfile) -> Result<Self, CaptureError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|_| CaptureError::NoDevice(format!("dir:{}", dir.display())))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| {
                        matches!(
                            e.to_ascii_lowercase().as_str(),
                            "jpg" | "jpeg" | "png" | "bmp"
                        )
                    })
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(CaptureError::NoDevice(format!("dir:{}", dir.display())));
        }
        Ok(Self {
            files,
            cursor: 0,
            profile: profile.clone(),
            last_read: None,
        })
    }
}

impl CaptureDevice for ImageSequenceDevice {
    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        pace(&mut self.last_read, self.profile.frame_interval());
        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();
        let image = image::open(path).map_err(|e| CaptureError::ReadFailure {
            selector: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(fit(image.to_rgb8(), &self.profile))
    }
}

// ========== HTTP快照摄像头 ==========

/// 每次读帧请求一张JPEG快照
pub struct SnapshotDevice {
    url: String,
    agent: ureq::Agent,
    profile: CameraProfile,
    last_read: Option<Instant>,
}

impl SnapshotDevice {
    pub fn new(url: &str, profile: &CameraProfile) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        Self {
            url: url.to_string(),
            agent,
            profile: profile.clone(),
            last_read: None,
        }
    }

    fn failure(&self, reason: impl ToString) -> CaptureError {
        CaptureError::ReadFailure {
            selector: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

impl CaptureDevice for SnapshotDevice {
    fn read(&mut self) -> Result<RgbImage, CaptureError> {
        pace(&mut self.last_read, self.profile.frame_interval());
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| self.failure(e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_SNAPSHOT_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| self.failure(e))?;
        let image = image::load_from_memory(&bytes).map_err(|e| self.failure(e))?;
        Ok(fit(image.to_rgb8(), &self.profile))
    }
}
