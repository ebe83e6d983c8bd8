/// 画面绘制 (检测框/标签/HUD/占位帧)
/// Drawing helpers on top of imageproc
use crate::detection::types::BBox;
use crate::renderer::overlay::FaceOverlay;
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

// ========== 颜色 ==========

pub const AUTHORIZED: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNAUTHORIZED: Rgb<u8> = Rgb([255, 0, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub const HUD: Rgb<u8> = Rgb([255, 255, 0]);

/// 未指定字体时依次尝试的系统字体
const FALLBACK_FONTS: &[&str] = &[
    "assets/font/msyh.ttc",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// 绘制器; 字体缺失时只画框不画字
#[derive(Clone, Default)]
pub struct Painter {
    font: Option<FontArc>,
}

impl Painter {
    pub fn without_font() -> Self {
        Self { font: None }
    }

    /// 加载字体: 优先使用配置路径, 否则尝试常见系统字体
    pub fn load(font_path: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = match font_path {
            Some(p) => vec![p.to_path_buf()],
            None => FALLBACK_FONTS.iter().map(PathBuf::from).collect(),
        };
        for path in candidates {
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            match FontArc::try_from_vec(bytes) {
                Ok(font) => {
                    info!("✅ 字体加载成功: {}", path.display());
                    return Self { font: Some(font) };
                }
                Err(e) => warn!("⚠️ 字体解析失败 {}: {}", path.display(), e),
            }
        }
        warn!("⚠️ 未找到可用字体, 叠加层将不显示文字");
        Self::without_font()
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 空心矩形 (thickness 像素)
    pub fn rect(&self, image: &mut RgbImage, bbox: &BBox, color: Rgb<u8>, thickness: u32) {
        let (w, h) = (image.width() as f32, image.height() as f32);
        for t in 0..thickness {
            let t = t as f32;
            let x1 = (bbox.x1 + t).clamp(0.0, w - 1.0);
            let y1 = (bbox.y1 + t).clamp(0.0, h - 1.0);
            let x2 = (bbox.x2 - t).clamp(0.0, w - 1.0);
            let y2 = (bbox.y2 - t).clamp(0.0, h - 1.0);
            if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
                break;
            }
            let rect = Rect::at(x1 as i32, y1 as i32).of_size((x2 - x1) as u32, (y2 - y1) as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }

    pub fn text(&self, image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>, size: f32) {
        if let Some(font) = &self.font {
            draw_text_mut(image, color, x, y, PxScale::from(size), font, text);
        }
    }

    /// 带底色的标签
    pub fn label(
        &self,
        image: &mut RgbImage,
        x: i32,
        y: i32,
        text: &str,
        fg: Rgb<u8>,
        bg: Rgb<u8>,
        size: f32,
    ) {
        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(size);
        let (tw, th) = text_size(scale, font, text);
        let rect = Rect::at(x, y).of_size(tw.max(1) + 6, th.max(1) + 6);
        draw_filled_rect_mut(image, rect, bg);
        draw_text_mut(image, fg, x + 3, y + 3, scale, font, text);
    }

    /// 叠加人脸框 + 标签 + 置信度 + HUD
    pub fn annotate(&self, image: &mut RgbImage, box_id: u32, faces: &[FaceOverlay]) {
        for face in faces {
            let (color, title) = if face.result.authorized {
                let name = face
                    .result
                    .identity
                    .as_ref()
                    .map(|m| {
                        if m.display_name.trim().is_empty() {
                            format!("ID: {}", m.id)
                        } else {
                            m.display_name.clone()
                        }
                    })
                    .unwrap_or_else(|| "AUTHORIZED".to_string());
                (AUTHORIZED, name)
            } else {
                (UNAUTHORIZED, "UNAUTHORIZED".to_string())
            };

            self.rect(image, &face.bbox, color, 2);
            let label_y = (face.bbox.y1 as i32 - 24).max(0);
            self.label(image, face.bbox.x1 as i32, label_y, &title, BLACK, color, 16.0);
            self.text(
                image,
                face.bbox.x1 as i32,
                face.bbox.y2 as i32 + 4,
                &format!("{:.2}", face.result.confidence()),
                color,
                14.0,
            );
        }
        self.hud(image, box_id, faces.len());
    }

    pub fn hud(&self, image: &mut RgbImage, box_id: u32, faces: usize) {
        self.text(image, 10, 8, &format!("CAM {}", box_id), HUD, 20.0);
        self.text(image, 10, 32, &format!("Faces: {}", faces), HUD, 18.0);
    }

    /// 占位帧: 深灰渐变 + 标题 + 摄像头号
    pub fn placeholder(&self, width: u32, height: u32, title: &str, box_id: u32) -> Arc<RgbImage> {
        let width = width.max(1);
        let height = height.max(1);
        let mut image = RgbImage::from_fn(width, height, |_, y| {
            let v = 30 + (y * 30 / height) as u8;
            Rgb([v, v, v])
        });
        if let Some(font) = &self.font {
            let scale = PxScale::from(48.0);
            let (tw, th) = text_size(scale, font, title);
            let x = (width as i32 - tw as i32) / 2;
            let y = (height as i32 - th as i32) / 2 - 20;
            draw_text_mut(&mut image, WHITE, x, y, scale, font, title);

            let sub = format!("Camera {}", box_id);
            let sub_scale = PxScale::from(24.0);
            let (sw, _) = text_size(sub_scale, font, &sub);
            let sx = (width as i32 - sw as i32) / 2;
            draw_text_mut(&mut image, Rgb([180, 180, 180]), sx, y + th as i32 + 16, sub_scale, font, &sub);
        }
        Arc::new(image)
    }
}
