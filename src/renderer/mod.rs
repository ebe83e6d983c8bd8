/// 渲染输出 (Rendering)
///
/// - Overlay: 稳定叠加层 (多帧平滑)
/// - Draw:    框/标签/HUD/占位帧绘制
/// - Stream:  JPEG/MJPEG 拉流接口
pub mod draw;
pub mod overlay;
pub mod stream;

pub use draw::Painter;
pub use overlay::{FaceOverlay, StableOverlayRenderer};
pub use stream::{encode_jpeg, mjpeg_part, AnnotatedFrame, FrameStream, LatestFrames};
