/// 视频输入系统 (Video Input System)
///
/// 每路摄像头独立采集线程, 负责读帧/断线重连/占位帧
/// - CameraSource:    单路采集源 (状态机 + 重连)
/// - FrameDispatcher: 按操作员请求启停各路摄像头
/// - DropOldestQueue: 有界丢旧队列
pub mod camera;
pub mod device;
pub mod dispatcher;
pub mod lifecycle;
pub mod queue;

pub use camera::{CameraSource, CameraState};
pub use device::{CaptureDevice, DefaultOpener, DeviceOpener, DeviceSelector, Frame};
pub use dispatcher::{BoxStatus, FrameDispatcher};
pub use lifecycle::{BoxLifecycle, LifecycleState};
pub use queue::DropOldestQueue;
