/// 识别系统 (Recognition System)
///
/// - Store:      人脸特征库快照与匹配
/// - Enrollment: 注册数据源与注册事件监听
/// - Worker:     每路摄像头的识别线程
pub mod enrollment;
pub mod store;
pub mod worker;

pub use enrollment::{
    EnrollmentEvent, EnrollmentListener, EnrollmentRecord, EnrollmentSource, JsonEnrollmentFile,
    MemoryEnrollments, ReloadTrigger,
};
pub use store::{EmbeddingStore, EnrolledIdentity, StoreSnapshot};
pub use worker::{RecognitionWorker, WorkerStage};
