// flux-inference: 多路摄像头推理编排
//
// 架构设计：
// - 每路摄像头一个独立任务，故障按摄像头隔离
// - 源连接固定间隔重试，超过阈值后永久禁用
// - 告警与持久化为可降级适配器，失败只返回 false

pub mod adapters;
pub mod camera;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame;
pub mod orchestrator;
pub mod overlay;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod stats;
pub mod worker;

pub use adapters::{
    AlertBus, DetectionStore, MqttAlertBus, NullAlertBus, NullDetectionStore, SqlDetectionStore,
};
pub use camera::CameraIdentity;
pub use config::{ConfigLoader, ServiceConfig};
pub use detector::{Detector, NullDetector};
pub use error::{InferenceError, Result};
pub use frame::{BoundingBox, Detection, Frame};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, ShutdownReport};
pub use shutdown::{StopListener, StopSignal};
pub use sink::{DiscardLauncher, FfmpegPipeLauncher, FramePipe, PipeLauncher, PipeSpec, SinkProcess};
pub use source::{
    ConnectionState, FfmpegVideoSource, SourceConnection, VideoHandle, VideoSource,
};
pub use stats::{CameraStats, CameraStatsSnapshot};
pub use worker::{CameraWorker, WorkerExit, WorkerServices, WorkerSettings};
