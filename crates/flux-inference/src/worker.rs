// 单路摄像头处理循环：读帧 -> 抽帧 -> 推理 -> 告警/入库 -> 画框 -> 推流 -> 限速
use crate::adapters::{AlertBus, DetectionStore};
use crate::config::ServiceConfig;
use crate::detector::Detector;
use crate::error::{InferenceError, Result};
use crate::frame::{Detection, Frame};
use crate::overlay;
use crate::shutdown::StopListener;
use crate::sink::SinkProcess;
use crate::source::SourceConnection;
use crate::stats::CameraStats;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 循环节奏参数
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// 每 `frame_skip + 1` 帧处理一帧
    pub frame_skip: u32,
    pub inference_interval: Duration,
    pub reconnect_interval: Duration,
    pub error_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            frame_skip: 1,
            inference_interval: Duration::from_millis(100),
            reconnect_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl WorkerSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            frame_skip: config.inference.frame_skip,
            inference_interval: config.inference_interval(),
            reconnect_interval: config.reconnect_interval(),
            error_backoff: config.error_backoff(),
        }
    }
}

/// worker 退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerExit {
    /// 收到停止请求
    Stopped,
    /// 源连接失败次数耗尽
    SourceDisabled,
    /// 超过排空时限被强制终止
    Aborted,
}

/// 所有 worker 共享的外部能力
#[derive(Clone)]
pub struct WorkerServices {
    pub detector: Arc<dyn Detector>,
    pub alerts: Arc<dyn AlertBus>,
    pub store: Arc<dyn DetectionStore>,
}

/// 单路摄像头 worker，独占自己的源连接与推流进程
pub struct CameraWorker {
    camera_id: String,
    source: SourceConnection,
    sink: SinkProcess,
    services: WorkerServices,
    stats: Arc<CameraStats>,
    settings: WorkerSettings,
    running: StopListener,
    frame_counter: u64,
}

impl CameraWorker {
    pub fn new(
        source: SourceConnection,
        sink: SinkProcess,
        services: WorkerServices,
        stats: Arc<CameraStats>,
        settings: WorkerSettings,
        running: StopListener,
    ) -> Self {
        Self {
            camera_id: source.identity().id.clone(),
            source,
            sink,
            services,
            stats,
            settings,
            running,
            frame_counter: 0,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// 运行直到停止或源被禁用；任何退出路径都会释放源和推流进程
    pub async fn run(mut self) -> WorkerExit {
        info!(
            camera_id = %self.camera_id,
            address = %self.source.identity().source_address,
            detector = %self.services.detector.name(),
            "Camera worker started"
        );

        let exit = loop {
            if self.running.is_stopped() {
                break WorkerExit::Stopped;
            }
            if self.source.is_disabled() {
                break WorkerExit::SourceDisabled;
            }

            let outcome = AssertUnwindSafe(self.iterate()).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(camera_id = %self.camera_id, error = %e, "Error processing camera");
                    self.running.sleep(self.settings.error_backoff).await;
                }
                Err(panic) => {
                    error!(
                        camera_id = %self.camera_id,
                        panic = %panic_message(panic.as_ref()),
                        "Camera iteration panicked"
                    );
                    self.running.sleep(self.settings.error_backoff).await;
                }
            }
        };

        self.source.release().await;
        self.sink.stop().await;

        match exit {
            WorkerExit::SourceDisabled => warn!(
                camera_id = %self.camera_id,
                failures = self.source.consecutive_failures(),
                "Camera disabled, worker exiting"
            ),
            _ => info!(
                camera_id = %self.camera_id,
                frames_read = self.source.frames_read(),
                "Camera worker stopped"
            ),
        }
        exit
    }

    async fn iterate(&mut self) -> Result<()> {
        let Some(mut frame) = self.source.read().await else {
            if !self.source.is_disabled() {
                self.running.sleep(self.settings.reconnect_interval).await;
            }
            return Ok(());
        };
        self.stats.record_frame_read();

        self.frame_counter += 1;
        if self.frame_counter % (u64::from(self.settings.frame_skip) + 1) != 0 {
            return Ok(());
        }

        if !frame.is_well_formed() {
            return Err(InferenceError::InvalidFrame(format!(
                "frame #{} carries {} bytes for {}x{}",
                frame.sequence_number,
                frame.pixels.len(),
                frame.width,
                frame.height
            )));
        }

        let (returned, detections) =
            detect(&self.camera_id, self.services.detector.clone(), frame).await?;
        frame = returned;
        self.stats.record_inference(detections.len());

        if !detections.is_empty() {
            debug!(camera_id = %self.camera_id, count = detections.len(), "Detections found");

            if self.services.alerts.publish(&self.camera_id, &detections).await {
                self.stats.record_alert();
            }
            for detection in &detections {
                self.services
                    .store
                    .record(&self.camera_id, frame.sequence_number, detection)
                    .await;
            }
        }

        if let Err(e) = overlay::draw_detections(&mut frame, &detections) {
            debug!(camera_id = %self.camera_id, error = %e, "Failed to draw boxes");
        }

        if !self.sink.write(&frame).await {
            self.stats.record_sink_failure();
            debug!(camera_id = %self.camera_id, frame = frame.sequence_number, "Failed to stream frame");
        }

        self.running.sleep(self.settings.inference_interval).await;
        Ok(())
    }
}

/// 在阻塞线程池上推理；检测器报错或 panic 都按无结果处理
async fn detect(
    camera_id: &str,
    detector: Arc<dyn Detector>,
    frame: Frame,
) -> Result<(Frame, Vec<Detection>)> {
    let (frame, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| detector.infer(&frame)));
        (frame, outcome)
    })
    .await
    .map_err(|e| InferenceError::Io(std::io::Error::other(e)))?;

    let detections = match outcome {
        Ok(Ok(detections)) => detections,
        Ok(Err(e)) => {
            warn!(camera_id = %camera_id, error = %e, "Inference failed, skipping detections");
            Vec::new()
        }
        Err(panic) => {
            error!(
                camera_id = %camera_id,
                panic = %panic_message(panic.as_ref()),
                "Detector panicked, skipping detections"
            );
            Vec::new()
        }
    };
    Ok((frame, detections))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
