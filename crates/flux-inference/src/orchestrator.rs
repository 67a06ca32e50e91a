use crate::adapters::{AlertBus, DetectionStore, NullAlertBus, NullDetectionStore};
use crate::camera::CameraIdentity;
use crate::config::ServiceConfig;
use crate::detector::{Detector, NullDetector};
use crate::error::{InferenceError, Result};
use crate::shutdown::StopSignal;
use crate::sink::{DiscardLauncher, PipeLauncher, SinkProcess};
use crate::source::{SourceConnection, VideoSource};
use crate::stats::{self, CameraStats, CameraStatsSnapshot};
use crate::worker::{CameraWorker, WorkerExit, WorkerServices, WorkerSettings};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// 关闭报告
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// 每路摄像头的退出原因（按配置顺序）
    pub exits: Vec<(String, WorkerExit)>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn exit_of(&self, camera_id: &str) -> Option<WorkerExit> {
        self.exits
            .iter()
            .find(|(id, _)| id == camera_id)
            .map(|(_, exit)| *exit)
    }

    pub fn aborted(&self) -> usize {
        self.exits
            .iter()
            .filter(|(_, exit)| *exit == WorkerExit::Aborted)
            .count()
    }
}

struct WorkerSlot {
    camera_id: String,
    release: StopSignal,
    handle: JoinHandle<WorkerExit>,
}

/// 在任务结束（含 abort）时递减活跃 worker 计数
struct ActiveGuard(Arc<watch::Sender<usize>>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// 多路摄像头编排器
///
/// 每路摄像头一个独立任务；`stop()` 先清除运行标志并释放所有源，
/// 再在 `drain_timeout` 内等待 worker 退出，超时的直接 abort。
pub struct Orchestrator {
    cameras: Vec<Arc<CameraIdentity>>,
    source: Arc<dyn VideoSource>,
    launcher: Arc<dyn PipeLauncher>,
    services: WorkerServices,
    settings: WorkerSettings,
    max_failures: u32,
    retry_interval: Duration,
    frame_rate: u32,
    drain_timeout: Duration,
    stats_interval: Duration,
    stats: Vec<(String, Arc<CameraStats>)>,
    running: StopSignal,
    active: Arc<watch::Sender<usize>>,
    workers: Vec<WorkerSlot>,
    reporter: Option<JoinHandle<()>>,
    started: bool,
    report: Option<ShutdownReport>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn camera_ids(&self) -> Vec<String> {
        self.cameras.iter().map(|c| c.id.clone()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.started && !self.running.is_triggered()
    }

    /// 当前仍在运行的 worker 数
    pub fn active_workers(&self) -> usize {
        *self.active.borrow()
    }

    /// 每路摄像头统计快照
    pub fn stats(&self) -> Vec<(String, CameraStatsSnapshot)> {
        self.stats
            .iter()
            .map(|(id, s)| (id.clone(), s.snapshot()))
            .collect()
    }

    /// 为每路摄像头启动一个 worker，立即返回
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(InferenceError::AlreadyStarted);
        }
        self.started = true;

        self.active.send_replace(self.cameras.len());

        for (identity, (_, stats)) in self.cameras.iter().zip(self.stats.iter()) {
            let release = StopSignal::new();
            let source = SourceConnection::new(
                identity.clone(),
                self.source.clone(),
                self.max_failures,
                self.retry_interval,
                release.listener(),
            );
            let sink = SinkProcess::new(identity.id.clone(), self.launcher.clone(), self.frame_rate);
            let worker = CameraWorker::new(
                source,
                sink,
                self.services.clone(),
                stats.clone(),
                self.settings.clone(),
                self.running.listener(),
            );

            let guard = ActiveGuard(self.active.clone());
            let handle = tokio::spawn(async move {
                let _guard = guard;
                worker.run().await
            });

            self.workers.push(WorkerSlot {
                camera_id: identity.id.clone(),
                release,
                handle,
            });
        }

        self.reporter = Some(stats::spawn_reporter(
            self.stats.clone(),
            self.stats_interval,
            self.running.listener(),
        ));

        info!(
            cameras = self.cameras.len(),
            frame_skip = self.settings.frame_skip,
            max_failures = self.max_failures,
            "Orchestrator started"
        );
        Ok(())
    }

    /// 所有 worker 退出后返回（例如全部摄像头被禁用）
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// 协调停止；可重复调用，之后返回同一份报告
    pub async fn stop(&mut self) -> ShutdownReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        let start = Instant::now();
        info!(workers = self.workers.len(), "Stopping orchestrator");

        self.running.trigger();
        for slot in &self.workers {
            slot.release.trigger();
        }

        let deadline = start + self.drain_timeout;
        let mut exits = Vec::with_capacity(self.workers.len());
        for slot in self.workers.drain(..) {
            let WorkerSlot {
                camera_id,
                mut handle,
                ..
            } = slot;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let exit = match timeout(remaining, &mut handle).await {
                Ok(Ok(exit)) => exit,
                Ok(Err(e)) => {
                    error!(camera_id = %camera_id, error = %e, "Camera worker task failed");
                    WorkerExit::Aborted
                }
                Err(_) => {
                    warn!(camera_id = %camera_id, "Camera worker did not stop in time, aborting");
                    handle.abort();
                    let _ = handle.await;
                    WorkerExit::Aborted
                }
            };
            exits.push((camera_id, exit));
        }

        if let Some(mut reporter) = self.reporter.take() {
            if timeout(Duration::from_secs(1), &mut reporter).await.is_err() {
                warn!("Statistics reporter did not stop in time");
                reporter.abort();
            }
        }

        self.services.alerts.close().await;
        self.services.store.close().await;

        let report = ShutdownReport {
            exits,
            elapsed: start.elapsed(),
        };
        info!(
            elapsed = ?report.elapsed,
            aborted = report.aborted(),
            "Orchestrator stopped"
        );
        self.report = Some(report.clone());
        report
    }
}

/// 未调用 `stop()` 就被丢弃时，通知所有 worker 退出并释放源
impl Drop for Orchestrator {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        warn!(workers = self.workers.len(), "Orchestrator dropped without stop, signalling workers");
        self.running.trigger();
        for slot in &self.workers {
            slot.release.trigger();
        }
    }
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    cameras: Vec<CameraIdentity>,
    source: Option<Arc<dyn VideoSource>>,
    launcher: Arc<dyn PipeLauncher>,
    detector: Arc<dyn Detector>,
    alerts: Arc<dyn AlertBus>,
    store: Arc<dyn DetectionStore>,
    settings: WorkerSettings,
    max_failures: u32,
    retry_interval: Duration,
    frame_rate: u32,
    drain_timeout: Duration,
    stats_interval: Duration,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            cameras: Vec::new(),
            source: None,
            launcher: Arc::new(DiscardLauncher),
            detector: Arc::new(NullDetector),
            alerts: Arc::new(NullAlertBus),
            store: Arc::new(NullDetectionStore),
            settings: WorkerSettings::default(),
            max_failures: 6,
            retry_interval: Duration::from_secs(5),
            frame_rate: 15,
            drain_timeout: Duration::from_secs(10),
            stats_interval: Duration::from_secs(30),
        }
    }

    /// 从服务配置读取摄像头列表和节奏参数
    pub fn with_config(mut self, config: &ServiceConfig) -> Self {
        self.cameras = config.camera_identities();
        self.settings = WorkerSettings::from_config(config);
        self.max_failures = config.cameras.max_retries;
        self.retry_interval = config.retry_interval();
        self.frame_rate = config.sink.frame_rate;
        self.drain_timeout = config.drain_timeout();
        self.stats_interval = config.stats_interval();
        self
    }

    pub fn with_cameras(mut self, cameras: Vec<CameraIdentity>) -> Self {
        self.cameras = cameras;
        self
    }

    pub fn with_video_source(mut self, source: Arc<dyn VideoSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_pipe_launcher(mut self, launcher: Arc<dyn PipeLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_alert_bus(mut self, alerts: Arc<dyn AlertBus>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_detection_store(mut self, store: Arc<dyn DetectionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_worker_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let source = self
            .source
            .ok_or_else(|| InferenceError::Config("video source is required".to_string()))?;
        if self.cameras.is_empty() {
            return Err(InferenceError::Config("at least one camera is required".to_string()));
        }

        let stats = self
            .cameras
            .iter()
            .map(|c| (c.id.clone(), Arc::new(CameraStats::new())))
            .collect();
        let (active, _) = watch::channel(0usize);

        Ok(Orchestrator {
            cameras: self.cameras.into_iter().map(Arc::new).collect(),
            source,
            launcher: self.launcher,
            services: WorkerServices {
                detector: self.detector,
                alerts: self.alerts,
                store: self.store,
            },
            settings: self.settings,
            max_failures: self.max_failures,
            retry_interval: self.retry_interval,
            frame_rate: self.frame_rate,
            drain_timeout: self.drain_timeout,
            stats_interval: self.stats_interval,
            stats,
            running: StopSignal::new(),
            active: Arc::new(active),
            workers: Vec::new(),
            reporter: None,
            started: false,
            report: None,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
