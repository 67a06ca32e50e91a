use crate::shutdown::StopListener;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::task::JoinHandle;
use tracing::info;

/// 单路摄像头计数器（仅由对应 worker 写入）
#[derive(Debug, Default)]
pub struct CameraStats {
    frames_read: AtomicU64,
    frames_inferred: AtomicU64,
    detections: AtomicU64,
    alerts_published: AtomicU64,
    sink_failures: AtomicU64,
}

/// 计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CameraStatsSnapshot {
    pub frames_read: u64,
    pub frames_inferred: u64,
    pub detections: u64,
    pub alerts_published: u64,
    pub sink_failures: u64,
}

impl CameraStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_read(&self) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference(&self, detections: usize) {
        self.frames_inferred.fetch_add(1, Ordering::Relaxed);
        self.detections.fetch_add(detections as u64, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.alerts_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CameraStatsSnapshot {
        CameraStatsSnapshot {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_inferred: self.frames_inferred.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            alerts_published: self.alerts_published.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

/// 两次采样之间的推理帧率
fn inference_fps(previous: u64, current: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    current.saturating_sub(previous) as f64 / secs
}

/// 启动周期性统计日志任务（摄像头推理帧率 + 系统 CPU / 内存）
pub(crate) fn spawn_reporter(
    cameras: Vec<(String, Arc<CameraStats>)>,
    period: Duration,
    mut stop: StopListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if period.is_zero() {
            stop.stopped().await;
            return;
        }

        let mut system = system_sampler();
        let mut previous: Vec<u64> = cameras.iter().map(|(_, s)| s.snapshot().frames_inferred).collect();
        let mut last_tick = Instant::now();
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.stopped() => break,
            }

            let elapsed = last_tick.elapsed();
            last_tick = Instant::now();

            for ((camera_id, stats), prev) in cameras.iter().zip(previous.iter_mut()) {
                let snapshot = stats.snapshot();
                let fps = inference_fps(*prev, snapshot.frames_inferred, elapsed);
                *prev = snapshot.frames_inferred;
                info!(
                    camera_id = %camera_id,
                    fps = %format!("{:.1}", fps),
                    frames_read = snapshot.frames_read,
                    detections = snapshot.detections,
                    sink_failures = snapshot.sink_failures,
                    "Camera statistics"
                );
            }

            system.refresh_cpu();
            system.refresh_memory();
            info!(
                cpu_percent = %format!("{:.1}", system.global_cpu_info().cpu_usage()),
                memory_used_mb = system.used_memory() / 1024 / 1024,
                memory_total_mb = system.total_memory() / 1024 / 1024,
                "System statistics"
            );
        }
    })
}

/// CPU 使用率需要两次采样，先做一次基线刷新
fn system_sampler() -> System {
    let mut system = System::new();
    system.refresh_cpu();
    system
}
