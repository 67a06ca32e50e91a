// 下游推流进程：懒启动、分辨率变化重启、断管重试一次
mod ffmpeg;

pub use ffmpeg::FfmpegPipeLauncher;

use crate::frame::Frame;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to launch sink process for {camera_id}: {reason}")]
    Launch { camera_id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// 推流进程启动参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSpec {
    pub camera_id: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// 推流进程启动器
#[async_trait]
pub trait PipeLauncher: Send + Sync {
    async fn launch(&self, spec: &PipeSpec) -> Result<Box<dyn FramePipe>, SinkError>;
}

/// 单向字节管道（进程标准输入）
#[async_trait]
pub trait FramePipe: Send {
    /// 写入并 flush 一帧原始像素
    async fn write_frame(&mut self, pixels: &[u8]) -> io::Result<()>;

    /// 关闭输入并请求进程退出
    async fn shutdown(&mut self);
}

/// 丢弃所有帧的启动器（推流关闭时使用）
pub struct DiscardLauncher;

#[async_trait]
impl PipeLauncher for DiscardLauncher {
    async fn launch(&self, _spec: &PipeSpec) -> Result<Box<dyn FramePipe>, SinkError> {
        Ok(Box::new(DiscardPipe))
    }
}

struct DiscardPipe;

#[async_trait]
impl FramePipe for DiscardPipe {
    async fn write_frame(&mut self, _pixels: &[u8]) -> io::Result<()> {
        Ok(())
    }

    async fn shutdown(&mut self) {}
}

/// 单路摄像头的推流进程（由对应 worker 独占）
pub struct SinkProcess {
    camera_id: String,
    launcher: Arc<dyn PipeLauncher>,
    pipe: Option<Box<dyn FramePipe>>,
    width: u32,
    height: u32,
    frame_rate: u32,
    restarts: u64,
}

impl SinkProcess {
    pub fn new(camera_id: impl Into<String>, launcher: Arc<dyn PipeLauncher>, frame_rate: u32) -> Self {
        Self {
            camera_id: camera_id.into(),
            launcher,
            pipe: None,
            width: 0,
            height: 0,
            frame_rate,
            restarts: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.pipe.is_some()
    }

    /// 当前进程配置的分辨率
    pub fn geometry(&self) -> Option<(u32, u32)> {
        self.pipe.as_ref().map(|_| (self.width, self.height))
    }

    /// 因分辨率变化或断管导致的重启次数
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// 写入一帧；失败只返回 false，下一帧会重新走懒启动
    pub async fn write(&mut self, frame: &Frame) -> bool {
        let (width, height) = frame.geometry();

        if self.pipe.is_none() {
            info!(
                camera_id = %self.camera_id,
                width, height,
                "Starting sink process on first frame"
            );
            if !self.start(width, height).await {
                return false;
            }
        } else if (width, height) != (self.width, self.height) {
            info!(
                camera_id = %self.camera_id,
                from = %format!("{}x{}", self.width, self.height),
                to = %format!("{}x{}", width, height),
                "Frame geometry changed, restarting sink process"
            );
            self.stop().await;
            self.restarts += 1;
            if !self.start(width, height).await {
                return false;
            }
        }

        let Some(pipe) = self.pipe.as_mut() else {
            return false;
        };
        match pipe.write_frame(&frame.pixels).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                warn!(
                    camera_id = %self.camera_id,
                    "Broken pipe when writing frame, restarting sink process"
                );
                self.stop().await;
                self.restarts += 1;
                if !self.start(width, height).await {
                    return false;
                }
                self.write_once_more(frame).await
            }
            Err(e) => {
                error!(camera_id = %self.camera_id, error = %e, "Failed to write frame to sink");
                self.stop().await;
                false
            }
        }
    }

    /// 关闭输入并结束进程；可重复调用
    pub async fn stop(&mut self) {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.shutdown().await;
            debug!(camera_id = %self.camera_id, "Sink process stopped");
        }
    }

    async fn start(&mut self, width: u32, height: u32) -> bool {
        let spec = PipeSpec {
            camera_id: self.camera_id.clone(),
            width,
            height,
            frame_rate: self.frame_rate,
        };
        match self.launcher.launch(&spec).await {
            Ok(pipe) => {
                self.pipe = Some(pipe);
                self.width = width;
                self.height = height;
                true
            }
            Err(e) => {
                error!(camera_id = %self.camera_id, error = %e, "Sink process failed to start");
                false
            }
        }
    }

    async fn write_once_more(&mut self, frame: &Frame) -> bool {
        let Some(pipe) = self.pipe.as_mut() else {
            return false;
        };
        match pipe.write_frame(&frame.pixels).await {
            Ok(()) => true,
            Err(e) => {
                error!(camera_id = %self.camera_id, error = %e, "Retry write failed");
                self.stop().await;
                false
            }
        }
    }
}
