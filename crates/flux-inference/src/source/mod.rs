// 上游视频源：连接 / 读帧 / 重连 / 禁用 状态机
mod ffmpeg;

pub use ffmpeg::FfmpegVideoSource;

use crate::camera::CameraIdentity;
use crate::frame::Frame;
use crate::shutdown::StopListener;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open video source {address:?}: {reason}")]
    Open { address: String, reason: String },

    #[error("frame read failed: {0}")]
    Read(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 视频源工厂：按地址打开一路流
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn open(&self, address: &str) -> Result<Box<dyn VideoHandle>, SourceError>;
}

/// 已打开的视频流句柄
#[async_trait]
pub trait VideoHandle: Send {
    /// 读取下一帧像素；`Ok(None)` 表示流结束
    async fn read_frame(&mut self) -> Result<Option<RawPicture>, SourceError>;

    async fn close(&mut self);
}

/// 句柄返回的原始画面（尚未编号）
#[derive(Debug, Clone)]
pub struct RawPicture {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// 终态，不再重连
    Disabled,
}

/// 单路摄像头的源连接（由对应 worker 独占）
pub struct SourceConnection {
    identity: Arc<CameraIdentity>,
    source: Arc<dyn VideoSource>,
    handle: Option<Box<dyn VideoHandle>>,
    state: ConnectionState,
    consecutive_failures: u32,
    max_failures: u32,
    retry_interval: Duration,
    frames_read: u64,
    release: StopListener,
}

impl SourceConnection {
    /// `release` 触发后，下一次 `read()` 会释放资源并进入 Disabled
    pub fn new(
        identity: Arc<CameraIdentity>,
        source: Arc<dyn VideoSource>,
        max_failures: u32,
        retry_interval: Duration,
        release: StopListener,
    ) -> Self {
        Self {
            identity,
            source,
            handle: None,
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
            retry_interval,
            frames_read: 0,
            release,
        }
    }

    pub fn identity(&self) -> &CameraIdentity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_disabled(&self) -> bool {
        self.state == ConnectionState::Disabled
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// 尝试打开上游源
    pub async fn connect(&mut self) {
        if self.is_disabled() {
            return;
        }

        self.state = ConnectionState::Connecting;
        match self.source.open(&self.identity.source_address).await {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = ConnectionState::Connected;
                self.consecutive_failures = 0;
                info!(
                    camera_id = %self.identity.id,
                    address = %self.identity.source_address,
                    "Connected to camera"
                );
            }
            Err(e) => {
                self.consecutive_failures += 1;
                error!(
                    camera_id = %self.identity.id,
                    address = %self.identity.source_address,
                    failures = self.consecutive_failures,
                    max_failures = self.max_failures,
                    error = %e,
                    "Failed to connect to camera"
                );
                if self.consecutive_failures >= self.max_failures {
                    self.state = ConnectionState::Disabled;
                    warn!(
                        camera_id = %self.identity.id,
                        failures = self.consecutive_failures,
                        "Camera disabled after repeated connection failures"
                    );
                } else {
                    self.state = ConnectionState::Disconnected;
                }
            }
        }
    }

    /// 读取一帧；`None` 是正常的可重试结果
    pub async fn read(&mut self) -> Option<Frame> {
        if self.release.is_stopped() && !self.is_disabled() {
            self.release().await;
        }
        if self.is_disabled() {
            return None;
        }

        if self.state != ConnectionState::Connected {
            self.connect().await;
            if self.state != ConnectionState::Connected {
                if !self.is_disabled() {
                    self.release.sleep(self.retry_interval).await;
                }
                return None;
            }
        }

        let handle = self.handle.as_mut()?;
        match handle.read_frame().await {
            Ok(Some(picture)) => {
                self.frames_read += 1;
                Some(Frame::new(
                    picture.pixels,
                    picture.width,
                    picture.height,
                    self.frames_read,
                ))
            }
            Ok(None) => {
                warn!(camera_id = %self.identity.id, "Video stream ended, reconnecting...");
                self.drop_handle().await;
                None
            }
            Err(e) => {
                warn!(camera_id = %self.identity.id, error = %e, "Failed to read frame, reconnecting...");
                self.drop_handle().await;
                None
            }
        }
    }

    /// 释放资源并强制进入 Disabled
    pub async fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close().await;
        }
        if !self.is_disabled() {
            info!(camera_id = %self.identity.id, "Camera source released");
        }
        self.state = ConnectionState::Disabled;
    }

    async fn drop_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close().await;
        }
        self.state = ConnectionState::Disconnected;
    }
}
