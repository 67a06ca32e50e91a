// 基于 ffprobe + ffmpeg 的视频源：探测分辨率后解码为 BGR24 原始帧
use super::{RawPicture, SourceError, VideoHandle, VideoSource};
use crate::config::SourceConfig;
use crate::frame::Frame;
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info};

/// ffmpeg 解码视频源
pub struct FfmpegVideoSource {
    ffmpeg_path: String,
    ffprobe_path: String,
    probe_timeout: Duration,
    rtsp_transport: String,
}

impl FfmpegVideoSource {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            rtsp_transport: config.rtsp_transport.clone(),
        }
    }

    fn is_rtsp(address: &str) -> bool {
        address.starts_with("rtsp://") || address.starts_with("rtsps://")
    }

    /// 探测首个视频流的分辨率
    async fn probe_geometry(&self, address: &str) -> Result<(u32, u32), SourceError> {
        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.arg("-v").arg("error");
        if Self::is_rtsp(address) {
            cmd.arg("-rtsp_transport").arg(&self.rtsp_transport);
        }
        cmd.arg("-select_streams")
            .arg("v:0")
            .arg("-show_entries")
            .arg("stream=width,height")
            .arg("-of")
            .arg("json")
            .arg(address)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.probe_timeout, cmd.output())
            .await
            .map_err(|_| SourceError::Open {
                address: address.to_string(),
                reason: format!("ffprobe timed out after {:?}", self.probe_timeout),
            })??;

        if !output.status.success() {
            return Err(SourceError::Open {
                address: address.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(&output.stdout).ok_or_else(|| SourceError::Open {
            address: address.to_string(),
            reason: "no video stream found".to_string(),
        })
    }
}

#[async_trait]
impl VideoSource for FfmpegVideoSource {
    async fn open(&self, address: &str) -> Result<Box<dyn VideoHandle>, SourceError> {
        let (width, height) = self.probe_geometry(address).await?;

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        if Self::is_rtsp(address) {
            cmd.arg("-rtsp_transport").arg(&self.rtsp_transport);
        }
        cmd.arg("-i")
            .arg(address)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SourceError::Open {
            address: address.to_string(),
            reason: format!("failed to spawn ffmpeg: {}", e),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| SourceError::Open {
            address: address.to_string(),
            reason: "failed to capture ffmpeg stdout".to_string(),
        })?;

        info!(address = %address, width, height, "ffmpeg decoder started");

        Ok(Box::new(FfmpegHandle {
            child,
            stdout,
            width,
            height,
        }))
    }
}

struct FfmpegHandle {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
}

#[async_trait]
impl VideoHandle for FfmpegHandle {
    async fn read_frame(&mut self) -> Result<Option<RawPicture>, SourceError> {
        let mut pixels = vec![0u8; Frame::byte_len(self.width, self.height)];
        match self.stdout.read_exact(&mut pixels).await {
            Ok(_) => Ok(Some(RawPicture {
                pixels,
                width: self.width,
                height: self.height,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(SourceError::Read(e.to_string())),
        }
    }

    async fn close(&mut self) {
        let _ = self.child.start_kill();
        match self.child.wait().await {
            Ok(status) => debug!(?status, "ffmpeg decoder exited"),
            Err(e) => debug!(error = %e, "Failed to reap ffmpeg decoder"),
        }
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
}

fn parse_probe_output(stdout: &[u8]) -> Option<(u32, u32)> {
    let probe: ProbeOutput = serde_json::from_slice(stdout).ok()?;
    probe
        .streams
        .into_iter()
        .find_map(|s| match (s.width, s.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{"programs": [], "streams": [{"width": 1280, "height": 720}]}"#;
        assert_eq!(parse_probe_output(json), Some((1280, 720)));
    }

    #[test]
    fn test_parse_probe_output_without_video() {
        assert_eq!(parse_probe_output(br#"{"streams": []}"#), None);
        assert_eq!(parse_probe_output(br#"{}"#), None);
        assert_eq!(parse_probe_output(b"not json"), None);
    }

    #[tokio::test]
    async fn test_open_fails_when_probe_binary_missing() {
        let source = FfmpegVideoSource::new(&SourceConfig {
            ffprobe_path: "/nonexistent/ffprobe".to_string(),
            ..SourceConfig::default()
        });

        let result = source.open("rtsp://127.0.0.1:1/none").await;
        assert!(result.is_err());
    }
}
