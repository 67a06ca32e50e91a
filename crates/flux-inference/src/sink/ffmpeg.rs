use super::{FramePipe, PipeLauncher, PipeSpec, SinkError};
use crate::config::SinkConfig;
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

const EXIT_GRACE: Duration = Duration::from_secs(2);

/// ffmpeg 推流启动器：stdin 读入 BGR24 原始帧，编码后推到 RTSP 服务器
pub struct FfmpegPipeLauncher {
    ffmpeg_path: String,
    host: String,
    port: u16,
    write_timeout: Duration,
}

impl FfmpegPipeLauncher {
    pub fn new(config: &SinkConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            host: config.host.clone(),
            port: config.port,
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        }
    }

    /// 推流目标地址
    pub fn target_url(&self, camera_id: &str) -> String {
        format!("rtsp://{}:{}/{}_proc", self.host, self.port, camera_id)
    }

    fn build_args(&self, spec: &PipeSpec) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |a: &str| args.push(a.to_string());

        push("-hide_banner");
        push("-loglevel");
        push("warning");
        push("-y");
        // 输入
        push("-f");
        push("rawvideo");
        push("-vcodec");
        push("rawvideo");
        push("-pix_fmt");
        push("bgr24");
        push("-s");
        push(&format!("{}x{}", spec.width, spec.height));
        push("-r");
        push(&spec.frame_rate.to_string());
        push("-i");
        push("-");
        // 编码
        push("-c:v");
        push("libx264");
        push("-preset");
        push("ultrafast");
        push("-tune");
        push("zerolatency");
        push("-pix_fmt");
        push("yuv420p");
        push("-g");
        push("30");
        push("-b:v");
        push("1M");
        push("-maxrate");
        push("1M");
        push("-bufsize");
        push("2M");
        // 输出
        push("-f");
        push("rtsp");
        push("-rtsp_transport");
        push("tcp");
        push(&self.target_url(&spec.camera_id));
        args
    }
}

#[async_trait]
impl PipeLauncher for FfmpegPipeLauncher {
    async fn launch(&self, spec: &PipeSpec) -> Result<Box<dyn FramePipe>, SinkError> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(self.build_args(spec))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SinkError::Launch {
            camera_id: spec.camera_id.clone(),
            reason: format!("failed to spawn ffmpeg: {}", e),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| SinkError::Launch {
            camera_id: spec.camera_id.clone(),
            reason: "failed to capture ffmpeg stdin".to_string(),
        })?;

        // 转发编码器日志
        if let Some(stderr) = child.stderr.take() {
            let camera_id = spec.camera_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(camera_id = %camera_id, "ffmpeg: {}", line);
                }
            });
        }

        info!(
            camera_id = %spec.camera_id,
            target = %self.target_url(&spec.camera_id),
            width = spec.width,
            height = spec.height,
            fps = spec.frame_rate,
            "Sink process started"
        );

        Ok(Box::new(FfmpegPipe {
            camera_id: spec.camera_id.clone(),
            child,
            stdin: Some(stdin),
            write_timeout: self.write_timeout,
        }))
    }
}

struct FfmpegPipe {
    camera_id: String,
    child: Child,
    stdin: Option<ChildStdin>,
    write_timeout: Duration,
}

#[async_trait]
impl FramePipe for FfmpegPipe {
    async fn write_frame(&mut self, pixels: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sink stdin closed"))?;

        let write = async {
            stdin.write_all(pixels).await?;
            stdin.flush().await
        };
        match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("sink write timed out after {:?}", self.write_timeout),
            )),
        }
    }

    async fn shutdown(&mut self) {
        // 关闭 stdin 让编码器自行收尾
        drop(self.stdin.take());

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(camera_id = %self.camera_id, ?status, "Sink process exited"),
            Ok(Err(e)) => warn!(camera_id = %self.camera_id, error = %e, "Failed to wait for sink process"),
            Err(_) => {
                warn!(camera_id = %self.camera_id, "Sink process did not exit in time, killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher() -> FfmpegPipeLauncher {
        FfmpegPipeLauncher::new(&SinkConfig {
            host: "media".to_string(),
            port: 8554,
            ..SinkConfig::default()
        })
    }

    #[test]
    fn test_target_url() {
        assert_eq!(launcher().target_url("cam03"), "rtsp://media:8554/cam03_proc");
    }

    #[test]
    fn test_build_args_carry_geometry_and_rate() {
        let spec = PipeSpec {
            camera_id: "cam01".to_string(),
            width: 640,
            height: 360,
            frame_rate: 15,
        };
        let args = launcher().build_args(&spec);

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-s") + 1], "640x360");
        assert_eq!(args[pos("-r") + 1], "15");
        assert_eq!(args[pos("-c:v") + 1], "libx264");
        assert_eq!(args.last().unwrap(), "rtsp://media:8554/cam01_proc");
    }

    #[tokio::test]
    async fn test_launch_fails_for_missing_binary() {
        let launcher = FfmpegPipeLauncher::new(&SinkConfig {
            ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
            ..SinkConfig::default()
        });
        let spec = PipeSpec {
            camera_id: "cam01".to_string(),
            width: 2,
            height: 2,
            frame_rate: 15,
        };

        assert!(matches!(
            launcher.launch(&spec).await,
            Err(SinkError::Launch { .. })
        ));
    }
}
