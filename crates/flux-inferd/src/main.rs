use clap::{Parser, ValueEnum};
use flux_inference::shutdown::wait_for_system_signal;
use flux_inference::{
    AlertBus, ConfigLoader, DetectionStore, DiscardLauncher, FfmpegPipeLauncher, FfmpegVideoSource,
    MqttAlertBus, NullAlertBus, NullDetectionStore, NullDetector, Orchestrator, PipeLauncher,
    ServiceConfig, SqlDetectionStore, WorkerExit,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "FLUX multi-camera inference daemon")]
struct Args {
    /// 配置文件路径（不存在时使用默认值）
    #[arg(long, default_value = "./config/inferd.toml")]
    config: PathBuf,

    /// 日志过滤器，RUST_LOG 优先
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// 覆盖配置中的摄像头数量
    #[arg(long)]
    camera_count: Option<usize>,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match args.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(args: &Args) -> anyhow::Result<ServiceConfig> {
    let mut config = ConfigLoader::new(&args.config).load()?;
    if let Some(count) = args.camera_count {
        config.cameras.count = count;
        config.validate()?;
    }
    Ok(config)
}

/// 告警总线：关闭或创建失败时降级为空实现
fn build_alert_bus(config: &ServiceConfig) -> Arc<dyn AlertBus> {
    if !config.mqtt.enabled {
        info!("MQTT alerts disabled");
        return Arc::new(NullAlertBus);
    }
    match MqttAlertBus::connect(&config.mqtt) {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            warn!(error = %e, "MQTT alert bus unavailable, alerts disabled");
            Arc::new(NullAlertBus)
        }
    }
}

/// 检测记录存储：关闭或连接失败时降级为空实现
async fn build_detection_store(config: &ServiceConfig) -> Arc<dyn DetectionStore> {
    if !config.database.enabled {
        info!("Detection persistence disabled");
        return Arc::new(NullDetectionStore);
    }
    match SqlDetectionStore::connect(&config.database).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "Detection database unavailable, persistence disabled");
            Arc::new(NullDetectionStore)
        }
    }
}

fn build_launcher(config: &ServiceConfig) -> Arc<dyn PipeLauncher> {
    if config.sink.enabled {
        Arc::new(FfmpegPipeLauncher::new(&config.sink))
    } else {
        info!("Sink streaming disabled, processed frames are discarded");
        Arc::new(DiscardLauncher)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = Arc::new(load_config(&args)?);
    info!(
        config = %args.config.display(),
        cameras = config.cameras.count,
        frame_skip = config.inference.frame_skip,
        "Starting inference service"
    );

    let alerts = build_alert_bus(&config);
    let store = build_detection_store(&config).await;

    warn!("No detection model configured, running with the null detector");

    let mut orchestrator = Orchestrator::builder()
        .with_config(&config)
        .with_video_source(Arc::new(FfmpegVideoSource::new(&config.source)))
        .with_pipe_launcher(build_launcher(&config))
        .with_detector(Arc::new(NullDetector))
        .with_alert_bus(alerts)
        .with_detection_store(store)
        .build()?;

    orchestrator.start()?;
    info!(cameras = ?orchestrator.camera_ids(), "Inference service started");

    tokio::select! {
        signal = wait_for_system_signal() => {
            let signal = signal?;
            info!(?signal, "Shutdown requested");
        }
        _ = orchestrator.wait_idle() => {
            warn!("All cameras disabled, shutting down");
        }
    }

    let report = orchestrator.stop().await;
    for (camera_id, exit) in &report.exits {
        if *exit != WorkerExit::Stopped {
            info!(camera_id = %camera_id, exit = ?exit, "Camera exit");
        }
    }
    info!(elapsed = ?report.elapsed, "Inference service stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["flux-inferd"]).unwrap();
        assert_eq!(args.config, PathBuf::from("./config/inferd.toml"));
        assert_eq!(args.log_format, LogFormat::Text);
        assert_eq!(args.camera_count, None);
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::try_parse_from([
            "flux-inferd",
            "--config",
            "/etc/flux/inferd.toml",
            "--log-format",
            "json",
            "--camera-count",
            "3",
        ])
        .unwrap();
        assert_eq!(args.log_format, LogFormat::Json);
        assert_eq!(args.camera_count, Some(3));
    }

    #[test]
    fn test_camera_count_override_is_validated() {
        let dir = std::env::temp_dir().join("flux-inferd-missing-config.toml");
        let args = Args::try_parse_from([
            "flux-inferd",
            "--config",
            dir.to_str().unwrap(),
            "--camera-count",
            "0",
        ])
        .unwrap();
        assert!(load_config(&args).is_err());
    }
}
