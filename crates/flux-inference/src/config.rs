use crate::camera::CameraIdentity;
use crate::error::{InferenceError, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 环境变量前缀，例如 FLUX_INFER_CAMERAS__COUNT=3
pub const ENV_PREFIX: &str = "FLUX_INFER";

/// 服务配置（启动时加载一次，之后只读）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub cameras: CamerasConfig,
    pub inference: InferenceConfig,
    pub sink: SinkConfig,
    pub source: SourceConfig,
    pub mqtt: MqttConfig,
    pub database: DatabaseConfig,
    pub service: RuntimeConfig,
}

/// 摄像头配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CamerasConfig {
    pub count: usize,
    pub source_urls: Vec<String>,
    /// 地址不足时的模板，`{index:02}` 替换为从 1 开始的两位序号
    pub default_url_template: String,
    pub max_retries: u32,
    pub retry_interval_secs: u64,
    pub reconnect_interval_secs: u64,
}

impl Default for CamerasConfig {
    fn default() -> Self {
        Self {
            count: 6,
            source_urls: vec!["rtsp://localhost:8554/cam01".to_string()],
            default_url_template: "rtsp://rtsp-server:8554/cam{index:02}".to_string(),
            max_retries: 6,
            retry_interval_secs: 5,
            reconnect_interval_secs: 5,
        }
    }
}

/// 推理节奏配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub frame_skip: u32,
    pub interval_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            frame_skip: 1,
            interval_ms: 100,
            error_backoff_ms: 1000,
        }
    }
}

/// 下游推流配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub frame_rate: u32,
    pub ffmpeg_path: String,
    pub write_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "rtsp-server".to_string(),
            port: 8554,
            frame_rate: 15,
            ffmpeg_path: "ffmpeg".to_string(),
            write_timeout_ms: 2000,
        }
    }
}

/// 上游解码配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub probe_timeout_secs: u64,
    pub rtsp_transport: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            probe_timeout_secs: 10,
            rtsp_transport: "tcp".to_string(),
        }
    }
}

/// MQTT 告警配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub topic_prefix: String,
    pub qos: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            broker: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: "yolo_inference_service".to_string(),
            topic_prefix: "cameras".to_string(),
            qos: 1,
        }
    }
}

/// 检测记录数据库配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub url: String,
    pub reconnect_interval_secs: u64,
    /// 单次建连（含建表）的上限
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "mysql://root@localhost:3307/yolo_detections".to_string(),
            reconnect_interval_secs: 10,
            connect_timeout_secs: 10,
        }
    }
}

/// 运行时配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub drain_timeout_secs: u64,
    pub stats_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
            stats_interval_secs: 30,
        }
    }
}

impl ServiceConfig {
    /// 展开摄像头列表：地址不足按模板补齐，多余截断
    pub fn camera_identities(&self) -> Vec<CameraIdentity> {
        let mut urls: Vec<String> = self
            .cameras
            .source_urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();

        for idx in urls.len()..self.cameras.count {
            urls.push(self.templated_url(idx));
        }
        urls.truncate(self.cameras.count);

        urls.into_iter()
            .enumerate()
            .map(|(idx, url)| CameraIdentity::new(CameraIdentity::camera_id_for(idx), url))
            .collect()
    }

    fn templated_url(&self, idx: usize) -> String {
        self.cameras
            .default_url_template
            .replace("{index:02}", &format!("{:02}", idx + 1))
            .replace("{index}", &(idx + 1).to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cameras.count == 0 {
            return Err(InferenceError::Config(
                "cameras.count must be greater than 0".to_string(),
            ));
        }
        if self.cameras.max_retries == 0 {
            return Err(InferenceError::Config(
                "cameras.max_retries must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.qos > 2 {
            return Err(InferenceError::Config(format!(
                "mqtt.qos must be 0, 1 or 2, got {}",
                self.mqtt.qos
            )));
        }
        if self.sink.frame_rate == 0 {
            return Err(InferenceError::Config(
                "sink.frame_rate must be greater than 0".to_string(),
            ));
        }
        if self.sink.enabled && self.sink.host.trim().is_empty() {
            return Err(InferenceError::Config("sink.host must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.cameras.retry_interval_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.cameras.reconnect_interval_secs)
    }

    pub fn inference_interval(&self) -> Duration {
        Duration::from_millis(self.inference.interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.inference.error_backoff_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.service.drain_timeout_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.service.stats_interval_secs)
    }
}

/// 配置加载器
pub struct ConfigLoader {
    config_path: PathBuf,
    use_env: bool,
}

impl ConfigLoader {
    pub fn new<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            use_env: true,
        }
    }

    /// 不读取环境变量（用于测试）
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    /// 加载配置：文件（可选）+ 环境变量覆盖，然后校验
    pub fn load(&self) -> Result<ServiceConfig> {
        let path = self
            .config_path
            .to_str()
            .ok_or_else(|| InferenceError::Config("Invalid config path".to_string()))?;

        let mut builder =
            Config::builder().add_source(File::new(path, FileFormat::Toml).required(false));

        if self.use_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cameras.source_urls")
                    .try_parsing(true),
            );
        }

        let config: ServiceConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ConfigLoader::new(dir.path().join("absent.toml"))
            .without_env()
            .load()
            .unwrap();

        assert_eq!(config.cameras.count, 6);
        assert_eq!(config.cameras.max_retries, 6);
        assert_eq!(config.inference.frame_skip, 1);
        assert_eq!(config.sink.frame_rate, 15);
        assert!(!config.database.enabled);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inferd.toml");
        fs::write(
            &path,
            r#"
[cameras]
count = 3
source_urls = ["rtsp://10.0.0.5/a", "rtsp://10.0.0.6/b"]
max_retries = 3

[inference]
frame_skip = 4

[mqtt]
enabled = false
"#,
        )
        .unwrap();

        let config = ConfigLoader::new(&path).without_env().load().unwrap();
        assert_eq!(config.cameras.count, 3);
        assert_eq!(config.cameras.max_retries, 3);
        assert_eq!(config.inference.frame_skip, 4);
        assert!(!config.mqtt.enabled);
        // 未配置的字段保持默认
        assert_eq!(config.cameras.retry_interval_secs, 5);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inferd.toml");
        fs::write(&path, "[cameras]\ncount = 6\n").unwrap();

        // 其余测试均不读取环境变量
        std::env::set_var("FLUX_INFER_CAMERAS__COUNT", "3");
        std::env::set_var("FLUX_INFER_CAMERAS__SOURCE_URLS", "rtsp://a/1,rtsp://b/2");
        std::env::set_var("FLUX_INFER_MQTT__TOPIC_PREFIX", "plant7");
        let loaded = ConfigLoader::new(&path).load();
        std::env::remove_var("FLUX_INFER_CAMERAS__COUNT");
        std::env::remove_var("FLUX_INFER_CAMERAS__SOURCE_URLS");
        std::env::remove_var("FLUX_INFER_MQTT__TOPIC_PREFIX");

        let config = loaded.unwrap();
        assert_eq!(config.cameras.count, 3);
        assert_eq!(
            config.cameras.source_urls,
            vec!["rtsp://a/1".to_string(), "rtsp://b/2".to_string()]
        );
        assert_eq!(config.mqtt.topic_prefix, "plant7");

        let cameras = config.camera_identities();
        assert_eq!(cameras.len(), 3);
        assert_eq!(cameras[1].source_address, "rtsp://b/2");
        assert_eq!(cameras[2].source_address, "rtsp://rtsp-server:8554/cam03");
    }

    #[test]
    fn test_sample_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/inferd.toml");
        let config = ConfigLoader::new(path).without_env().load().unwrap();

        assert_eq!(config.camera_identities().len(), 6);
        assert_eq!(config.mqtt.topic_prefix, "cameras");
        assert!(config.sink.enabled);
    }

    #[test]
    fn test_camera_identities_padded_from_template() {
        let mut config = ServiceConfig::default();
        config.cameras.count = 3;
        config.cameras.source_urls = vec![" rtsp://a/1 ".to_string(), "".to_string()];

        let cameras = config.camera_identities();
        assert_eq!(cameras.len(), 3);
        assert_eq!(cameras[0], CameraIdentity::new("cam01", "rtsp://a/1"));
        assert_eq!(cameras[1].source_address, "rtsp://rtsp-server:8554/cam02");
        assert_eq!(cameras[2].id, "cam03");
    }

    #[test]
    fn test_camera_identities_truncated() {
        let mut config = ServiceConfig::default();
        config.cameras.count = 1;
        config.cameras.source_urls = vec!["rtsp://a/1".to_string(), "rtsp://b/2".to_string()];

        let cameras = config.camera_identities();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].source_address, "rtsp://a/1");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServiceConfig::default();
        config.cameras.count = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.mqtt.qos = 3;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.cameras.max_retries = 0;
        assert!(config.validate().is_err());

        assert!(ServiceConfig::default().validate().is_ok());
    }
}
