use super::AlertBus;
use crate::config::MqttConfig;
use crate::error::{InferenceError, Result};
use crate::frame::Detection;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// MQTT 告警总线
///
/// 事件循环在后台任务中运行并维护连接状态；Broker 不可达时
/// `publish` 直接返回 false，不阻塞摄像头循环。
pub struct MqttAlertBus {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    topic_prefix: String,
    qos: QoS,
}

#[derive(Serialize)]
struct AlertPayload<'a> {
    camera_id: &'a str,
    timestamp: i64,
    detections: Vec<AlertDetection<'a>>,
}

#[derive(Serialize)]
struct AlertDetection<'a> {
    label: &'a str,
    confidence: f32,
    bbox: [f32; 4],
}

impl MqttAlertBus {
    pub fn connect(config: &MqttConfig) -> Result<Self> {
        if config.client_id.trim().is_empty() || config.client_id.starts_with(' ') {
            return Err(InferenceError::Mqtt(format!(
                "invalid MQTT client id {:?}",
                config.client_id
            )));
        }
        let qos = qos_from_level(config.qos)?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, &config.broker, config.port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            mqtt_options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 64);

        let connected = Arc::new(AtomicBool::new(false));
        let connected_clone = connected.clone();
        let event_task = tokio::spawn(async move {
            Self::handle_events(&mut eventloop, connected_clone).await;
        });

        info!(
            broker = %format!("{}:{}", config.broker, config.port),
            client_id = %config.client_id,
            "MQTT alert bus created"
        );

        Ok(Self {
            client,
            connected,
            event_task: Mutex::new(Some(event_task)),
            topic_prefix: config.topic_prefix.clone(),
            qos,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn handle_events(eventloop: &mut EventLoop, connected: Arc<AtomicBool>) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if !connected.swap(true, Ordering::SeqCst) {
                        info!("Connected to MQTT broker");
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    connected.store(false, Ordering::SeqCst);
                    warn!("MQTT broker closed the connection");
                }
                Ok(Event::Incoming(packet)) => {
                    debug!(?packet, "Received MQTT packet");
                }
                Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    connected.store(false, Ordering::SeqCst);
                    error!(error = %e, "MQTT connection error");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    fn topic(&self, camera_id: &str) -> String {
        format!("{}/{}/detections", self.topic_prefix, camera_id)
    }
}

fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(InferenceError::Mqtt(format!("invalid QoS level {}", other))),
    }
}

fn build_payload(camera_id: &str, timestamp: i64, detections: &[Detection]) -> serde_json::Result<Vec<u8>> {
    let payload = AlertPayload {
        camera_id,
        timestamp,
        detections: detections
            .iter()
            .map(|d| AlertDetection {
                label: &d.label,
                confidence: d.confidence,
                bbox: d.bbox.to_array(),
            })
            .collect(),
    };
    serde_json::to_vec(&payload)
}

#[async_trait]
impl AlertBus for MqttAlertBus {
    async fn publish(&self, camera_id: &str, detections: &[Detection]) -> bool {
        if !self.is_connected() {
            warn!(camera_id = %camera_id, "MQTT not connected, alert dropped");
            return false;
        }

        let payload = match build_payload(camera_id, chrono::Utc::now().timestamp_millis(), detections) {
            Ok(payload) => payload,
            Err(e) => {
                error!(camera_id = %camera_id, error = %e, "Failed to serialize alert");
                return false;
            }
        };

        match self.client.try_publish(self.topic(camera_id), self.qos, false, payload) {
            Ok(()) => {
                debug!(camera_id = %camera_id, count = detections.len(), "Alert published");
                true
            }
            Err(e) => {
                warn!(camera_id = %camera_id, error = %e, "Failed to publish alert");
                false
            }
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "MQTT disconnect request not delivered");
        }
        let task = match self.event_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            task.abort();
            info!("MQTT alert bus closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoundingBox;

    fn unreachable_config() -> MqttConfig {
        MqttConfig {
            broker: "127.0.0.1".to_string(),
            port: 1,
            ..MqttConfig::default()
        }
    }

    #[test]
    fn test_payload_shape() {
        let det = Detection::new("person", 0.75, BoundingBox::new(0.5, 0.25, 0.1, 0.2));
        let bytes = build_payload("cam02", 1_700_000_000_000, &[det]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["camera_id"], "cam02");
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
        assert_eq!(value["detections"][0]["label"], "person");
        assert_eq!(value["detections"][0]["bbox"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_qos_levels() {
        assert_eq!(qos_from_level(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_level(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_level(3).is_err());
    }

    #[tokio::test]
    async fn test_publish_without_broker_soft_fails() {
        let bus = MqttAlertBus::connect(&unreachable_config()).unwrap();
        let det = Detection::new("car", 0.6, BoundingBox::new(0.5, 0.5, 0.2, 0.2));

        assert!(!bus.publish("cam01", &[det]).await);
        assert_eq!(bus.topic("cam01"), "cameras/cam01/detections");

        bus.close().await;
        bus.close().await;
    }

    #[tokio::test]
    async fn test_rejects_empty_client_id() {
        let config = MqttConfig {
            client_id: String::new(),
            ..unreachable_config()
        };
        assert!(MqttAlertBus::connect(&config).is_err());
    }
}
