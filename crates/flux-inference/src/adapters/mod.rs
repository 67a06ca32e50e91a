// 可降级外部适配器：失败只返回 false，从不向 worker 传播错误
mod alert;
mod entity;
mod store;

pub use alert::MqttAlertBus;
pub use entity::detection;
pub use store::SqlDetectionStore;

use crate::frame::Detection;
use async_trait::async_trait;

/// 告警总线
#[async_trait]
pub trait AlertBus: Send + Sync {
    /// 发布一帧的全部检测结果；返回是否已交给总线
    async fn publish(&self, camera_id: &str, detections: &[Detection]) -> bool;

    async fn close(&self) {}
}

/// 检测记录存储
#[async_trait]
pub trait DetectionStore: Send + Sync {
    /// 记录单个检测结果
    async fn record(&self, camera_id: &str, frame_sequence: u64, detection: &Detection) -> bool;

    async fn close(&self) {}
}

/// 告警关闭或不可用时的占位实现
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAlertBus;

#[async_trait]
impl AlertBus for NullAlertBus {
    async fn publish(&self, _camera_id: &str, _detections: &[Detection]) -> bool {
        false
    }
}

/// 持久化关闭或不可用时的占位实现
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetectionStore;

#[async_trait]
impl DetectionStore for NullDetectionStore {
    async fn record(&self, _camera_id: &str, _frame_sequence: u64, _detection: &Detection) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoundingBox;

    #[tokio::test]
    async fn test_null_adapters_report_not_delivered() {
        let det = Detection::new("person", 0.9, BoundingBox::new(0.5, 0.5, 0.1, 0.1));

        assert!(!NullAlertBus.publish("cam01", &[det.clone()]).await);
        assert!(!NullDetectionStore.record("cam01", 1, &det).await);

        NullAlertBus.close().await;
        NullDetectionStore.close().await;
    }
}
