use super::entity::detection;
use super::DetectionStore;
use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::frame::Detection;
use async_trait::async_trait;
use sea_orm::{
    ActiveValue::NotSet, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, Schema, Set,
};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 基于 sea-orm 的检测记录存储（MySQL / SQLite）
///
/// 写入失败时丢弃连接，之后按 `reconnect_interval` 节流懒重连。
/// 重连在锁外进行，期间其他摄像头的写入直接返回 false。
pub struct SqlDetectionStore {
    url: String,
    reconnect_interval: Duration,
    connect_timeout: Duration,
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    db: Option<DatabaseConnection>,
    /// 上一次重连结束的时间
    last_attempt: Option<Instant>,
    reconnecting: bool,
    closed: bool,
}

impl SqlDetectionStore {
    /// 连接数据库并确保表存在
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let store = Self::disconnected(config);
        let db = open_database(&store.url, store.connect_timeout).await?;

        info!(database_url = %redact(&config.url), "Connected to detection database");

        store.state.lock().await.db = Some(db);
        Ok(store)
    }

    fn disconnected(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            reconnect_interval: Duration::from_secs(config.reconnect_interval_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            state: Mutex::new(StoreState::default()),
        }
    }

    /// 当前可用连接；断开时按节流间隔尝试重连
    async fn connection(&self) -> Option<DatabaseConnection> {
        {
            let mut state = self.state.lock().await;
            if state.closed || state.reconnecting {
                return None;
            }
            if let Some(db) = &state.db {
                return Some(db.clone());
            }
            if let Some(last) = state.last_attempt {
                if last.elapsed() < self.reconnect_interval {
                    return None;
                }
            }
            state.reconnecting = true;
        }

        let result = open_database(&self.url, self.connect_timeout).await;

        let mut state = self.state.lock().await;
        state.reconnecting = false;
        state.last_attempt = Some(Instant::now());
        match result {
            Ok(db) if state.closed => {
                drop(state);
                let _ = db.close().await;
                None
            }
            Ok(db) => {
                info!("Reconnected to detection database");
                state.db = Some(db.clone());
                Some(db)
            }
            Err(e) => {
                warn!(error = %e, "Detection database reconnect failed");
                None
            }
        }
    }

    async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.db = None;
        state.last_attempt = Some(Instant::now());
    }
}

async fn open_database(url: &str, connect_timeout: Duration) -> std::result::Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(url.to_string());
    options
        .connect_timeout(connect_timeout)
        .acquire_timeout(connect_timeout)
        .sqlx_logging(false);

    let open = async {
        let db = Database::connect(options).await?;
        ensure_table(&db).await?;
        Ok(db)
    };
    match tokio::time::timeout(connect_timeout, open).await {
        Ok(result) => result,
        Err(_) => Err(DbErr::Custom(format!(
            "connect timed out after {:?}",
            connect_timeout
        ))),
    }
}

async fn ensure_table(db: &DatabaseConnection) -> std::result::Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let mut stmt = schema.create_table_from_entity(detection::Entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await?;
    Ok(())
}

/// 日志中隐藏连接串里的密码
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let credentials = &url[scheme_end + 3..at];
            match credentials.split_once(':') {
                Some((user, _)) => format!("{}{}:***{}", &url[..scheme_end + 3], user, &url[at..]),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}

#[async_trait]
impl DetectionStore for SqlDetectionStore {
    async fn record(&self, camera_id: &str, frame_sequence: u64, detection: &Detection) -> bool {
        let Some(db) = self.connection().await else {
            return false;
        };

        let model = detection::ActiveModel {
            id: NotSet,
            camera_id: Set(camera_id.to_string()),
            timestamp: Set(chrono::Utc::now().timestamp_millis()),
            frame_seq: Set(i64::try_from(frame_sequence).unwrap_or(i64::MAX)),
            label: Set(detection.label.clone()),
            confidence: Set(detection.confidence),
            bbox_x_center: Set(detection.bbox.x_center),
            bbox_y_center: Set(detection.bbox.y_center),
            bbox_width: Set(detection.bbox.width),
            bbox_height: Set(detection.bbox.height),
        };

        match detection::Entity::insert(model).exec(&db).await {
            Ok(_) => {
                debug!(camera_id = %camera_id, frame = frame_sequence, label = %detection.label, "Detection recorded");
                true
            }
            Err(e) => {
                warn!(camera_id = %camera_id, error = %e, "Failed to record detection, dropping connection");
                self.invalidate().await;
                false
            }
        }
    }

    async fn close(&self) {
        let db = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.db.take()
        };
        if let Some(db) = db {
            match db.close().await {
                Ok(()) => info!("Detection database closed"),
                Err(e) => warn!(error = %e, "Failed to close detection database"),
            }
        }
    }
}
