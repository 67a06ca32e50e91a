use std::fmt;

/// 摄像头标识（配置期创建，之后只读）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CameraIdentity {
    pub id: String,
    pub source_address: String,
}

impl CameraIdentity {
    pub fn new(id: impl Into<String>, source_address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_address: source_address.into(),
        }
    }

    /// 按序号生成标识，例如 index=0 -> "cam01"
    pub fn camera_id_for(index: usize) -> String {
        format!("cam{:02}", index + 1)
    }
}

impl fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.source_address)
    }
}
