//! 快照存储抽象：put / 按时间倒序读取 / 删除
//!
//! 存储引擎对编排器不透明；失败由持久化协调器记录日志后忽略。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{ProjectId, ProjectSnapshot};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// 项目快照存储：按 projectId 覆盖写，按时间戳索引
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 写入（同一 projectId 覆盖旧记录）
    async fn put(&self, snapshot: &ProjectSnapshot) -> Result<(), StoreError>;

    /// 所有快照，按 timestamp 从新到旧
    async fn get_all_desc(&self) -> Result<Vec<ProjectSnapshot>, StoreError>;

    async fn delete(&self, project_id: &ProjectId) -> Result<(), StoreError>;
}
