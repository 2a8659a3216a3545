//! SQLite 快照存储（rusqlite，同步连接放在 spawn_blocking 中执行）
//!
//! 表 project_snapshots：project_id 主键（覆盖写），timestamp 建索引用于按时间倒序读取，
//! body 为快照 JSON。读取时无法解码的行记录警告后跳过。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::core::{ProjectId, ProjectSnapshot};
use crate::store::{SnapshotStore, StoreError};

#[derive(Clone)]
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS project_snapshots (
                project_id TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON project_snapshots(timestamp DESC);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程池中使用连接
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("storage task failed: {e}")))?
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn put(&self, snapshot: &ProjectSnapshot) -> Result<(), StoreError> {
        let id = snapshot.project_id().to_string();
        let ts = snapshot.timestamp.timestamp_millis();
        let body = serde_json::to_string(snapshot)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO project_snapshots (project_id, timestamp, body) VALUES (?1, ?2, ?3)",
                params![id, ts, body],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_all_desc(&self) -> Result<Vec<ProjectSnapshot>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT project_id, body FROM project_snapshots ORDER BY timestamp DESC, project_id ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut snapshots = Vec::new();
            for row in rows {
                let (id, body) = row?;
                match serde_json::from_str::<ProjectSnapshot>(&body) {
                    Ok(s) => snapshots.push(s),
                    Err(e) => tracing::warn!(project_id = %id, error = %e, "Skipping undecodable snapshot"),
                }
            }
            Ok(snapshots)
        })
        .await
    }

    async fn delete(&self, project_id: &ProjectId) -> Result<(), StoreError> {
        let id = project_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM project_snapshots WHERE project_id = ?1", params![id])?;
            Ok(())
        })
        .await
    }
}
