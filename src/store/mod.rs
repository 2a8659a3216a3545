//! 存储层：项目快照的存储抽象与实现（内存 / SQLite）

pub mod memory;
pub mod sqlite;
pub mod traits;

use std::sync::Arc;

pub use memory::InMemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;
pub use traits::{SnapshotStore, StoreError};

use crate::config::AppConfig;

/// 根据配置创建存储；SQLite 打开失败时退化为内存存储（存储故障不阻塞生成）
pub fn create_store_from_config(cfg: &AppConfig) -> Arc<dyn SnapshotStore> {
    if cfg.store.in_memory {
        tracing::info!("Using in-memory snapshot store");
        return Arc::new(InMemorySnapshotStore::new());
    }
    match SqliteSnapshotStore::open(&cfg.store.path) {
        Ok(store) => {
            tracing::info!(path = %cfg.store.path.display(), "Using SQLite snapshot store");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to open SQLite store, falling back to memory");
            Arc::new(InMemorySnapshotStore::new())
        }
    }
}
