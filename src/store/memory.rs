//! 内存快照存储：进程内 HashMap，适合测试与 `in_memory = true` 的运行

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{ProjectId, ProjectSnapshot};
use crate::store::{SnapshotStore, StoreError};

#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<ProjectId, ProjectSnapshot>>,
    puts: AtomicUsize,
    /// 置为 true 时所有操作返回 Unavailable（模拟存储故障）
    failing: AtomicBool,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 成功写入的次数
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn get(&self, project_id: &ProjectId) -> Option<ProjectSnapshot> {
        self.snapshots.read().await.get(project_id).cloned()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store set to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn put(&self, snapshot: &ProjectSnapshot) -> Result<(), StoreError> {
        self.check()?;
        self.snapshots
            .write()
            .await
            .insert(snapshot.project_id().clone(), snapshot.clone());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_all_desc(&self) -> Result<Vec<ProjectSnapshot>, StoreError> {
        self.check()?;
        let mut all: Vec<_> = self.snapshots.read().await.values().cloned().collect();
        all.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.project_id().cmp(b.project_id()))
        });
        Ok(all)
    }

    async fn delete(&self, project_id: &ProjectId) -> Result<(), StoreError> {
        self.check()?;
        self.snapshots.write().await.remove(project_id);
        Ok(())
    }
}
