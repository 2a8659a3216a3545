//! 持久化协调器：批次 ⇄ 项目快照
//!
//! 写入时机：主批次全部结束后一次、每次编辑成功后一次。按 projectId 覆盖写，不做跨写入合并。
//! 存储失败只记日志，内存中的批次仍然正确。

use std::sync::Arc;

use crate::core::{Batch, BatchKey, OrchestratorContext, ProjectId, ProjectSnapshot};
use crate::store::{SnapshotStore, StoreError};

pub struct PersistenceCoordinator {
    store: Arc<dyn SnapshotStore>,
}

impl PersistenceCoordinator {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// 写入完整批次；失败返回 None
    pub async fn save(&self, batch: &Batch) -> Option<ProjectSnapshot> {
        let snapshot = ProjectSnapshot::capture(batch);
        match self.store.put(&snapshot).await {
            Ok(()) => {
                tracing::info!(
                    project_id = %snapshot.project_id(),
                    tasks = snapshot.batch.tasks.len(),
                    "Project snapshot saved"
                );
                Some(snapshot)
            }
            Err(e) => {
                tracing::warn!(project_id = %snapshot.project_id(), error = %e, "Failed to save project snapshot");
                None
            }
        }
    }

    /// 所有快照，新到旧；读取失败返回空列表
    pub async fn history(&self) -> Vec<ProjectSnapshot> {
        match self.store.get_all_desc().await {
            Ok(all) => all,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load project history");
                Vec::new()
            }
        }
    }

    /// 按 ID 查找；存储读取失败返回 Err，与「不存在」区分
    pub async fn find(&self, project_id: &ProjectId) -> Result<Option<ProjectSnapshot>, StoreError> {
        let all = self.store.get_all_desc().await.map_err(|e| {
            tracing::warn!(project_id = %project_id, error = %e, "Failed to look up project snapshot");
            e
        })?;
        Ok(all.into_iter().find(|s| s.project_id() == project_id))
    }

    pub async fn delete(&self, project_id: &ProjectId) -> Result<(), StoreError> {
        match self.store.delete(project_id).await {
            Ok(()) => {
                tracing::info!(project_id = %project_id, "Project snapshot deleted");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(project_id = %project_id, error = %e, "Failed to delete project snapshot");
                Err(e)
            }
        }
    }

    /// 用快照恢复上下文，采用快照的项目身份
    pub fn restore(ctx: &mut OrchestratorContext, snapshot: ProjectSnapshot) -> BatchKey {
        let key = ctx.adopt(snapshot);
        tracing::info!(project_id = %key.project_id, "Resumed project from history");
        key
    }
}
