//! 编排上下文：当前项目身份、源图、主体描述、模式与活动批次
//!
//! 由编排器独占持有，以引用传入聚合器 / 编辑协调器 / 持久化协调器；没有进程级单例。
//! 每次替换批次（新源图、切换模式、全部重新生成、载入历史）都会推进 epoch。

use crate::backend::AspectRatio;
use crate::catalog::SubjectMode;
use crate::core::{
    Batch, BatchKey, ImageData, OrchestratorError, ProjectId, ProjectSnapshot, SubjectDescriptor,
    TaskStatus,
};

#[derive(Debug, Clone, Default)]
pub struct OrchestratorContext {
    pub project_id: Option<ProjectId>,
    pub epoch: u64,
    pub source_image: Option<ImageData>,
    pub subject: SubjectDescriptor,
    pub mode: SubjectMode,
    pub aspect_ratio: AspectRatio,
    pub batch: Option<Batch>,
}

impl OrchestratorContext {
    pub fn new(mode: SubjectMode, aspect_ratio: AspectRatio) -> Self {
        Self {
            mode,
            aspect_ratio,
            ..Self::default()
        }
    }

    /// 当前活动批次的身份；没有批次时为 None（此时所有任务结果都视为过期）
    pub fn active_key(&self) -> Option<BatchKey> {
        let batch = self.batch.as_ref()?;
        Some(BatchKey {
            project_id: batch.project_id.clone(),
            epoch: self.epoch,
        })
    }

    /// 选择新源图：分配新的项目 ID，丢弃旧批次
    pub fn select_source(&mut self, image: ImageData, subject: SubjectDescriptor) -> ProjectId {
        let id = ProjectId::generate();
        self.project_id = Some(id.clone());
        self.source_image = Some(image);
        self.subject = subject;
        self.batch = None;
        self.epoch += 1;
        id
    }

    /// 切换模式；模式变化时丢弃旧批次（不混用目录），返回是否发生变化
    pub fn set_mode(&mut self, mode: SubjectMode) -> bool {
        if self.mode == mode {
            return false;
        }
        self.mode = mode;
        self.batch = None;
        self.epoch += 1;
        true
    }

    /// 开始新批次（首次生成或全部重新生成），沿用当前项目 ID
    pub fn begin_batch(&mut self) -> Result<BatchKey, OrchestratorError> {
        let image = self
            .source_image
            .clone()
            .ok_or(OrchestratorError::NoSourceImage)?;
        let project_id = self
            .project_id
            .get_or_insert_with(ProjectId::generate)
            .clone();

        self.epoch += 1;
        self.batch = Some(Batch::new(
            project_id.clone(),
            image,
            self.subject.clone(),
            self.mode,
            self.aspect_ratio,
        ));
        Ok(BatchKey {
            project_id,
            epoch: self.epoch,
        })
    }

    /// 从快照恢复：采用快照的项目 ID，之后的编辑都写回原项目
    ///
    /// 快照里残留的未结束任务标记为失败，便于用户重试。
    pub fn adopt(&mut self, snapshot: ProjectSnapshot) -> BatchKey {
        let mut batch = snapshot.batch;
        for task in batch.tasks.values_mut() {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Failed {
                    reason: "Interrupted before completion".to_string(),
                };
            }
        }

        self.project_id = Some(batch.project_id.clone());
        self.source_image = Some(batch.source_image.clone());
        self.subject = batch.subject.clone();
        self.mode = batch.mode;
        self.aspect_ratio = batch.aspect_ratio;
        self.epoch += 1;
        let key = BatchKey {
            project_id: batch.project_id.clone(),
            epoch: self.epoch,
        };
        self.batch = Some(batch);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageData {
        ImageData::new("image/png", vec![1])
    }

    #[test]
    fn test_begin_batch_requires_source() {
        let mut ctx = OrchestratorContext::default();
        assert_eq!(ctx.begin_batch().unwrap_err(), OrchestratorError::NoSourceImage);
    }

    #[test]
    fn test_project_id_stable_across_regenerations() {
        let mut ctx = OrchestratorContext::default();
        let id = ctx.select_source(image(), SubjectDescriptor::default());
        let first = ctx.begin_batch().unwrap();
        let second = ctx.begin_batch().unwrap();
        assert_eq!(first.project_id, id);
        assert_eq!(second.project_id, id);
        assert!(second.epoch > first.epoch);
        assert_eq!(ctx.active_key(), Some(second));
    }

    #[test]
    fn test_new_source_gets_new_project() {
        let mut ctx = OrchestratorContext::default();
        let a = ctx.select_source(image(), SubjectDescriptor::default());
        ctx.begin_batch().unwrap();
        let b = ctx.select_source(image(), SubjectDescriptor::default());
        assert_ne!(a, b);
        assert!(ctx.batch.is_none());
        assert!(ctx.active_key().is_none());
    }

    #[test]
    fn test_mode_switch_discards_batch() {
        let mut ctx = OrchestratorContext::new(SubjectMode::Product, AspectRatio::Square);
        ctx.select_source(image(), SubjectDescriptor::default());
        let key = ctx.begin_batch().unwrap();
        assert!(!ctx.set_mode(SubjectMode::Product));
        assert_eq!(ctx.active_key(), Some(key));
        assert!(ctx.set_mode(SubjectMode::Human));
        assert!(ctx.batch.is_none());

        ctx.begin_batch().unwrap();
        let batch = ctx.batch.as_ref().unwrap();
        assert_eq!(batch.mode, SubjectMode::Human);
        assert!(batch.tasks.keys().all(|s| SubjectMode::Human.contains(s)));
    }

    #[test]
    fn test_adopt_takes_snapshot_identity() {
        let mut source = OrchestratorContext::new(SubjectMode::Human, AspectRatio::Landscape16x9);
        let id = source.select_source(image(), SubjectDescriptor::default());
        source.begin_batch().unwrap();
        let snapshot = ProjectSnapshot::capture(source.batch.as_ref().unwrap());

        let mut ctx = OrchestratorContext::default();
        let key = ctx.adopt(snapshot);
        assert_eq!(key.project_id, id);
        assert_eq!(ctx.project_id, Some(id));
        assert_eq!(ctx.mode, SubjectMode::Human);
        assert_eq!(ctx.aspect_ratio, AspectRatio::Landscape16x9);
        // 快照中 Pending 的任务被标记为失败
        assert!(ctx.batch.as_ref().unwrap().is_settled());
    }
}
