//! 编排器：主控循环
//!
//! 负责：持有 OrchestratorContext、建立 cmd/state/event 三通道，在后台任务中消费用户命令
//! 与工作任务消息（调度器、编辑），经聚合器合并后更新状态并广播事件。
//! 所有状态修改都发生在这个循环里；调度器与编辑任务只发消息，不碰上下文。

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::backend::{analyze_or_default, Analyzer, AspectRatio, GenerationBackend};
use crate::catalog::{Style, SubjectMode};
use crate::config::AppConfig;
use crate::core::{
    ApplyOutcome, Batch, BatchAggregator, BatchKey, BatchPlan, EditCoordinator, EditRequest,
    ImageData, OrchestratorContext, OrchestratorError, OrchestratorEvent, PersistenceCoordinator,
    ProjectId, ProjectSnapshot, SubjectDescriptor, TaskScheduler, TaskUpdate, Transition,
    WorkerMessage,
};
use crate::store::SnapshotStore;

type Reply<T> = oneshot::Sender<T>;

/// 发往编排器的命令，结果经 oneshot 返回
#[derive(Debug)]
pub enum Command {
    /// 选择新源图：分析主体、分配新项目 ID
    SelectSource {
        image: ImageData,
        reply: Reply<(ProjectId, SubjectDescriptor)>,
    },
    /// 切换主体模式，返回是否发生变化
    SetMode { mode: SubjectMode, reply: Reply<bool> },
    /// 设置画幅（对下一批次生效）
    SetAspectRatio { ratio: AspectRatio, reply: Reply<()> },
    /// 生成 / 全部重新生成
    GenerateAll {
        reply: Reply<Result<BatchKey, OrchestratorError>>,
    },
    Edit {
        style: Style,
        instruction: String,
        reply: Reply<Result<(), OrchestratorError>>,
    },
    /// 以原指令重试单个已结束任务
    RetryTask {
        style: Style,
        reply: Reply<Result<(), OrchestratorError>>,
    },
    History { reply: Reply<Vec<ProjectSnapshot>> },
    LoadProject {
        project_id: ProjectId,
        reply: Reply<Result<BatchKey, OrchestratorError>>,
    },
    DeleteProject {
        project_id: ProjectId,
        reply: Reply<Result<(), OrchestratorError>>,
    },
    Snapshot { reply: Reply<Option<Batch>> },
    Shutdown { reply: Reply<()> },
}

/// 编排器句柄：可克隆，供 CLI / 测试发送命令与订阅事件
#[derive(Clone)]
pub struct OrchestratorHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events_tx: broadcast::Sender<OrchestratorEvent>,
}

impl OrchestratorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| OrchestratorError::Stopped)?;
        rx.await.map_err(|_| OrchestratorError::Stopped)
    }

    /// 新的事件订阅者（只收到订阅之后的事件）
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events_tx.subscribe()
    }

    pub async fn select_source(
        &self,
        image: ImageData,
    ) -> Result<(ProjectId, SubjectDescriptor), OrchestratorError> {
        self.request(|reply| Command::SelectSource { image, reply })
            .await
    }

    pub async fn set_mode(&self, mode: SubjectMode) -> Result<bool, OrchestratorError> {
        self.request(|reply| Command::SetMode { mode, reply }).await
    }

    pub async fn set_aspect_ratio(&self, ratio: AspectRatio) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::SetAspectRatio { ratio, reply })
            .await
    }

    pub async fn generate_all(&self) -> Result<BatchKey, OrchestratorError> {
        self.request(|reply| Command::GenerateAll { reply }).await?
    }

    pub async fn edit(
        &self,
        style: impl Into<Style>,
        instruction: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        let style = style.into();
        let instruction = instruction.into();
        self.request(|reply| Command::Edit {
            style,
            instruction,
            reply,
        })
        .await?
    }

    pub async fn retry_task(&self, style: impl Into<Style>) -> Result<(), OrchestratorError> {
        let style = style.into();
        self.request(|reply| Command::RetryTask { style, reply })
            .await?
    }

    pub async fn history(&self) -> Result<Vec<ProjectSnapshot>, OrchestratorError> {
        self.request(|reply| Command::History { reply }).await
    }

    pub async fn load_project(&self, project_id: ProjectId) -> Result<BatchKey, OrchestratorError> {
        self.request(|reply| Command::LoadProject { project_id, reply })
            .await?
    }

    pub async fn delete_project(&self, project_id: ProjectId) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::DeleteProject { project_id, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<Option<Batch>, OrchestratorError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// 创建编排器运行时：返回命令句柄、批次状态接收端、事件接收端；后台任务消费命令与工作消息。
///
/// 需在 tokio 运行时内调用。
pub fn create_orchestrator(
    cfg: &AppConfig,
    backend: Arc<dyn GenerationBackend>,
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn SnapshotStore>,
) -> (
    OrchestratorHandle,
    watch::Receiver<Option<Batch>>,
    broadcast::Receiver<OrchestratorEvent>,
) {
    // 三通道：命令 -> Core；Core -> 当前批次；Core -> 事件流。另有工作任务 -> Core 的内部通道
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (worker_tx, mut worker_rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let (state_tx, state_rx) = watch::channel::<Option<Batch>>(None);
    let (events_tx, events_rx) = broadcast::channel::<OrchestratorEvent>(256);

    let mut actor = Orchestrator {
        ctx: OrchestratorContext::new(cfg.app.default_mode, cfg.app.default_aspect_ratio),
        scheduler: TaskScheduler::from(&cfg.generation),
        backend,
        analyzer,
        persistence: PersistenceCoordinator::new(store),
        worker_tx,
        state_tx,
        events_tx: events_tx.clone(),
        cancel: None,
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };  // 所有句柄已释放
                    if !actor.handle_command(cmd).await {
                        break;
                    }
                }
                Some(msg) = worker_rx.recv() => actor.handle_worker(msg).await,
            }
        }
        actor.supersede();
        tracing::info!("Orchestrator stopped");
    });

    (OrchestratorHandle { cmd_tx, events_tx }, state_rx, events_rx)
}

struct Orchestrator {
    ctx: OrchestratorContext,
    scheduler: TaskScheduler,
    backend: Arc<dyn GenerationBackend>,
    analyzer: Arc<dyn Analyzer>,
    persistence: PersistenceCoordinator,
    worker_tx: mpsc::UnboundedSender<WorkerMessage>,
    state_tx: watch::Sender<Option<Batch>>,
    events_tx: broadcast::Sender<OrchestratorEvent>,
    /// 当前调度器运行的取消令牌
    cancel: Option<CancellationToken>,
}

impl Orchestrator {
    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events_tx.send(event);
    }

    fn publish_state(&self) {
        let _ = self.state_tx.send(self.ctx.batch.clone());
    }

    /// 活动批次被取代：停止旧调度器开新轮次（旧结果仍靠身份比对丢弃）
    fn supersede(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }

    /// 处理一条命令；返回 false 表示退出循环
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::SelectSource { image, reply } => {
                self.supersede();
                let subject = analyze_or_default(self.analyzer.as_ref(), &image).await;
                let project_id = self.ctx.select_source(image, subject.clone());
                // 分析可信时按是否为人像建议模式；之后显式 SetMode 可覆盖
                if subject.confidence > 0.0 {
                    self.ctx.set_mode(SubjectMode::suggested_for(subject.is_human));
                }
                tracing::info!(
                    project_id = %project_id,
                    subject = %subject.name,
                    mode = %self.ctx.mode,
                    "Source image selected"
                );
                self.publish_state();
                self.emit(OrchestratorEvent::SubjectAnalyzed {
                    project_id: project_id.clone(),
                    subject: subject.clone(),
                });
                let _ = reply.send((project_id, subject));
            }
            Command::SetMode { mode, reply } => {
                let changed = self.ctx.set_mode(mode);
                if changed {
                    self.supersede();
                    tracing::info!(mode = %mode, "Subject mode switched, batch discarded");
                    self.publish_state();
                }
                let _ = reply.send(changed);
            }
            Command::SetAspectRatio { ratio, reply } => {
                self.ctx.aspect_ratio = ratio;
                let _ = reply.send(());
            }
            Command::GenerateAll { reply } => {
                let _ = reply.send(self.start_batch());
            }
            Command::Edit {
                style,
                instruction,
                reply,
            } => {
                let result = EditCoordinator::prepare_edit(&self.ctx, &style, &instruction)
                    .map(|req| self.spawn_edit(req));
                let _ = reply.send(result);
            }
            Command::RetryTask { style, reply } => {
                let result =
                    EditCoordinator::prepare_retry(&self.ctx, &style).map(|req| self.spawn_edit(req));
                let _ = reply.send(result);
            }
            Command::History { reply } => {
                let _ = reply.send(self.persistence.history().await);
            }
            Command::LoadProject { project_id, reply } => {
                let result = match self.persistence.find(&project_id).await {
                    Ok(Some(snapshot)) => {
                        self.supersede();
                        let key = PersistenceCoordinator::restore(&mut self.ctx, snapshot);
                        self.publish_state();
                        Ok(key)
                    }
                    Ok(None) => Err(OrchestratorError::ProjectNotFound(project_id)),
                    Err(e) => Err(OrchestratorError::StoreUnavailable(e.to_string())),
                };
                let _ = reply.send(result);
            }
            Command::DeleteProject { project_id, reply } => {
                // 删除活动项目不影响内存中的批次
                let result = match self.persistence.find(&project_id).await {
                    Ok(Some(_)) => self
                        .persistence
                        .delete(&project_id)
                        .await
                        .map_err(|e| OrchestratorError::StoreUnavailable(e.to_string())),
                    Ok(None) => Err(OrchestratorError::ProjectNotFound(project_id)),
                    Err(e) => Err(OrchestratorError::StoreUnavailable(e.to_string())),
                };
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(BatchAggregator::snapshot(&self.ctx));
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn start_batch(&mut self) -> Result<BatchKey, OrchestratorError> {
        self.supersede();
        let key = self.ctx.begin_batch()?;
        let batch = self.ctx.batch.as_ref().ok_or(OrchestratorError::NoActiveBatch)?;
        let plan = BatchPlan::from_batch(key.clone(), batch);
        tracing::info!(
            project_id = %key.project_id,
            epoch = key.epoch,
            tasks = plan.styles.len(),
            mode = %batch.mode,
            backend = self.backend.name(),
            concurrency = self.scheduler.concurrency(),
            "Starting batch"
        );

        let token = CancellationToken::new();
        self.cancel = Some(token.clone());
        let scheduler = self.scheduler.clone();
        let backend = self.backend.clone();
        let tx = self.worker_tx.clone();
        tokio::spawn(async move {
            scheduler.run(plan, backend, tx, token).await;
        });

        self.publish_state();
        Ok(key)
    }

    fn spawn_edit(&self, req: EditRequest) {
        tracing::info!(style = %req.style, "Starting edit");
        let backend = self.backend.clone();
        let tx = self.worker_tx.clone();
        tokio::spawn(async move {
            let update = EditCoordinator::run(backend.as_ref(), req).await;
            let _ = tx.send(WorkerMessage::Task(update));
        });
    }

    async fn handle_worker(&mut self, msg: WorkerMessage) {
        match msg {
            WorkerMessage::Task(update) => self.handle_update(update).await,
            WorkerMessage::BatchFinished { key } => {
                if self.ctx.active_key().as_ref() != Some(&key) {
                    tracing::debug!(project_id = %key.project_id, epoch = key.epoch, "Superseded batch finished");
                    return;
                }
                let Some(batch) = self.ctx.batch.clone() else {
                    return;
                };
                if !batch.is_settled() {
                    tracing::warn!(project_id = %key.project_id, "Scheduler finished with unsettled tasks");
                    return;
                }
                let progress = batch.progress();
                tracing::info!(
                    project_id = %key.project_id,
                    succeeded = progress.succeeded,
                    failed = progress.failed,
                    "Batch completed"
                );
                self.cancel = None;
                self.emit(OrchestratorEvent::BatchCompleted {
                    batch: batch.clone(),
                });
                self.persist(&batch).await;
            }
        }
    }

    async fn handle_update(&mut self, update: TaskUpdate) {
        let style = update.style.clone();
        // 事件需要的字段先取出，transition 随后被聚合器消费
        let retry = match &update.transition {
            Transition::RetryScheduled { attempt, delay, .. } => Some((*attempt, *delay)),
            _ => None,
        };
        let edit = match &update.transition {
            Transition::Edited { .. } => Some(None),
            Transition::EditFailed { reason } => Some(Some(reason.clone())),
            _ => None,
        };

        match BatchAggregator::apply(&mut self.ctx, update) {
            ApplyOutcome::Applied => {}
            ApplyOutcome::Stale => {
                tracing::debug!(style = %style, "Discarded update from superseded batch");
                return;
            }
            ApplyOutcome::Rejected(reason) => {
                tracing::warn!(style = %style, reason = %reason, "Rejected task transition");
                return;
            }
        }

        self.publish_state();
        let Some(batch) = self.ctx.batch.clone() else {
            return;
        };
        if let Some((attempt, delay)) = retry {
            self.emit(OrchestratorEvent::TaskRetryScheduled {
                style: style.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
        }

        match edit {
            Some(None) => {
                self.emit(OrchestratorEvent::EditCompleted {
                    style,
                    batch: batch.clone(),
                });
                self.persist(&batch).await;
            }
            Some(Some(reason)) => {
                self.emit(OrchestratorEvent::TaskUpdated {
                    style: style.clone(),
                    batch,
                });
                self.emit(OrchestratorEvent::EditFailed { style, reason });
            }
            None => self.emit(OrchestratorEvent::TaskUpdated { style, batch }),
        }
    }

    async fn persist(&self, batch: &Batch) {
        if let Some(snapshot) = self.persistence.save(batch).await {
            self.emit(OrchestratorEvent::SnapshotPersisted { snapshot });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockAnalyzer, MockGenerationBackend};
    use crate::store::InMemorySnapshotStore;

    fn spawn_with(analyzer: MockAnalyzer) -> (OrchestratorHandle, watch::Receiver<Option<Batch>>) {
        let (handle, state_rx, _events) = create_orchestrator(
            &AppConfig::default(),
            Arc::new(MockGenerationBackend::new()),
            Arc::new(analyzer),
            Arc::new(InMemorySnapshotStore::new()),
        );
        (handle, state_rx)
    }

    #[tokio::test]
    async fn test_commands_rejected_without_source() {
        let (handle, _state) = spawn_with(MockAnalyzer::default());
        assert_eq!(
            handle.generate_all().await.unwrap_err(),
            OrchestratorError::NoSourceImage
        );
        assert_eq!(
            handle.edit("HERO", "x").await.unwrap_err(),
            OrchestratorError::NoActiveBatch
        );
        assert_eq!(
            handle.load_project("missing".into()).await.unwrap_err(),
            OrchestratorError::ProjectNotFound("missing".into())
        );
        assert_eq!(
            handle.delete_project("missing".into()).await.unwrap_err(),
            OrchestratorError::ProjectNotFound("missing".into())
        );
    }

    #[tokio::test]
    async fn test_confident_analysis_suggests_mode() {
        let subject = SubjectDescriptor {
            is_human: true,
            confidence: 0.9,
            ..SubjectDescriptor::default()
        };
        let (handle, _state) = spawn_with(MockAnalyzer::new(subject));
        handle
            .select_source(ImageData::new("image/png", vec![1]))
            .await
            .unwrap();
        handle.generate_all().await.unwrap();
        let batch = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(batch.mode, SubjectMode::Human);
        assert!(batch.tasks.keys().all(|s| SubjectMode::Human.contains(s)));
    }

    #[tokio::test]
    async fn test_failed_analysis_keeps_default_mode() {
        let (handle, _state) = spawn_with(MockAnalyzer::failing());
        let (_, subject) = handle
            .select_source(ImageData::new("image/png", vec![1]))
            .await
            .unwrap();
        assert_eq!(subject, SubjectDescriptor::default());
        handle.generate_all().await.unwrap();
        let batch = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(batch.mode, SubjectMode::Product);
    }

    #[tokio::test]
    async fn test_state_channel_tracks_batch() {
        let (handle, mut state) = spawn_with(MockAnalyzer::failing());
        handle
            .select_source(ImageData::new("image/png", vec![1]))
            .await
            .unwrap();
        handle.generate_all().await.unwrap();
        state.changed().await.unwrap();
        let batch = state.borrow().clone().unwrap();
        assert_eq!(batch.tasks.len(), 9);
        assert_eq!(batch.mode, SubjectMode::Product);
    }

    #[tokio::test]
    async fn test_store_outage_is_not_reported_as_missing_project() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let (handle, _state, _events) = create_orchestrator(
            &AppConfig::default(),
            Arc::new(MockGenerationBackend::new()),
            Arc::new(MockAnalyzer::default()),
            store.clone(),
        );
        store.set_failing(true);

        let err = handle.delete_project("p1".into()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::StoreUnavailable(_)), "{err:?}");
        let err = handle.load_project("p1".into()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::StoreUnavailable(_)), "{err:?}");

        store.set_failing(false);
        assert_eq!(
            handle.delete_project("p1".into()).await.unwrap_err(),
            OrchestratorError::ProjectNotFound("p1".into())
        );
    }

    #[tokio::test]
    async fn test_shutdown_stops_actor() {
        let (handle, _state) = spawn_with(MockAnalyzer::default());
        handle.shutdown().await.unwrap();
        assert_eq!(
            handle.snapshot().await.unwrap_err(),
            OrchestratorError::Stopped
        );
    }
}
