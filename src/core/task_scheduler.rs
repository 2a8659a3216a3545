//! 任务调度：按轮次驱动整个风格目录
//!
//! 待执行队列按目录顺序填充；每轮取至多 concurrency 个风格并发调用后端，
//! 限流重试在各任务自己的 future 内完成（不跨轮），轮与轮之间固定停顿。
//! 每次状态迁移立即通过通道发给编排器，不等整批结束。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{AspectRatio, GenerationBackend, GenerationRequest};
use crate::catalog::{build_prompt, Style};
use crate::config::GenerationSection;
use crate::core::{
    Batch, BatchKey, ImageData, RetryDecision, RetryPolicy, SubjectDescriptor, TaskUpdate,
    Transition, WorkerMessage,
};

/// 一次批次运行所需的全部输入（从活动批次拷贝，运行期间不再读取上下文）
#[derive(Debug, Clone)]
pub struct BatchPlan {
    pub key: BatchKey,
    /// 目录顺序的 (风格, 自定义指令)
    pub styles: Vec<(Style, Option<String>)>,
    pub subject: SubjectDescriptor,
    pub aspect_ratio: AspectRatio,
    pub source_image: ImageData,
}

impl BatchPlan {
    pub fn from_batch(key: BatchKey, batch: &Batch) -> Self {
        Self {
            key,
            styles: batch
                .ordered_tasks()
                .map(|t| (t.style.clone(), t.custom_instruction.clone()))
                .collect(),
            subject: batch.subject.clone(),
            aspect_ratio: batch.aspect_ratio,
            source_image: batch.source_image.clone(),
        }
    }
}

/// 任务调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    concurrency: usize,
    inter_round_pause: Duration,
    retry: RetryPolicy,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(1, Duration::from_millis(1000), RetryPolicy::default())
    }
}

impl From<&GenerationSection> for TaskScheduler {
    fn from(cfg: &GenerationSection) -> Self {
        Self::new(
            cfg.concurrency,
            Duration::from_millis(cfg.inter_round_pause_ms),
            RetryPolicy::from(&cfg.retry),
        )
    }
}

impl TaskScheduler {
    pub fn new(concurrency: usize, inter_round_pause: Duration, retry: RetryPolicy) -> Self {
        Self {
            concurrency: concurrency.max(1),
            inter_round_pause,
            retry,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 运行整个批次；结束（或被取代后停止）时发送 BatchFinished
    ///
    /// cancel 被触发后不再开始新的一轮；已在进行的调用照常完成，其结果由聚合器按身份丢弃。
    pub async fn run(
        &self,
        plan: BatchPlan,
        backend: Arc<dyn GenerationBackend>,
        tx: mpsc::UnboundedSender<WorkerMessage>,
        cancel: CancellationToken,
    ) {
        let mut queue: VecDeque<(Style, Option<String>)> = plan.styles.iter().cloned().collect();
        let mut round = 0usize;

        while !queue.is_empty() {
            if cancel.is_cancelled() {
                tracing::info!(project_id = %plan.key.project_id, epoch = plan.key.epoch, "Batch superseded, stop scheduling");
                break;
            }

            round += 1;
            let take = self.concurrency.min(queue.len());
            let chunk: Vec<_> = queue.drain(..take).collect();
            tracing::debug!(round, size = chunk.len(), remaining = queue.len(), "Starting round");

            join_all(chunk.into_iter().map(|(style, custom)| {
                self.run_task(&plan, backend.as_ref(), &tx, &cancel, style, custom)
            }))
            .await;

            if !queue.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.inter_round_pause) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        let _ = tx.send(WorkerMessage::BatchFinished { key: plan.key.clone() });
    }

    /// 单个任务的完整解析路径：调用、按策略退避重试，直到成功或放弃
    async fn run_task(
        &self,
        plan: &BatchPlan,
        backend: &dyn GenerationBackend,
        tx: &mpsc::UnboundedSender<WorkerMessage>,
        cancel: &CancellationToken,
        style: Style,
        custom: Option<String>,
    ) {
        let prompt = build_prompt(&style, &plan.subject, custom.as_deref());
        let request = GenerationRequest::new(
            Some(plan.source_image.clone()),
            prompt,
            plan.aspect_ratio,
        )
        .with_style(style.clone());

        let send = |transition: Transition| {
            let _ = tx.send(WorkerMessage::Task(TaskUpdate {
                key: plan.key.clone(),
                style: style.clone(),
                transition,
            }));
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            send(Transition::Started { attempt });

            match backend.generate(&request).await {
                Ok(output) => {
                    tracing::info!(style = %style, attempt, "Shot generated");
                    send(Transition::Succeeded { attempt, output });
                    return;
                }
                Err(err) => match self.retry.decide(&err, attempt) {
                    RetryDecision::Retry(delay) => {
                        tracing::warn!(style = %style, attempt, delay_ms = delay.as_millis() as u64, error = %err, "Rate limited, backing off");
                        send(Transition::RetryScheduled {
                            attempt,
                            delay,
                            reason: err.to_string(),
                        });
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => {
                                tracing::debug!(style = %style, "Batch superseded during backoff");
                                return;
                            }
                        }
                    }
                    RetryDecision::GiveUp(reason) => {
                        tracing::warn!(style = %style, attempt, reason = %reason, "Shot failed");
                        send(Transition::Failed { attempt, reason });
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerationError, MockGenerationBackend};
    use crate::catalog::SubjectMode;
    use crate::core::OrchestratorContext;
    use tokio::time::Instant;

    fn plan(mode: SubjectMode) -> BatchPlan {
        let mut ctx = OrchestratorContext::new(mode, AspectRatio::Portrait2x3);
        ctx.select_source(ImageData::new("image/png", b"SRC".to_vec()), SubjectDescriptor::default());
        let key = ctx.begin_batch().unwrap();
        BatchPlan::from_batch(key, ctx.batch.as_ref().unwrap())
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<WorkerMessage>) -> Vec<WorkerMessage> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            let done = matches!(msg, WorkerMessage::BatchFinished { .. });
            out.push(msg);
            if done {
                break;
            }
        }
        out
    }

    fn transitions_for<'a>(msgs: &'a [WorkerMessage], style: &str) -> Vec<&'a Transition> {
        msgs.iter()
            .filter_map(|m| match m {
                WorkerMessage::Task(u) if u.style.as_str() == style => Some(&u.transition),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_three_times_then_succeeds() {
        let backend = Arc::new(MockGenerationBackend::new().rate_limit("HERO", 3));
        let scheduler = TaskScheduler::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut p = plan(SubjectMode::Product);
        p.styles.truncate(1);

        let start = Instant::now();
        scheduler.run(p, backend.clone(), tx, CancellationToken::new()).await;
        let msgs = collect(rx).await;

        let delays: Vec<u64> = transitions_for(&msgs, "HERO")
            .into_iter()
            .filter_map(|t| match t {
                Transition::RetryScheduled { delay, .. } => Some(delay.as_millis() as u64),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000]);
        assert!(matches!(
            transitions_for(&msgs, "HERO").last(),
            Some(Transition::Succeeded { attempt: 4, .. })
        ));

        let calls = backend.calls_for("HERO");
        assert_eq!(calls.len(), 4);
        let gaps: Vec<u64> = calls
            .windows(2)
            .map(|w| (w[1].at - w[0].at).as_millis() as u64)
            .collect();
        assert_eq!(gaps, vec![2000, 4000, 8000]);
        assert_eq!(start.elapsed().as_millis(), 14_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_every_attempt_fails_without_fifth_call() {
        let backend = Arc::new(MockGenerationBackend::new().rate_limit("HERO", 5));
        let (tx, rx) = mpsc::unbounded_channel();
        let mut p = plan(SubjectMode::Product);
        p.styles.truncate(1);

        TaskScheduler::default()
            .run(p, backend.clone(), tx, CancellationToken::new())
            .await;
        let msgs = collect(rx).await;

        assert_eq!(backend.calls_for("HERO").len(), 4);
        match transitions_for(&msgs, "HERO").last() {
            Some(Transition::Failed { attempt, reason }) => {
                assert_eq!(*attempt, 4);
                assert!(reason.contains("exhausted"));
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_error_fails_immediately() {
        let backend = Arc::new(
            MockGenerationBackend::new().script("HERO", Err(GenerationError::Other("blocked".into()))),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let mut p = plan(SubjectMode::Product);
        p.styles.truncate(1);

        let start = Instant::now();
        TaskScheduler::default()
            .run(p, backend.clone(), tx, CancellationToken::new())
            .await;
        let msgs = collect(rx).await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(backend.calls_for("HERO").len(), 1);
        let hero = transitions_for(&msgs, "HERO");
        assert!(!hero.iter().any(|t| matches!(t, Transition::RetryScheduled { .. })));
        assert!(matches!(hero.last(), Some(Transition::Failed { attempt: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_rounds_follow_catalog_order_with_pause() {
        let backend = Arc::new(MockGenerationBackend::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let p = plan(SubjectMode::Product);
        let expected: Vec<_> = p.styles.iter().map(|(s, _)| s.clone()).collect();

        let start = Instant::now();
        TaskScheduler::default()
            .run(p, backend.clone(), tx, CancellationToken::new())
            .await;
        collect(rx).await;

        let order: Vec<_> = backend.calls().into_iter().filter_map(|c| c.style).collect();
        assert_eq!(order, expected);
        // 9 轮，8 次轮间停顿
        assert_eq!(start.elapsed(), Duration::from_millis(8000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounds_rounds() {
        let backend = Arc::new(MockGenerationBackend::new().with_latency(Duration::from_millis(500)));
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = TaskScheduler::new(4, Duration::from_millis(1000), RetryPolicy::default());

        let start = Instant::now();
        scheduler
            .run(plan(SubjectMode::Human), backend.clone(), tx, CancellationToken::new())
            .await;
        collect(rx).await;

        // 9 个任务 / 4 并发 = 3 轮：3 * 500ms + 2 * 1000ms
        assert_eq!(start.elapsed(), Duration::from_millis(3500));
        let calls = backend.calls();
        assert_eq!(calls.len(), 9);
        assert!(calls[..4].iter().all(|c| c.at == calls[0].at));
        assert!(calls[4].at > calls[3].at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_new_rounds() {
        let backend = Arc::new(MockGenerationBackend::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let scheduler = TaskScheduler::default();

        let handle = {
            let cancel = cancel.clone();
            let backend = backend.clone();
            tokio::spawn(async move {
                scheduler.run(plan(SubjectMode::Product), backend, tx, cancel).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        handle.await.unwrap();

        let msgs = collect(rx).await;
        assert!(matches!(msgs.last(), Some(WorkerMessage::BatchFinished { .. })));
        assert_eq!(backend.calls().len(), 2);
    }

    #[test]
    fn test_plan_uses_mapped_ratio_in_requests() {
        let p = plan(SubjectMode::Product);
        assert_eq!(p.styles.len(), 9);
        let req = GenerationRequest::new(None, "x", p.aspect_ratio);
        assert_eq!(req.aspect_ratio, AspectRatio::Portrait3x4);
        assert!(p.styles.iter().all(|(_, custom)| custom.is_none()));
    }
}
