//! 批次状态聚合器
//!
//! 任务乱序、异步地完成；聚合器按风格键把每条更新合并进活动批次，只动该风格的条目。
//! 身份（项目 ID + epoch）与活动批次不一致的更新直接丢弃：这是系统唯一的取消机制，
//! 后端调用不会被中止，只是结果被忽略。

use chrono::Utc;

use crate::core::{Batch, OrchestratorContext, TaskStatus, TaskUpdate, Transition};

/// 合并结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// 来自已被取代的批次
    Stale,
    /// 非法迁移（状态回退、未知风格等），未应用
    Rejected(String),
}

#[derive(Debug, Default)]
pub struct BatchAggregator;

impl BatchAggregator {
    /// 当前批次快照
    pub fn snapshot(ctx: &OrchestratorContext) -> Option<Batch> {
        ctx.batch.clone()
    }

    /// 应用一条任务更新
    pub fn apply(ctx: &mut OrchestratorContext, update: TaskUpdate) -> ApplyOutcome {
        if ctx.active_key().as_ref() != Some(&update.key) {
            return ApplyOutcome::Stale;
        }
        let Some(batch) = ctx.batch.as_mut() else {
            return ApplyOutcome::Stale;
        };
        let Some(task) = batch.tasks.get_mut(&update.style) else {
            return ApplyOutcome::Rejected(format!("unknown style {}", update.style));
        };

        match update.transition {
            Transition::Started { attempt } => {
                if task.status.is_terminal() {
                    return ApplyOutcome::Rejected(format!("{} already settled", task.style));
                }
                if attempt <= task.attempt {
                    return ApplyOutcome::Rejected(format!(
                        "{} attempt {} not after {}",
                        task.style, attempt, task.attempt
                    ));
                }
                task.status = TaskStatus::Running;
                task.attempt = attempt;
            }
            Transition::RetryScheduled { attempt, .. } => {
                if task.status != TaskStatus::Running {
                    return ApplyOutcome::Rejected(format!("{} is not running", task.style));
                }
                task.attempt = task.attempt.max(attempt);
            }
            Transition::Succeeded { attempt, output } => {
                if task.status.is_terminal() {
                    return ApplyOutcome::Rejected(format!("{} already settled", task.style));
                }
                task.status = TaskStatus::Succeeded { output };
                task.attempt = task.attempt.max(attempt);
                task.completed_at = Some(Utc::now());
            }
            Transition::Failed { attempt, reason } => {
                if task.status.is_terminal() {
                    return ApplyOutcome::Rejected(format!("{} already settled", task.style));
                }
                task.status = TaskStatus::Failed { reason };
                task.attempt = task.attempt.max(attempt);
                task.completed_at = Some(Utc::now());
            }
            Transition::Edited {
                output,
                custom_instruction,
            } => {
                if !task.status.is_terminal() {
                    return ApplyOutcome::Rejected(format!("{} has not settled", task.style));
                }
                task.status = TaskStatus::Succeeded { output };
                task.attempt += 1;
                task.custom_instruction = custom_instruction;
                task.completed_at = Some(Utc::now());
            }
            Transition::EditFailed { reason } => {
                if !task.status.is_terminal() {
                    return ApplyOutcome::Rejected(format!("{} has not settled", task.style));
                }
                task.status = TaskStatus::Failed { reason };
                task.attempt += 1;
                task.completed_at = Some(Utc::now());
            }
        }
        ApplyOutcome::Applied
    }
}
