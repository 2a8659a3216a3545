//! 编排器错误与重试决策
//!
//! 与 RetryPolicy 配合：根据 GenerationError 决定 Retry(delay) / GiveUp(reason)。
//! OrchestratorError 只表示命令被拒绝，不会让进程失败。

use std::time::Duration;

use thiserror::Error;

use crate::catalog::Style;
use crate::core::ProjectId;

/// 命令被编排器拒绝的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("No source image selected")]
    NoSourceImage,

    #[error("No active batch")]
    NoActiveBatch,

    #[error("Style {0} is not in the active catalog")]
    UnknownStyle(Style),

    #[error("Task {0} has not settled yet")]
    TaskNotSettled(Style),

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Snapshot store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Orchestrator stopped")]
    Stopped,
}

/// 重试策略对一次失败调用给出的决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// 等待 delay 后以同一任务再次调用后端
    Retry(Duration),
    /// 放弃，任务以 reason 失败
    GiveUp(String),
}
