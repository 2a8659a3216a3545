//! 事件与消息
//!
//! - WorkerMessage / TaskUpdate：调度器与编辑任务发往编排器的内部消息（携带批次身份）
//! - OrchestratorEvent：编排器对外广播的事件，携带完整批次 / 快照而非增量

use std::time::Duration;

use serde::Serialize;

use crate::catalog::Style;
use crate::core::{Batch, BatchKey, ImageData, ProjectId, ProjectSnapshot, SubjectDescriptor};

/// 单个任务的状态迁移
#[derive(Debug, Clone)]
pub enum Transition {
    /// 第 attempt 次调用开始
    Started { attempt: u32 },
    /// 第 attempt 次调用被限流，delay 后重试
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    Succeeded { attempt: u32, output: ImageData },
    Failed { attempt: u32, reason: String },
    /// 编辑 / 重试成功：替换输出并记录自定义指令
    Edited {
        output: ImageData,
        custom_instruction: Option<String>,
    },
    EditFailed { reason: String },
}

/// 带批次身份的任务更新
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub key: BatchKey,
    pub style: Style,
    pub transition: Transition,
}

/// 工作任务发往编排器的消息
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Task(TaskUpdate),
    /// 调度器队列已清空
    BatchFinished { key: BatchKey },
}

/// 对外事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// 源图分析完成
    SubjectAnalyzed {
        project_id: ProjectId,
        subject: SubjectDescriptor,
    },
    /// 某任务状态变化（进度 UI）
    TaskUpdated { style: Style, batch: Batch },
    /// 限流退避
    TaskRetryScheduled {
        style: Style,
        attempt: u32,
        delay_ms: u64,
    },
    /// 整个批次所有任务到达终态
    BatchCompleted { batch: Batch },
    /// 编辑成功（之后紧跟一次快照写入）
    EditCompleted { style: Style, batch: Batch },
    EditFailed { style: Style, reason: String },
    /// 快照已写入存储
    SnapshotPersisted { snapshot: ProjectSnapshot },
}
