//! 数据模型：项目身份、主体描述、任务、批次与项目快照
//!
//! Batch 是一次生成运行的工作集；ProjectSnapshot 是它写入存储时的持久化形态（Batch + 写入时间）。
//! 序列化统一使用 camelCase，tasks 使用 BTreeMap 以保证同一批次序列化结果稳定。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::AspectRatio;
use crate::catalog::{Style, SubjectMode};

/// 项目 ID：每张源图分配一次，之后的重新生成与编辑都沿用
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn generate() -> Self {
        Self(format!("proj_{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 批次身份：项目 ID + 纪元号。新源图、切换模式、全部重新生成都会推进纪元，
/// 携带旧身份的任务结果会被聚合器丢弃
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BatchKey {
    pub project_id: ProjectId,
    pub epoch: u64,
}

/// 图片数据（源图或生成结果）；序列化时 data 编码为 base64 字符串
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }

    /// 按文件扩展名猜测 MIME 类型
    pub fn mime_for_path(path: &std::path::Path) -> &'static str {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            _ => "image/png",
        }
    }

    /// 与 mime_for_path 相反：为输出文件选择扩展名
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// 构图质量（分析器给出）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingQuality {
    #[default]
    Ok,
    TooFar,
    CutOff,
    Empty,
}

/// 主体描述：分析器输出，批次生命周期内作为 Prompt 构造的不可变输入
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDescriptor {
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub is_human: bool,
    #[serde(default)]
    pub framing_quality: FramingQuality,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Default for SubjectDescriptor {
    /// 分析失败时的兜底描述（置信度 0，通用名称）
    fn default() -> Self {
        Self {
            name: "the subject".to_string(),
            description: "The main subject of the source photo.".to_string(),
            category: "general".to_string(),
            confidence: 0.0,
            is_human: false,
            framing_quality: FramingQuality::Ok,
            recommendations: Vec::new(),
        }
    }
}

/// 任务状态：Pending → Running → {Succeeded | Failed}，同一次尝试内不可回退
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded { output: ImageData },
    Failed { reason: String },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded { .. } | TaskStatus::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded { .. } => "succeeded",
            TaskStatus::Failed { .. } => "failed",
        }
    }
}

/// 单个生成任务
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub style: Style,
    pub status: TaskStatus,
    /// 已发起的后端调用次数
    pub attempt: u32,
    pub custom_instruction: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(style: Style, batch_created_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}-{}", style, batch_created_at.timestamp_millis()),
            style,
            status: TaskStatus::Pending,
            attempt: 0,
            custom_instruction: None,
            completed_at: None,
        }
    }

    pub fn output(&self) -> Option<&ImageData> {
        match &self.status {
            TaskStatus::Succeeded { output } => Some(output),
            _ => None,
        }
    }
}

/// 一次生成运行的工作集
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub project_id: ProjectId,
    pub source_image: ImageData,
    pub subject: SubjectDescriptor,
    pub mode: SubjectMode,
    pub aspect_ratio: AspectRatio,
    pub created_at: DateTime<Utc>,
    pub tasks: BTreeMap<Style, Task>,
}

impl Batch {
    /// 按模式目录为每个风格创建一个 Pending 任务
    pub fn new(
        project_id: ProjectId,
        source_image: ImageData,
        subject: SubjectDescriptor,
        mode: SubjectMode,
        aspect_ratio: AspectRatio,
    ) -> Self {
        let created_at = Utc::now();
        let tasks = mode
            .catalog()
            .into_iter()
            .map(|style| (style.clone(), Task::new(style, created_at)))
            .collect();
        Self {
            project_id,
            source_image,
            subject,
            mode,
            aspect_ratio,
            created_at,
            tasks,
        }
    }

    pub fn task(&self, style: &Style) -> Option<&Task> {
        self.tasks.get(style)
    }

    /// 所有任务都到达终态
    pub fn is_settled(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    /// 按目录顺序遍历任务
    pub fn ordered_tasks(&self) -> impl Iterator<Item = &Task> + '_ {
        self.mode
            .catalog()
            .into_iter()
            .filter_map(move |style| self.tasks.get(&style))
    }

    /// 投影出进度（供 UI / CLI 展示）
    pub fn progress(&self) -> BatchProgress {
        let mut p = BatchProgress {
            total: self.tasks.len(),
            ..BatchProgress::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => {}
                TaskStatus::Running => p.running += 1,
                TaskStatus::Succeeded { .. } => p.succeeded += 1,
                TaskStatus::Failed { .. } => p.failed += 1,
            }
        }
        p
    }
}

/// 批次进度投影；只有终态任务计入 completed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchProgress {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// 持久化记录：批次 + 最近一次写入时间，按 projectId 覆盖写
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    #[serde(flatten)]
    pub batch: Batch,
    pub timestamp: DateTime<Utc>,
}

impl ProjectSnapshot {
    pub fn capture(batch: &Batch) -> Self {
        Self {
            batch: batch.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.batch.project_id
    }
}
