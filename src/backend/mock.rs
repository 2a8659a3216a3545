//! Mock 后端（用于测试与无 API Key 的本地运行）
//!
//! MockGenerationBackend 默认成功，输出 = 源图字节 + "|" + Prompt，便于断言结果来自哪张源图；
//! 可按风格预置一串结果（脚本），并记录每次调用的时间点。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{AnalysisError, Analyzer, GenerationBackend, GenerationError, GenerationRequest};
use crate::catalog::Style;
use crate::core::{ImageData, SubjectDescriptor};

/// 一次被记录的调用
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub style: Option<Style>,
    pub prompt: String,
    pub at: tokio::time::Instant,
}

/// 可脚本化的生成后端
#[derive(Default)]
pub struct MockGenerationBackend {
    scripts: Mutex<HashMap<Style, VecDeque<Result<(), GenerationError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Duration,
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用前等待的时间（模拟网络耗时）
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 为某风格追加一个预置结果；脚本耗尽后恢复默认成功
    pub fn script(self, style: impl Into<Style>, outcome: Result<(), GenerationError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(style.into())
            .or_default()
            .push_back(outcome);
        self
    }

    /// 为某风格连续预置 n 次限流
    pub fn rate_limit(self, style: &str, times: usize) -> Self {
        (0..times).fold(self, |b, i| {
            b.script(style, Err(GenerationError::RateLimited(format!("429 #{}", i + 1))))
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, style: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.style.as_ref().map(Style::as_str) == Some(style))
            .collect()
    }

    /// 默认输出：源图字节 + "|" + Prompt
    pub fn render(request: &GenerationRequest) -> ImageData {
        let mut data = request
            .image
            .as_ref()
            .map(|i| i.data.clone())
            .unwrap_or_default();
        data.push(b'|');
        data.extend_from_slice(request.prompt.as_bytes());
        ImageData::new("image/png", data)
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageData, GenerationError> {
        self.calls.lock().unwrap().push(RecordedCall {
            style: request.style.clone(),
            prompt: request.prompt.clone(),
            at: tokio::time::Instant::now(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = request
            .style
            .as_ref()
            .and_then(|s| self.scripts.lock().unwrap().get_mut(s).and_then(VecDeque::pop_front));

        match scripted {
            Some(Err(e)) => Err(e),
            _ => Ok(Self::render(request)),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Mock 分析器：返回固定描述或固定失败
#[derive(Debug, Clone)]
pub struct MockAnalyzer {
    result: Option<SubjectDescriptor>,
}

impl MockAnalyzer {
    pub fn new(descriptor: SubjectDescriptor) -> Self {
        Self {
            result: Some(descriptor),
        }
    }

    pub fn failing() -> Self {
        Self { result: None }
    }
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new(SubjectDescriptor {
            name: "Mock Subject".to_string(),
            description: "A subject described by the mock analyzer.".to_string(),
            category: "mock".to_string(),
            confidence: 1.0,
            ..SubjectDescriptor::default()
        })
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, _image: &ImageData) -> Result<SubjectDescriptor, AnalysisError> {
        self.result
            .clone()
            .ok_or_else(|| AnalysisError::Unavailable("mock analyzer configured to fail".into()))
    }
}
