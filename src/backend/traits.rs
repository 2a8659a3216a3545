//! 后端抽象：生成后端与主体分析器
//!
//! 所有实现（HTTP / Mock）实现 GenerationBackend 与 Analyzer。生成错误只区分限流与其它两类，
//! 由重试策略决定是否重试；分析错误永远不会传给调用方（analyze_or_default 兜底）。

use async_trait::async_trait;
use thiserror::Error;

use crate::backend::AspectRatio;
use crate::catalog::Style;
use crate::core::{ImageData, SubjectDescriptor};

/// 生成后端错误分类
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Generation failed: {0}")]
    Other(String),
}

impl GenerationError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GenerationError::RateLimited(_))
    }
}

/// 分析器错误（非致命）
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Analyzer unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed analyzer output: {0}")]
    Malformed(String),
}

/// 单次生成请求
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// 所属风格，仅用于日志与测试脚本，后端不应依赖
    pub style: Option<Style>,
    pub image: Option<ImageData>,
    pub prompt: String,
    /// 已映射到后端支持的比例
    pub aspect_ratio: AspectRatio,
}

impl GenerationRequest {
    pub fn new(image: Option<ImageData>, prompt: impl Into<String>, aspect_ratio: AspectRatio) -> Self {
        Self {
            style: None,
            image,
            prompt: prompt.into(),
            aspect_ratio: aspect_ratio.to_backend(),
        }
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }
}

/// 生成后端：给定图片 + Prompt + 比例，返回生成的图片或分类后的错误
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageData, GenerationError>;

    /// 后端名称（日志用）
    fn name(&self) -> &str {
        "unknown"
    }
}

/// 主体分析器
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, image: &ImageData) -> Result<SubjectDescriptor, AnalysisError>;
}

/// 调用分析器，任何失败都退化为默认描述
pub async fn analyze_or_default(analyzer: &dyn Analyzer, image: &ImageData) -> SubjectDescriptor {
    match analyzer.analyze(image).await {
        Ok(descriptor) => descriptor,
        Err(e) => {
            tracing::warn!(error = %e, "Subject analysis failed, using default descriptor");
            SubjectDescriptor::default()
        }
    }
}

/// 严格解码分析器返回的 JSON 文本（允许外层 ```json 代码块）
pub fn decode_descriptor(text: &str) -> Result<SubjectDescriptor, AnalysisError> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let mut descriptor: SubjectDescriptor =
        serde_json::from_str(body).map_err(|e| AnalysisError::Malformed(e.to_string()))?;
    if !descriptor.confidence.is_finite() {
        descriptor.confidence = 0.0;
    }
    descriptor.confidence = descriptor.confidence.clamp(0.0, 1.0);
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockAnalyzer;
    use crate::core::FramingQuality;

    #[test]
    fn test_decode_descriptor_with_fence() {
        let text = "```json\n{\"name\":\"Watch\",\"description\":\"Steel\",\"category\":\"accessory\",\"confidence\":1.7,\"isHuman\":false,\"framingQuality\":\"cut_off\",\"recommendations\":[\"step back\"]}\n```";
        let d = decode_descriptor(text).unwrap();
        assert_eq!(d.name, "Watch");
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.framing_quality, FramingQuality::CutOff);
        assert_eq!(d.recommendations, vec!["step back".to_string()]);
    }

    #[test]
    fn test_decode_descriptor_rejects_malformed() {
        assert!(matches!(
            decode_descriptor("not json at all"),
            Err(AnalysisError::Malformed(_))
        ));
        assert!(matches!(
            decode_descriptor(r#"{"name": 3}"#),
            Err(AnalysisError::Malformed(_))
        ));
    }

    #[test]
    fn test_request_maps_aspect_ratio() {
        let req = GenerationRequest::new(None, "p", AspectRatio::Portrait2x3);
        assert_eq!(req.aspect_ratio, AspectRatio::Portrait3x4);
    }

    #[tokio::test]
    async fn test_analyze_or_default_swallows_errors() {
        let image = ImageData::new("image/png", vec![0]);
        let d = analyze_or_default(&MockAnalyzer::failing(), &image).await;
        assert_eq!(d, SubjectDescriptor::default());
        assert_eq!(d.confidence, 0.0);
    }
}
