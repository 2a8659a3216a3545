//! HTTP 后端（generateContent 风格的 REST 接口）
//!
//! - 生成：POST {base_url}/models/{model}:generateContent，图片以 base64 inlineData 发送，
//!   响应中取第一段 inlineData 作为结果
//! - 分析：同一接口，要求模型返回 JSON 文本，按 SubjectDescriptor 严格解码
//!
//! 错误分类：HTTP 429 或响应体含 RESOURCE_EXHAUSTED 视为限流，其余一律 Other。

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::backend::{
    decode_descriptor, AnalysisError, Analyzer, GenerationBackend, GenerationError,
    GenerationRequest,
};
use crate::core::{ImageData, SubjectDescriptor};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const ANALYZE_PROMPT: &str = "Analyze the main subject of this photo. Reply with a single JSON object: \
{\"name\": string, \"description\": string, \"category\": string, \"confidence\": number 0..1, \
\"isHuman\": boolean, \"framingQuality\": \"ok\"|\"too_far\"|\"cut_off\"|\"empty\", \
\"recommendations\": string[]}. No other text.";

/// 将 HTTP 错误状态与响应体映射为生成错误
pub fn classify_http_error(status: u16, body: &str) -> GenerationError {
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
        GenerationError::RateLimited(truncate(body, 300))
    } else {
        GenerationError::Other(format!("HTTP {}: {}", status, truncate(body, 300)))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl ContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates.iter().flat_map(|c| c.content.parts.iter())
    }
}

fn image_part(image: &ImageData) -> Part {
    Part {
        text: None,
        inline_data: Some(InlineData {
            mime_type: image.mime_type.clone(),
            data: STANDARD.encode(&image.data),
        }),
    }
}

fn text_part(text: &str) -> Part {
    Part {
        text: Some(text.to_string()),
        inline_data: None,
    }
}

/// 共享的 HTTP 连接与鉴权
#[derive(Clone)]
struct ContentClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ContentClient {
    fn new(base_url: Option<&str>, api_key: &str, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn post(&self, model: &str, body: &ContentRequest) -> Result<ContentResponse, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Other(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GenerationError::Other(format!("read body failed: {e}")))?;
        if !status.is_success() {
            return Err(classify_http_error(status.as_u16(), &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| GenerationError::Other(format!("malformed response: {e}")))
    }
}

/// HTTP 图片生成后端
pub struct HttpGenerationBackend {
    client: ContentClient,
    model: String,
}

impl HttpGenerationBackend {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        Self {
            client: ContentClient::new(base_url, api_key, timeout_secs),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageData, GenerationError> {
        let mut parts = Vec::with_capacity(2);
        if let Some(image) = &request.image {
            parts.push(image_part(image));
        }
        parts.push(text_part(&request.prompt));

        let body = ContentRequest {
            contents: vec![Content { parts }],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["IMAGE".to_string()]),
                response_mime_type: None,
                image_config: Some(ImageConfig {
                    aspect_ratio: request.aspect_ratio.to_backend().to_string(),
                }),
            }),
        };

        let resp = self.client.post(&self.model, &body).await?;
        let inline = resp
            .parts()
            .find_map(|p| p.inline_data.as_ref())
            .ok_or_else(|| GenerationError::Other("response contained no image".to_string()))?;
        let data = STANDARD
            .decode(&inline.data)
            .map_err(|e| GenerationError::Other(format!("invalid image data: {e}")))?;
        Ok(ImageData::new(inline.mime_type.clone(), data))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// HTTP 主体分析器
pub struct HttpAnalyzer {
    client: ContentClient,
    model: String,
}

impl HttpAnalyzer {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> Self {
        Self {
            client: ContentClient::new(base_url, api_key, timeout_secs),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, image: &ImageData) -> Result<SubjectDescriptor, AnalysisError> {
        let body = ContentRequest {
            contents: vec![Content {
                parts: vec![image_part(image), text_part(ANALYZE_PROMPT)],
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: None,
                response_mime_type: Some("application/json".to_string()),
                image_config: None,
            }),
        };

        let resp = self
            .client
            .post(&self.model, &body)
            .await
            .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;
        let text = resp
            .parts()
            .find_map(|p| p.text.as_deref())
            .ok_or_else(|| AnalysisError::Malformed("response contained no text".to_string()))?;
        decode_descriptor(text)
    }
}
