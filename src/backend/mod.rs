//! 后端层：生成后端与分析器抽象、画幅映射、HTTP / Mock 实现

pub mod aspect;
pub mod http;
pub mod mock;
pub mod traits;

use std::sync::Arc;

pub use aspect::AspectRatio;
pub use http::{HttpAnalyzer, HttpGenerationBackend};
pub use mock::{MockAnalyzer, MockGenerationBackend};
pub use traits::{
    analyze_or_default, decode_descriptor, AnalysisError, Analyzer, GenerationBackend,
    GenerationError, GenerationRequest,
};

use crate::config::AppConfig;

/// 根据配置与环境变量选择后端（HTTP / Mock）
pub fn create_backends_from_config(
    cfg: &AppConfig,
) -> (Arc<dyn GenerationBackend>, Arc<dyn Analyzer>) {
    let provider = cfg.backend.provider.to_lowercase();
    let api_key = std::env::var(&cfg.backend.api_key_env).ok();

    match (provider.as_str(), api_key) {
        ("http", Some(key)) => {
            let base = cfg.backend.base_url.as_deref();
            tracing::info!(
                model = %cfg.backend.model,
                analyzer = %cfg.backend.analyzer_model,
                "Using HTTP generation backend"
            );
            (
                Arc::new(HttpGenerationBackend::new(
                    base,
                    &cfg.backend.model,
                    &key,
                    cfg.backend.timeout_secs,
                )),
                Arc::new(HttpAnalyzer::new(
                    base,
                    &cfg.backend.analyzer_model,
                    &key,
                    cfg.backend.timeout_secs,
                )),
            )
        }
        ("mock", _) => {
            tracing::info!("Using mock generation backend");
            (Arc::new(MockGenerationBackend::new()), Arc::new(MockAnalyzer::default()))
        }
        _ => {
            tracing::warn!(
                "No API key in {} or provider unknown, using mock backend",
                cfg.backend.api_key_env
            );
            (Arc::new(MockGenerationBackend::new()), Arc::new(MockAnalyzer::default()))
        }
    }
}
