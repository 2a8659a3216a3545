//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SHOTLINE__*` 覆盖（双下划线表示嵌套，如 `SHOTLINE__GENERATION__CONCURRENCY=2`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::backend::AspectRatio;
use crate::catalog::SubjectMode;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// [app] 段：输出目录、默认模式与画幅
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub default_mode: SubjectMode,
    #[serde(default)]
    pub default_aspect_ratio: AspectRatio,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            default_mode: SubjectMode::default(),
            default_aspect_ratio: AspectRatio::default(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("shots")
}

/// [generation] 段：并发与轮间停顿
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSection {
    /// 每轮并发的任务数；默认 1（完全串行，照顾后端限流）
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_inter_round_pause_ms")]
    pub inter_round_pause_ms: u64,
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            inter_round_pause_ms: default_inter_round_pause_ms(),
            retry: RetrySection::default(),
        }
    }
}

fn default_concurrency() -> usize {
    1
}

fn default_inter_round_pause_ms() -> u64 {
    1000
}

/// [generation.retry] 段：限流重试次数与退避基数
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// [backend] 段：后端选择、端点、模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    /// http / mock；http 但未设置 API Key 时退化为 mock
    #[serde(default = "default_provider")]
    pub provider: String,
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_analyzer_model")]
    pub analyzer_model: String,
    /// 读取 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            analyzer_model: default_analyzer_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "http".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

fn default_analyzer_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

/// [store] 段：项目快照存储
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// 仅内存存储（进程退出即丢失）
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            in_memory: false,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("shotline.db")
}

/// 从 config 目录加载配置，环境变量 SHOTLINE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 则追加该文件（可覆盖前面的键）；文件不存在时返回 NotFound
/// 3. 最后叠加环境变量 SHOTLINE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if !path.exists() {
            return Err(config::ConfigError::NotFound(path.display().to_string()));
        }
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SHOTLINE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
