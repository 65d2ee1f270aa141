//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SEEKER__*` 覆盖（双下划线表示嵌套，如 `SEEKER__SERVER__PORT=9000`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub llm: LlmSection,
    pub research: ResearchSection,
    pub stream: StreamSection,
    pub registry: RegistrySection,
    pub sources: SourcesSection,
}

/// [server] 段：监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// 允许任意来源的跨域请求（仪表盘与 API 分开部署时需要）
    pub cors_permissive: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_permissive: true,
        }
    }
}

/// [llm] 段：各后端默认模型、超时与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub default_provider: String,
    pub openai_model: String,
    pub openai_base_url: Option<String>,
    pub ollama_model: String,
    pub ollama_base_url: String,
    pub deepseek_model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub retry: RetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            openai_model: "gpt-3.5-turbo".to_string(),
            openai_base_url: None,
            ollama_model: "llama2".to_string(),
            ollama_base_url: "http://localhost:11434/v1".to_string(),
            deepseek_model: "deepseek-chat".to_string(),
            temperature: 0.7,
            request_timeout_secs: 120,
            retry: RetrySection::default(),
        }
    }
}

/// [llm.retry] 段：瞬时错误的指数退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            backoff_multiplier: 2.0,
        }
    }
}

/// [research] 段：流水线常量（迭代上限、截断长度、充分性判定）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchSection {
    pub default_max_iterations: usize,
    /// 请求中 maxIterations 的上限
    pub max_iterations_limit: usize,
    /// 单个任务的截止时间（秒）
    pub job_timeout_secs: u64,
    pub results_per_search: usize,
    /// 送入摘要提示词前，页面正文截断到的字符数
    pub summary_input_chars: usize,
    pub sufficiency_min_chars: usize,
    pub sufficiency_marker: String,
    pub insights_preview_chars: usize,
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            default_max_iterations: 3,
            max_iterations_limit: 20,
            job_timeout_secs: 1800,
            results_per_search: 5,
            summary_input_chars: 8000,
            sufficiency_min_chars: 2000,
            sufficiency_marker: "sufficient information".to_string(),
            insights_preview_chars: 200,
        }
    }
}

impl ResearchSection {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// [stream] 段：SSE 心跳与最长连接时间
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub heartbeat_secs: u64,
    /// 每转发多少条事件后补发一次心跳
    pub heartbeat_every_events: usize,
    pub max_lifetime_secs: u64,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            heartbeat_secs: 15,
            heartbeat_every_events: 5,
            max_lifetime_secs: 1800,
        }
    }
}

/// [registry] 段：任务记录保留时长
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub retention_hours: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            cleanup_interval_secs: 3600,
        }
    }
}

impl RegistrySection {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }
}

/// [sources] 段：检索后端地址、抓取超时、正文上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesSection {
    /// SearXNG 实例（按顺序尝试，JSON 格式输出需在实例上开启）
    pub searxng_urls: Vec<String>,
    pub arxiv_api_url: String,
    pub arxiv_max_results: usize,
    pub wikipedia_lang: String,
    pub wikipedia_max_results: usize,
    pub fetch_timeout_secs: u64,
    pub max_content_chars: usize,
    pub user_agent: String,
}

impl Default for SourcesSection {
    fn default() -> Self {
        Self {
            searxng_urls: vec![
                "https://searx.be".to_string(),
                "http://localhost:8888".to_string(),
            ],
            arxiv_api_url: "http://export.arxiv.org/api/query".to_string(),
            arxiv_max_results: 3,
            wikipedia_lang: "en".to_string(),
            wikipedia_max_results: 1,
            fetch_timeout_secs: 10,
            max_content_chars: 20000,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
        }
    }
}

impl SourcesSection {
    /// 环境变量 SEARXNG_URL 优先于配置中的实例列表
    pub fn resolved_searxng_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if let Ok(custom) = std::env::var("SEARXNG_URL") {
            if !custom.trim().is_empty() {
                urls.push(custom.trim().to_string());
            }
        }
        urls.extend(self.searxng_urls.iter().cloned());
        urls
    }
}

/// 从 config 目录加载配置，环境变量 SEEKER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SEEKER__*（双下划线表示嵌套键）
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
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SEEKER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.research.results_per_search, 5);
        assert_eq!(cfg.research.summary_input_chars, 8000);
        assert_eq!(cfg.research.sufficiency_min_chars, 2000);
        assert_eq!(cfg.registry.retention_hours, 24);
        assert_eq!(cfg.stream.heartbeat_every_events, 5);
        assert_eq!(cfg.research.job_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 9100\n\n[research]\njob_timeout_secs = 60\n\n[llm.retry]\nmax_retries = 5"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.research.job_timeout_secs, 60);
        assert_eq!(cfg.llm.retry.max_retries, 5);
        // 未出现的键保持默认
        assert_eq!(cfg.research.results_per_search, 5);
        assert_eq!(cfg.llm.ollama_model, "llama2");
    }
}
