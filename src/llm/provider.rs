//! 后端选择：根据请求中的 provider / apiKey / model 创建 LlmClient
//!
//! - openai：需要 apiKey，可配置 base_url
//! - deepseek：需要 apiKey，OpenAI 兼容端点 https://api.deepseek.com
//! - ollama：本地 OpenAI 兼容端点，无需 apiKey
//! - mock：离线演示

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::LlmSection;
use crate::core::ValidationError;
use crate::llm::{LlmClient, LlmError, MockLlmClient, OpenAiClient, RetryConfig, RetryingLlmClient};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// 支持的文本生成后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
    DeepSeek,
    Mock,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Ollama => "ollama",
            LlmProvider::DeepSeek => "deepseek",
            LlmProvider::Mock => "mock",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, LlmProvider::OpenAi | LlmProvider::DeepSeek)
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "ollama" => Ok(LlmProvider::Ollama),
            "deepseek" => Ok(LlmProvider::DeepSeek),
            "mock" => Ok(LlmProvider::Mock),
            other => Err(ValidationError::UnknownProvider(other.to_string())),
        }
    }
}

/// 一次任务使用的后端选择（apiKey 只在这里出现，不会写入任务快照）
#[derive(Clone)]
pub struct ProviderSelection {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl fmt::Debug for ProviderSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSelection")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .finish()
    }
}

impl ProviderSelection {
    /// 解析 provider 并检查凭据；空白字符串视为未提供
    pub fn parse(
        provider: &str,
        api_key: Option<String>,
        model: Option<String>,
    ) -> Result<Self, ValidationError> {
        let provider: LlmProvider = provider.parse()?;
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        let model = model.filter(|m| !m.trim().is_empty());
        if provider.requires_api_key() && api_key.is_none() {
            return Err(ValidationError::MissingApiKey(provider.to_string()));
        }
        Ok(Self {
            provider,
            api_key,
            model,
        })
    }
}

/// 创建文本生成器的工厂；任务执行器通过它拿到每个任务自己的客户端
pub trait LlmFactory: Send + Sync {
    fn create(&self, selection: &ProviderSelection) -> Result<Arc<dyn LlmClient>, LlmError>;

    /// 请求未指定 model 时使用的模型名
    fn default_model(&self, provider: LlmProvider) -> String;
}

/// 基于配置的默认工厂：OpenAI 兼容客户端外再包一层重试
pub struct ProviderLlmFactory {
    section: LlmSection,
}

impl ProviderLlmFactory {
    pub fn new(section: LlmSection) -> Self {
        Self { section }
    }

    fn openai_compatible(&self, base_url: Option<&str>, model: &str, api_key: &str) -> OpenAiClient {
        OpenAiClient::new(base_url, model, api_key)
            .with_temperature(self.section.temperature)
            .with_request_timeout(Duration::from_secs(self.section.request_timeout_secs))
    }
}

impl LlmFactory for ProviderLlmFactory {
    fn create(&self, selection: &ProviderSelection) -> Result<Arc<dyn LlmClient>, LlmError> {
        let model = selection
            .model
            .clone()
            .unwrap_or_else(|| self.default_model(selection.provider));
        let key = selection.api_key.as_deref();

        let client: Arc<dyn LlmClient> = match selection.provider {
            LlmProvider::OpenAi => {
                let key = key.ok_or_else(|| LlmError::Config("openai requires an api key".into()))?;
                Arc::new(self.openai_compatible(self.section.openai_base_url.as_deref(), &model, key))
            }
            LlmProvider::DeepSeek => {
                let key = key.ok_or_else(|| LlmError::Config("deepseek requires an api key".into()))?;
                Arc::new(self.openai_compatible(Some(DEEPSEEK_BASE_URL), &model, key))
            }
            LlmProvider::Ollama => Arc::new(self.openai_compatible(
                Some(&self.section.ollama_base_url),
                &model,
                key.unwrap_or("ollama"),
            )),
            LlmProvider::Mock => return Ok(Arc::new(MockLlmClient)),
        };

        tracing::info!(provider = %selection.provider, model = %model, "LLM client created");
        Ok(Arc::new(RetryingLlmClient::new(
            client,
            RetryConfig::from(&self.section.retry),
        )))
    }

    fn default_model(&self, provider: LlmProvider) -> String {
        match provider {
            LlmProvider::OpenAi => self.section.openai_model.clone(),
            LlmProvider::Ollama => self.section.ollama_model.clone(),
            LlmProvider::DeepSeek => self.section.deepseek_model.clone(),
            LlmProvider::Mock => "mock".to_string(),
        }
    }
}
