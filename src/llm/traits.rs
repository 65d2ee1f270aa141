//! 文本生成器抽象
//!
//! 所有后端（OpenAI 兼容 / Ollama / DeepSeek / Mock）实现 LlmClient；研究流水线只依赖这一个接口。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::Message;

/// 文本生成失败的原因；Timeout / RateLimited / Connection 视为瞬时错误，可重试
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("client misconfigured: {0}")]
    Config(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Timeout(_) | LlmError::RateLimited(_) | LlmError::Connection(_)
        )
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 单条 user 提示词的便捷入口
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete(&[Message::user(prompt)]).await
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
