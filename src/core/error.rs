//! 研究任务的错误分类
//!
//! - ValidationError：请求字段缺失或非法，任务创建前即拒绝
//! - Collaborator：检索 / 抓取 / 文本生成失败（单条失败在流水线内以数据形式记录，不会走到这里）
//! - Timeout / Cancelled：任务级截止与协作式取消
//! - Unexpected：其它阶段内故障

use thiserror::Error;

use crate::llm::LlmError;

/// 提交请求的校验错误（HTTP 400）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("provider '{0}' requires an apiKey")]
    MissingApiKey(String),

    #[error("unknown provider '{0}' (expected openai, ollama, deepseek or mock)")]
    UnknownProvider(String),

    #[error("maxIterations must be between 1 and {max}, got {got}")]
    InvalidIterations { got: usize, max: usize },
}

/// 研究流水线中止的原因
#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("text generation failed during {stage}: {source}")]
    Collaborator {
        stage: &'static str,
        #[source]
        source: LlmError,
    },

    #[error("research exceeded the deadline of {0}s")]
    Timeout(u64),

    #[error("research was cancelled")]
    Cancelled,

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl ResearchError {
    pub fn collaborator(stage: &'static str, source: LlmError) -> Self {
        Self::Collaborator { stage, source }
    }
}
