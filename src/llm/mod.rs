//! LLM 层：文本生成器抽象与实现（OpenAI 兼容 / Ollama / DeepSeek / Mock）

pub mod message;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod traits;

pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use provider::{LlmFactory, LlmProvider, ProviderLlmFactory, ProviderSelection, DEEPSEEK_BASE_URL};
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{LlmClient, LlmError};
