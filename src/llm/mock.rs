//! Mock LLM 客户端（离线演示用，无需 API）
//!
//! 根据提示词的首个非空行生成固定格式的 Markdown，便于本地跑通整条研究流水线。

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// Mock 客户端：把最后一条 User 消息的首行回写为一段 Markdown
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let headline = last_user
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("(empty prompt)");

        Ok(format!(
            "## Mock output\n\n{}\n\n(prompt length: {} chars)",
            headline,
            last_user.chars().count()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_echoes_first_line() {
        let out = MockLlmClient
            .generate("\n   Original query: \"rust async\"\nmore")
            .await
            .unwrap();
        assert!(out.contains("Original query: \"rust async\""));
    }
}
