//! 研究任务记录

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::LlmProvider;

/// 部分结果的固定格式
pub const PARTIAL_HEADER: &str = "# Partial Results";
pub const PARTIAL_SEPARATOR: &str = "## New Analysis";
pub const TIMEOUT_FALLBACK: &str =
    "# Partial Result (Timeout)\n\nThe research exceeded the time limit before it could be completed.";

/// 任务状态；终态之后不再变化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Running,
    Completed,
    Timeout,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Timeout => "timeout",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Timeout | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务使用的后端配置（不含 apiKey）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub max_iterations: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub config: JobConfig,
    pub query: String,
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub last_message: Option<String>,
    pub completion_time: Option<DateTime<Utc>>,
    pub partial_result: String,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(query: impl Into<String>, config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Created,
            config,
            query: query.into(),
            progress: 0,
            start_time: now,
            last_update: now,
            last_message: None,
            completion_time: None,
            partial_result: String::new(),
            result: None,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn has_partial_result(&self) -> bool {
        !self.partial_result.is_empty()
    }

    /// 追加一段分析片段到部分结果
    pub fn push_partial(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        if self.partial_result.is_empty() {
            self.partial_result = format!("{}\n\n{}", PARTIAL_HEADER, fragment);
        } else {
            self.partial_result
                .push_str(&format!("\n\n{}\n\n{}", PARTIAL_SEPARATOR, fragment));
        }
    }

    /// 超时时对外给出的结果：部分结果或固定说明
    pub fn timeout_result(&self) -> String {
        if self.has_partial_result() {
            self.partial_result.clone()
        } else {
            TIMEOUT_FALLBACK.to_string()
        }
    }

    /// 失败时对外给出的结果：有部分结果时附上错误说明
    pub fn failure_result(&self, error: &str) -> Option<String> {
        self.has_partial_result().then(|| {
            format!(
                "# Partial Result (Error)\n\n{}\n\n## Error\n\n{}",
                self.partial_result, error
            )
        })
    }
}
