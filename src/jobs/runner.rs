//! 任务执行器：校验提交、登记任务、在独立 tokio 任务中运行编排器
//!
//! 每个任务一个编排器，进度消息经 mpsc 通道流入登记表；
//! 截止计时器与流水线赛跑，超时后丢弃流水线 future 并以部分结果收尾。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::ResearchSection;
use crate::core::{ResearchError, ValidationError};
use crate::jobs::job::JobConfig;
use crate::jobs::registry::{JobHandle, JobRegistry};
use crate::llm::{LlmFactory, ProviderSelection};
use crate::research::ResearchOrchestrator;
use crate::sources::SourceSet;

/// 一次研究提交（已通过 HTTP 层解析）
#[derive(Debug, Clone)]
pub struct Submission {
    pub query: String,
    pub selection: ProviderSelection,
    pub max_iterations: usize,
}

#[derive(Clone)]
pub struct JobRunner {
    registry: Arc<JobRegistry>,
    llm_factory: Arc<dyn LlmFactory>,
    sources: Arc<SourceSet>,
    settings: ResearchSection,
    deadline: Duration,
}

impl JobRunner {
    pub fn new(
        registry: Arc<JobRegistry>,
        llm_factory: Arc<dyn LlmFactory>,
        sources: Arc<SourceSet>,
        settings: ResearchSection,
    ) -> Self {
        let deadline = settings.job_timeout();
        Self {
            registry,
            llm_factory,
            sources,
            settings,
            deadline,
        }
    }

    /// 覆盖配置中的任务截止时间
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ResearchSection {
        &self.settings
    }

    pub fn validate(&self, submission: &Submission) -> Result<(), ValidationError> {
        if submission.query.trim().is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        let max = self.settings.max_iterations_limit;
        if submission.max_iterations == 0 || submission.max_iterations > max {
            return Err(ValidationError::InvalidIterations {
                got: submission.max_iterations,
                max,
            });
        }
        Ok(())
    }

    /// 校验并登记任务，立即返回；流水线在后台运行
    pub async fn submit(&self, submission: Submission) -> Result<Arc<JobHandle>, ValidationError> {
        self.validate(&submission)?;

        let model = submission
            .selection
            .model
            .clone()
            .unwrap_or_else(|| self.llm_factory.default_model(submission.selection.provider));
        let config = JobConfig {
            provider: submission.selection.provider,
            model,
            max_iterations: submission.max_iterations,
        };
        let handle = self
            .registry
            .create(submission.query.trim(), config)
            .await;

        tracing::info!(
            job_id = %handle.id(),
            provider = %submission.selection.provider,
            max_iterations = submission.max_iterations,
            "Research submitted"
        );

        let runner = self.clone();
        let job = handle.clone();
        tokio::spawn(async move {
            runner.run_job(job, submission).await;
        });
        Ok(handle)
    }

    async fn run_job(self, handle: Arc<JobHandle>, submission: Submission) {
        if !handle.mark_running().await {
            return;
        }

        let llm = match self.llm_factory.create(&submission.selection) {
            Ok(llm) => llm,
            Err(e) => {
                handle.fail(&e.to_string()).await;
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let pump_handle = handle.clone();
        let pump = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                pump_handle.record(message).await;
            }
        });

        let orchestrator = ResearchOrchestrator::new(
            llm,
            self.sources.clone(),
            self.settings.clone(),
            tx,
            handle.cancel_token(),
        );
        let query = submission.query.trim().to_string();
        let outcome = tokio::time::timeout(
            self.deadline,
            orchestrator.run(&query, submission.max_iterations),
        )
        .await;

        // 关闭发送端，等通道里剩余的事件全部入日志后再写终止事件
        drop(orchestrator);
        if let Err(e) = pump.await {
            tracing::error!(job_id = %handle.id(), error = %e, "Event pump task failed");
        }

        match outcome {
            Ok(Ok(report)) => {
                handle.complete(report).await;
            }
            Ok(Err(ResearchError::Cancelled)) => {
                // 用户取消时终止事件已写入；这里只处理服务关闭等其它来源
                handle.cancel("research cancelled: server shutting down").await;
            }
            Ok(Err(e)) => {
                handle.fail(&e.to_string()).await;
            }
            Err(_) => {
                tracing::warn!(
                    job_id = %handle.id(),
                    deadline_secs = self.deadline.as_secs(),
                    "Research deadline exceeded"
                );
                handle.time_out().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmClient, LlmError, LlmProvider, MockLlmClient};

    struct MockOnly;

    impl LlmFactory for MockOnly {
        fn create(&self, _selection: &ProviderSelection) -> Result<Arc<dyn LlmClient>, LlmError> {
            Ok(Arc::new(MockLlmClient))
        }

        fn default_model(&self, _provider: LlmProvider) -> String {
            "stub-model".into()
        }
    }

    fn runner() -> JobRunner {
        JobRunner::new(
            Arc::new(JobRegistry::new()),
            Arc::new(MockOnly),
            Arc::new(SourceSet::new()),
            ResearchSection::default(),
        )
    }

    fn submission(query: &str, max_iterations: usize) -> Submission {
        Submission {
            query: query.into(),
            selection: ProviderSelection::parse("mock", None, None).unwrap(),
            max_iterations,
        }
    }

    #[test]
    fn test_validation() {
        let r = runner();
        assert_eq!(
            r.validate(&submission("  ", 3)),
            Err(ValidationError::EmptyQuery)
        );
        assert_eq!(
            r.validate(&submission("q", 0)),
            Err(ValidationError::InvalidIterations { got: 0, max: 20 })
        );
        assert!(r.validate(&submission("q", 20)).is_ok());
    }

    #[tokio::test]
    async fn test_submit_records_default_model() {
        let r = runner();
        let handle = r.submit(submission(" rust ", 1)).await.unwrap();
        let job = handle.snapshot().await;
        assert_eq!(job.config.model, "stub-model");
        assert_eq!(job.query, "rust");
    }
}
