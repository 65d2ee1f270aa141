//! 任务登记表：按 ID 存放任务记录与事件日志
//!
//! 外层 `RwLock<HashMap>` 只在创建 / 查找 / 清理时短暂持有；每个任务各自一把锁，
//! 写者只有该任务的执行器（外加一次性的取消请求），读者不限。
//! 终态切换与终止事件在同一把写锁内完成，保证每个任务恰好一个终止事件。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::jobs::event::{EventLog, EventType, ResearchEvent};
use crate::jobs::job::{Job, JobConfig, JobStatus};
use crate::research::PipelineMessage;

struct JobEntry {
    job: Job,
    log: EventLog,
}

/// 单个任务的共享句柄
pub struct JobHandle {
    id: String,
    inner: RwLock<JobEntry>,
    /// 当前事件数；每次追加后更新，供流式订阅者等待
    appended: watch::Sender<usize>,
    cancel: CancellationToken,
}

impl JobHandle {
    fn new(job: Job, cancel: CancellationToken) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            id: job.id.clone(),
            inner: RwLock::new(JobEntry {
                job,
                log: EventLog::new(),
            }),
            appended,
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn snapshot(&self) -> Job {
        self.inner.read().await.job.clone()
    }

    pub async fn status(&self) -> JobStatus {
        self.inner.read().await.job.status
    }

    pub async fn event_count(&self) -> usize {
        self.inner.read().await.log.len()
    }

    pub async fn events_from(&self, cursor: usize) -> Vec<ResearchEvent> {
        self.inner.read().await.log.from_cursor(cursor)
    }

    /// 订阅事件追加通知（值为当前事件总数）
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.appended.subscribe()
    }

    fn append_locked(
        &self,
        entry: &mut JobEntry,
        event_type: EventType,
        message: String,
        details: serde_json::Value,
    ) -> bool {
        let appended = entry
            .log
            .append(&self.id, event_type, message.as_str(), details)
            .map(|_| ());
        match appended {
            Ok(()) => {
                tracing::info!("[{}] {}: {}", self.id, event_type, message);
                entry.job.last_update = Utc::now();
                entry.job.last_message = Some(message);
                entry.job.progress = event_type.progress_after(entry.job.progress);
                self.appended.send_replace(entry.log.len());
                true
            }
            Err(reason) => {
                tracing::debug!(job_id = %self.id, event = %event_type, ?reason, "Event dropped");
                false
            }
        }
    }

    /// created → running
    pub async fn mark_running(&self) -> bool {
        let mut entry = self.inner.write().await;
        if entry.job.status != JobStatus::Created {
            return false;
        }
        entry.job.status = JobStatus::Running;
        entry.job.progress = entry.job.progress.max(10);
        entry.job.last_update = Utc::now();
        true
    }

    /// 接收编排器消息；终态之后的消息一律丢弃
    pub async fn record(&self, message: PipelineMessage) {
        let mut entry = self.inner.write().await;
        if entry.job.is_finished() {
            return;
        }
        match message {
            PipelineMessage::Event {
                event_type,
                message,
                details,
            } => {
                if event_type.is_terminal() {
                    tracing::warn!(job_id = %self.id, event = %event_type, "Terminal events are reserved for state transitions");
                    return;
                }
                self.append_locked(&mut entry, event_type, message, details);
            }
            PipelineMessage::Partial(fragment) => entry.job.push_partial(&fragment),
        }
    }

    fn finish_locked(
        &self,
        entry: &mut JobEntry,
        status: JobStatus,
        event_type: EventType,
        message: String,
        details: serde_json::Value,
    ) {
        entry.job.status = status;
        entry.job.completion_time = Some(Utc::now());
        self.append_locked(entry, event_type, message, details);
    }

    pub async fn complete(&self, result: String) -> bool {
        let mut entry = self.inner.write().await;
        if entry.job.is_finished() {
            return false;
        }
        entry.job.result = Some(result.clone());
        entry.job.progress = 100;
        self.finish_locked(
            &mut entry,
            JobStatus::Completed,
            EventType::Complete,
            "Research completed successfully".to_string(),
            json!({ "result": result }),
        );
        tracing::info!(job_id = %self.id, "Research completed");
        true
    }

    pub async fn time_out(&self) -> bool {
        let mut entry = self.inner.write().await;
        if entry.job.is_finished() {
            return false;
        }
        let result = entry.job.timeout_result();
        entry.job.result = Some(result.clone());
        entry.job.error = Some("timeout".to_string());
        self.finish_locked(
            &mut entry,
            JobStatus::Timeout,
            EventType::Timeout,
            "Research timed out".to_string(),
            json!({ "error": "timeout", "result": result }),
        );
        tracing::error!(job_id = %self.id, "Research timed out");
        true
    }

    pub async fn fail(&self, error: &str) -> bool {
        let mut entry = self.inner.write().await;
        if entry.job.is_finished() {
            return false;
        }
        let result = entry.job.failure_result(error);
        let partial = entry.job.has_partial_result().then(|| entry.job.partial_result.clone());
        entry.job.result = result;
        entry.job.error = Some(error.to_string());
        self.finish_locked(
            &mut entry,
            JobStatus::Failed,
            EventType::Error,
            format!("Research failed: {}", error),
            json!({ "error": error, "result": partial }),
        );
        tracing::error!(job_id = %self.id, error = %error, "Research failed");
        true
    }

    /// 协作式取消：置状态、追加终止事件、触发令牌；已是终态时返回 false
    pub async fn cancel(&self, reason: &str) -> bool {
        let mut entry = self.inner.write().await;
        if entry.job.is_finished() {
            return false;
        }
        self.finish_locked(
            &mut entry,
            JobStatus::Cancelled,
            EventType::Cancelled,
            reason.to_string(),
            json!({ "reason": reason }),
        );
        self.cancel.cancel();
        tracing::info!(job_id = %self.id, reason = %reason, "Research cancelled");
        true
    }
}

/// /health 使用的聚合计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthCounts {
    pub active: usize,
    pub completed: usize,
    /// failed + timeout + cancelled
    pub failed: usize,
    pub total: usize,
    pub events: usize,
}

/// 所有任务的并发安全登记表
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobHandle>>>,
    root: CancellationToken,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_root_token(CancellationToken::new())
    }

    /// 任务令牌都是 root 的子令牌，root 取消时所有任务随之取消
    pub fn with_root_token(root: CancellationToken) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            root,
        }
    }

    pub async fn create(&self, query: impl Into<String>, config: JobConfig) -> Arc<JobHandle> {
        let job = Job::new(query, config);
        let handle = Arc::new(JobHandle::new(job, self.root.child_token()));
        self.jobs
            .write()
            .await
            .insert(handle.id.clone(), handle.clone());
        tracing::info!(job_id = %handle.id, "Job created");
        handle
    }

    pub async fn get(&self, id: &str) -> Option<Arc<JobHandle>> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn health(&self) -> HealthCounts {
        let handles: Vec<Arc<JobHandle>> = self.jobs.read().await.values().cloned().collect();
        let mut counts = HealthCounts {
            total: handles.len(),
            ..Default::default()
        };
        for handle in handles {
            let entry = handle.inner.read().await;
            counts.events += entry.log.len();
            match entry.job.status {
                JobStatus::Created | JobStatus::Running => counts.active += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled => {
                    counts.failed += 1
                }
            }
        }
        counts
    }

    /// 删除开始时间早于 retention 的任务（连同事件日志），返回删除数量
    pub async fn purge_older_than(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let handles: Vec<Arc<JobHandle>> = self.jobs.read().await.values().cloned().collect();

        let mut expired = Vec::new();
        for handle in handles {
            if handle.inner.read().await.job.start_time <= cutoff {
                expired.push(handle.id.clone());
            }
        }

        let mut jobs = self.jobs.write().await;
        for id in &expired {
            if let Some(handle) = jobs.remove(id) {
                handle.cancel.cancel();
            }
        }
        if !expired.is_empty() {
            tracing::info!(removed = expired.len(), "Purged expired jobs");
        }
        expired.len()
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, id: &str, by: chrono::Duration) {
        if let Some(handle) = self.get(id).await {
            handle.inner.write().await.job.start_time -= by;
        }
    }
}
