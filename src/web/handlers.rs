//! JSON 接口：提交、快照、状态、取消、健康检查、清理

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::ValidationError;
use crate::jobs::{HealthCounts, JobStatus, Submission};
use crate::llm::ProviderSelection;
use crate::web::{AppState, VERSION};

/// POST /research 请求体；同时接受 camelCase 与 snake_case 字段名
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default, alias = "llm_provider")]
    pub provider: Option<String>,
    #[serde(default, alias = "api_key")]
    pub api_key: Option<String>,
    #[serde(default, alias = "model_name")]
    pub model: Option<String>,
    #[serde(default, alias = "max_iterations")]
    pub max_iterations: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
        }),
    )
}

fn not_found(id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("research '{}' not found", id))
}

fn bad_request(e: ValidationError) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, e.to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: &'static str,
    pub message: String,
}

/// POST /research
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    if req.query.trim().is_empty() {
        return Err(bad_request(ValidationError::EmptyQuery));
    }
    let provider = req
        .provider
        .unwrap_or_else(|| state.default_provider.clone());
    let selection =
        ProviderSelection::parse(&provider, req.api_key, req.model).map_err(bad_request)?;

    let handle = state
        .runner
        .submit(Submission {
            query: req.query,
            selection,
            max_iterations: req.max_iterations.unwrap_or(state.default_max_iterations),
        })
        .await
        .map_err(bad_request)?;

    Ok(Json(SubmitResponse {
        job_id: handle.id().to_string(),
        status: "processing",
        message: format!(
            "Research started. Follow progress at /research/stream/{}",
            handle.id()
        ),
    }))
}

/// GET /research/:id 的快照；字段随状态变化
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub result: Option<String>,
}

/// GET /research/:id
pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SnapshotResponse>, ApiError> {
    let handle = state.registry.get(&id).await.ok_or_else(|| not_found(&id))?;
    let job = handle.snapshot().await;

    let partial = job.has_partial_result().then(|| job.partial_result.clone());
    let response = match job.status {
        JobStatus::Completed => SnapshotResponse {
            job_id: job.id,
            status: job.status,
            progress: None,
            message: None,
            error: None,
            result: job.result,
        },
        JobStatus::Timeout | JobStatus::Failed => SnapshotResponse {
            job_id: job.id,
            status: job.status,
            progress: None,
            message: None,
            error: job.error,
            result: job.result.or(partial),
        },
        JobStatus::Cancelled => SnapshotResponse {
            job_id: job.id,
            status: job.status,
            progress: Some(job.progress),
            message: Some("research was cancelled".to_string()),
            error: None,
            result: partial,
        },
        JobStatus::Created | JobStatus::Running => SnapshotResponse {
            job_id: job.id,
            status: job.status,
            progress: Some(job.progress),
            message: Some("research in progress".to_string()),
            error: None,
            result: partial,
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub last_message: Option<String>,
    pub query: String,
    pub event_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_partial_result: Option<bool>,
}

/// GET /research/:id/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let handle = state.registry.get(&id).await.ok_or_else(|| not_found(&id))?;
    let job = handle.snapshot().await;
    let event_count = handle.event_count().await;

    let mut response = StatusResponse {
        job_id: job.id.clone(),
        status: job.status,
        progress: job.progress,
        start_time: job.start_time,
        last_update: job.last_update,
        last_message: job.last_message.clone(),
        query: job.query.clone(),
        event_count,
        completion_time: None,
        has_result: None,
        error: None,
        has_partial_result: None,
    };
    match job.status {
        JobStatus::Completed => {
            response.completion_time = job.completion_time;
            response.has_result = Some(job.result.is_some());
        }
        JobStatus::Timeout | JobStatus::Failed => {
            response.completion_time = job.completion_time;
            response.error = job.error.clone();
            response.has_partial_result = Some(job.has_partial_result());
        }
        JobStatus::Cancelled => response.completion_time = job.completion_time,
        JobStatus::Created | JobStatus::Running => {}
    }
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

/// DELETE /research/:id；已结束的任务不做任何改动
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let handle = state.registry.get(&id).await.ok_or_else(|| not_found(&id))?;

    let message = if handle.cancel("research cancelled by user").await {
        "research cancelled".to_string()
    } else {
        format!(
            "research already finished with status '{}'; nothing to cancel",
            handle.status().await
        )
    };
    Ok(Json(CancelResponse {
        job_id: id,
        status: handle.status().await,
        message,
    }))
}

#[derive(Debug, Serialize)]
pub struct JobCounts {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct EventCounts {
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub jobs: JobCounts,
    pub events: EventCounts,
}

impl From<HealthCounts> for HealthResponse {
    fn from(c: HealthCounts) -> Self {
        Self {
            status: "healthy",
            version: VERSION,
            jobs: JobCounts {
                active: c.active,
                completed: c.completed,
                failed: c.failed,
                total: c.total,
            },
            events: EventCounts { total: c.events },
        }
    }
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(state.registry.health().await.into())
}

/// GET /cleanup-old-research
pub async fn cleanup(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let removed = state.registry.purge_older_than(state.retention).await;
    Json(json!({
        "removed": removed,
        "remaining": state.registry.len().await,
        "message": format!("Removed {} research jobs older than {} hours", removed, state.retention.num_hours()),
    }))
}

/// GET /
pub async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "name": "seeker",
        "version": VERSION,
        "endpoints": {
            "POST /research": "Start a research job",
            "GET /research/{id}": "Result snapshot",
            "GET /research/{id}/status": "Lightweight status",
            "GET /research/stream/{id}": "Server-sent progress events",
            "DELETE /research/{id}": "Cancel a running job",
            "GET /health": "Job and event counts",
            "GET /cleanup-old-research": "Remove jobs past the retention window",
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_both_casings() {
        let camel: ResearchRequest = serde_json::from_str(
            r#"{"query":"q","provider":"openai","apiKey":"k","model":"m","maxIterations":2}"#,
        )
        .unwrap();
        let snake: ResearchRequest = serde_json::from_str(
            r#"{"query":"q","llm_provider":"openai","api_key":"k","model_name":"m","max_iterations":2}"#,
        )
        .unwrap();
        for req in [camel, snake] {
            assert_eq!(req.provider.as_deref(), Some("openai"));
            assert_eq!(req.api_key.as_deref(), Some("k"));
            assert_eq!(req.model.as_deref(), Some("m"));
            assert_eq!(req.max_iterations, Some(2));
        }
    }

    #[test]
    fn test_health_response_shape() {
        let body = serde_json::to_value(HealthResponse::from(HealthCounts {
            active: 1,
            completed: 2,
            failed: 3,
            total: 6,
            events: 40,
        }))
        .unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["jobs"]["failed"], 3);
        assert_eq!(body["events"]["total"], 40);
    }
}
