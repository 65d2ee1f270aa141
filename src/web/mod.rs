//! HTTP / SSE 接口
//!
//! | 路径 | 方法 | 说明 |
//! |---|---|---|
//! | `/` | GET | 接口列表 |
//! | `/research` | POST | 提交研究任务，立即返回 jobId |
//! | `/research/:id` | GET | 结果快照 |
//! | `/research/:id` | DELETE | 协作式取消 |
//! | `/research/:id/status` | GET | 轻量状态 + 事件数 |
//! | `/research/stream/:id` | GET | SSE 进度流（支持 Last-Event-ID 续传） |
//! | `/health` | GET | 任务与事件计数 |
//! | `/cleanup-old-research` | GET | 清理超过保留期的任务 |

pub mod handlers;
pub mod stream;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{AppConfig, StreamSection};
use crate::jobs::{JobRegistry, JobRunner};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 所有 handler 共享的状态
pub struct AppState {
    pub runner: JobRunner,
    pub registry: Arc<JobRegistry>,
    pub stream: StreamSection,
    pub retention: chrono::Duration,
    pub default_provider: String,
    pub default_max_iterations: usize,
}

impl AppState {
    pub fn new(config: &AppConfig, runner: JobRunner) -> Self {
        Self {
            registry: runner.registry().clone(),
            runner,
            stream: config.stream.clone(),
            retention: config.registry.retention(),
            default_provider: config.llm.default_provider.clone(),
            default_max_iterations: config.research.default_max_iterations,
        }
    }
}

pub fn router(state: Arc<AppState>, cors_permissive: bool) -> Router {
    let app = Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/cleanup-old-research", get(handlers::cleanup))
        .route("/research", axum::routing::post(handlers::submit))
        .route("/research/stream/:id", get(stream::research_stream))
        .route(
            "/research/:id",
            get(handlers::snapshot).delete(handlers::cancel),
        )
        .route("/research/:id/status", get(handlers::status))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
