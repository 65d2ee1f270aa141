//! seeker - 深度研究服务
//!
//! 入口：加载配置、初始化日志、组装任务执行器与 HTTP 路由，监听直到收到关闭信号。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use seeker::config::load_config;
use seeker::core::{ShutdownManager, ShutdownReason};
use seeker::jobs::{JobRegistry, JobRunner};
use seeker::llm::ProviderLlmFactory;
use seeker::observability;
use seeker::sources::SourceSet;
use seeker::web::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let shutdown = Arc::new(ShutdownManager::new());
    let mut reasons = shutdown.subscribe();
    shutdown.install_signal_handlers();

    let registry = Arc::new(JobRegistry::with_root_token(shutdown.token()));
    let runner = JobRunner::new(
        registry.clone(),
        Arc::new(ProviderLlmFactory::new(cfg.llm.clone())),
        Arc::new(SourceSet::from_config(&cfg.sources)),
        cfg.research.clone(),
    );
    let state = Arc::new(AppState::new(&cfg, runner));
    let app = web::router(state, cfg.server.cors_permissive);

    // 定期清理超过保留期的任务
    let purge_registry = registry.clone();
    let retention = cfg.registry.retention();
    let purge_every = Duration::from_secs(cfg.registry.cleanup_interval_secs.max(1));
    let purge_token = shutdown.token();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        interval.tick().await; // 跳过启动后立即执行
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    purge_registry.purge_older_than(retention).await;
                }
                _ = purge_token.cancelled() => break,
            }
        }
    });

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cfg.server.host, cfg.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("seeker listening on http://{}", addr);

    let graceful = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.wait_for_shutdown().await })
        .await;

    if let Err(e) = served {
        shutdown.shutdown(ShutdownReason::FatalError(e.to_string()));
        return Err(e).context("HTTP server failed");
    }
    match reasons.try_recv() {
        Ok(reason) => tracing::info!(reason = %reason, "seeker stopped"),
        Err(_) => tracing::info!("seeker stopped"),
    }
    Ok(())
}
