//! 优雅关闭处理
//!
//! 统一监听 Ctrl+C / SIGTERM：触发根 CancellationToken，正在运行的研究任务
//! 持有其子 token，因此会在下一个阶段边界停止；HTTP 服务随之结束监听。

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 致命错误
    FatalError(String),
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::UserInitiated => f.write_str("interrupted by user"),
            ShutdownReason::Signal => f.write_str("terminated by signal"),
            ShutdownReason::FatalError(e) => write!(f, "fatal error: {}", e),
        }
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 获取关闭 token（任务级 token 由它派生）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// 订阅关闭原因
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_cancels_child_tokens() {
        let manager = ShutdownManager::new();
        let job_token = manager.token().child_token();
        assert!(!manager.is_shutdown());
        assert!(!job_token.is_cancelled());

        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(manager.is_shutdown());
        assert!(job_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_reason_is_broadcast() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.shutdown(ShutdownReason::FatalError("listener died".into()));
        let reason = rx.recv().await.unwrap();
        match &reason {
            ShutdownReason::FatalError(msg) => assert_eq!(msg, "listener died"),
            other => panic!("unexpected reason: {:?}", other),
        }
        assert_eq!(reason.to_string(), "fatal error: listener died");
        manager.wait_for_shutdown().await;
    }

    #[test]
    fn test_reason_is_observed_after_shutdown() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        assert!(rx.try_recv().is_err());
        manager.shutdown(ShutdownReason::Signal);
        assert_eq!(rx.try_recv().unwrap().to_string(), "terminated by signal");
    }
}
