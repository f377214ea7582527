//! Graceful shutdown using CancellationToken
//!
//! One root token is cancelled on Ctrl+C (or SIGTERM on unix); every
//! background job runs on a child token.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Controller cancelled by Ctrl+C or SIGTERM
    pub fn with_signals() -> Self {
        let controller = Self::new();
        let token = controller.token.clone();

        tokio::spawn(async move {
            wait_for_signal().await;
            token.cancel();
        });

        controller
    }

    /// Token cancelled with this controller, and independently cancellable
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn shutdown(&self) {
        info!("Manual shutdown triggered");
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to listen for SIGTERM: {}", e);
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = terminate.recv() => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown..."),
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}", e);
            // Without a signal source only a manual shutdown can stop the process
            std::future::pending::<()>().await;
        }
    }
}

/// Wait for background tasks, abandoning the ones still running after `grace`
pub async fn join_all(handles: Vec<(&'static str, JoinHandle<()>)>, grace: Duration) {
    for (name, handle) in handles {
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(job = name, error = %e, "Job ended abnormally"),
            Err(_) => warn!(job = name, "Job did not stop in time"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_manual_shutdown_cancels_children() {
        let controller = ShutdownController::new();
        let token = controller.child_token();
        let mut wait = task::spawn(controller.wait_for_shutdown());

        assert_pending!(wait.poll());
        assert!(!controller.is_cancelled());
        controller.shutdown();

        assert!(wait.is_woken());
        assert_ready!(wait.poll());
        assert!(controller.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_token_independence() {
        let controller = ShutdownController::new();
        let child1 = controller.child_token();
        let child2 = controller.child_token();

        child1.cancel();

        assert!(!child2.is_cancelled());
        assert!(!controller.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_all_abandons_stuck_jobs() {
        let token = CancellationToken::new();
        let child = token.clone();
        let stops = tokio::spawn(async move { child.cancelled().await });
        let stuck = tokio::spawn(std::future::pending::<()>());

        token.cancel();
        join_all(vec![("stops", stops), ("stuck", stuck)], Duration::from_secs(1)).await;
    }
}
