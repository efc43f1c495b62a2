//! Lifecycle supervision for hosted-server tools.
//!
//! Persistent hosted tools are process-wide singletons. The supervisor owns
//! their start/stop transitions and runs a monitor loop that restarts any
//! tool whose backing process died, waiting out a backoff between the stop
//! and the restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use prism_types::HostedTool;

use crate::errors::RegistryError;

/// Delay between a detected exit and the restart attempt.
pub const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Interval between supervisor health sweeps.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Supervisor for persistent hosted-server tools.
///
/// Adopted tools are started immediately and watched by the monitor loop;
/// on unexpected exit they are stopped, the backoff elapses, and they are
/// started again. `shutdown` stops the loop and every adopted tool.
pub struct ToolSupervisor {
    tools: RwLock<HashMap<String, Arc<dyn HostedTool>>>,
    backoff: Duration,
    check_interval: Duration,
    shutdown: CancellationToken,
}

impl ToolSupervisor {
    /// Create a supervisor with the default backoff and sweep interval.
    pub fn new() -> Self {
        Self::with_intervals(RESTART_BACKOFF, DEFAULT_CHECK_INTERVAL)
    }

    /// Create a supervisor with custom timings. Tests shorten both.
    pub fn with_intervals(backoff: Duration, check_interval: Duration) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            backoff,
            check_interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start a hosted tool and place it under supervision.
    pub async fn adopt(&self, tool: Arc<dyn HostedTool>) -> Result<(), RegistryError> {
        let id = tool.id().to_string();
        tool.start()
            .await
            .map_err(|e| RegistryError::HostedStartFailed {
                id: id.clone(),
                reason: e.to_string(),
            })?;
        self.tools.write().await.insert(id.clone(), tool);
        info!(tool = %id, "hosted tool started and adopted");
        Ok(())
    }

    /// Remove a tool from supervision and stop it.
    pub async fn release(&self, id: &str) {
        if let Some(tool) = self.tools.write().await.remove(id) {
            if let Err(e) = tool.stop().await {
                warn!(tool = %id, error = %e, "hosted tool stop failed during release");
            }
            info!(tool = %id, "hosted tool released");
        }
    }

    /// Spawn the monitor loop. The returned handle completes on shutdown.
    pub fn spawn_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(supervisor.check_interval);
            // The immediate first tick would re-probe tools just adopted.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = supervisor.shutdown.cancelled() => {
                        debug!("hosted tool monitor stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        supervisor.sweep().await;
                    }
                }
            }
        })
    }

    /// One pass over the supervised tools, restarting any that died.
    async fn sweep(&self) {
        let tools: Vec<(String, Arc<dyn HostedTool>)> = {
            let guard = self.tools.read().await;
            guard
                .iter()
                .map(|(id, t)| (id.clone(), t.clone()))
                .collect()
        };

        for (id, tool) in tools {
            let alive = tool.is_running() && tool.health_check().await.is_ok();
            if alive {
                continue;
            }
            warn!(tool = %id, "hosted tool down; restarting after backoff");
            if let Err(e) = tool.stop().await {
                debug!(tool = %id, error = %e, "stop before restart failed");
            }
            tokio::time::sleep(self.backoff).await;
            match tool.start().await {
                Ok(()) => info!(tool = %id, "hosted tool restarted"),
                Err(e) => error!(tool = %id, error = %e, "hosted tool restart failed"),
            }
        }
    }

    /// Stop the monitor loop and every supervised tool.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tools: Vec<Arc<dyn HostedTool>> =
            self.tools.write().await.drain().map(|(_, t)| t).collect();
        for tool in tools {
            let id = tool.id().to_string();
            if let Err(e) = tool.stop().await {
                warn!(tool = %id, error = %e, "hosted tool stop failed during shutdown");
            }
        }
        info!("hosted tool supervisor shut down");
    }
}

impl Default for ToolSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
