#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **prism-executor** – Bounded-concurrency tool execution for Prism.
//!
//! Given a selection of primary and fallback tools and an analysis context,
//! the executor dispatches every tool under a concurrency cap, a per-tool
//! timeout, and an overall run budget, then fuses the outcomes into one
//! [`ConsolidatedResult`]. Three strategies are supported:
//!
//! - **parallel-all**: primary and fallback run concurrently;
//! - **primary-then-fallback**: primary runs first, the fallback batch is
//!   scheduled only when more than half of the primary tools fail;
//! - **sequential**: one tool at a time, optionally failing fast.
//!
//! Every attempt yields exactly one [`ToolResult`]; a tool's failure never
//! cancels its peers unless fail-fast is requested. Each execution receives
//! an isolated scratch workspace that is released on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use prism_types::{AnalysisContext, AnalyzerTool, ConsolidatedResult, ToolFailure, ToolResult};

pub mod consolidate;
pub mod progress;
pub mod workspace;

pub use consolidate::consolidate;
pub use progress::{ProgressCallback, ProgressTracker, ProgressUpdate};
pub use workspace::{Workspace, WorkspaceError, WorkspaceLimits};

/// Default cap on tools in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default per-tool deadline.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default overall run budget.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default deadline for materializing a workspace.
pub const DEFAULT_WORKSPACE_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace given to an in-flight tool to surface a result after cancellation,
/// never exceeding the tool's remaining timeout.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Failure rate above which `primary-then-fallback` schedules the fallback
/// batch.
const FALLBACK_TRIGGER_RATE: f64 = 0.5;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum tools in flight at once.
    pub max_concurrency: usize,
    /// Per-tool deadline; clamped further by the tool's own declared timeout
    /// and the remaining run budget.
    pub tool_timeout: Duration,
    /// Overall budget for one execution batch.
    pub run_timeout: Duration,
    /// Deadline for materializing a tool's workspace.
    pub workspace_timeout: Duration,
    /// Directory under which per-execution workspaces are created.
    pub workspaces_dir: std::path::PathBuf,
    /// Resource ceilings for workspace materialization.
    pub workspace_limits: WorkspaceLimits,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            workspace_timeout: DEFAULT_WORKSPACE_TIMEOUT,
            workspaces_dir: std::env::temp_dir().join("prism-workspaces"),
            workspace_limits: WorkspaceLimits::default(),
        }
    }
}

/// How a batch of selected tools is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Primary and fallback execute concurrently under the in-flight cap.
    ParallelAll,
    /// Primary executes first; fallback runs only if >50% of primary failed.
    PrimaryThenFallback,
    /// One tool at a time.
    Sequential {
        /// Stop attempting further tools after the first failure. Skipped
        /// tools still yield a result, marked cancelled.
        fail_fast: bool,
    },
}

/// Tools chosen for a run, split into primary and fallback sets.
#[derive(Clone, Default)]
pub struct SelectedTools {
    /// Preferred tools.
    pub primary: Vec<Arc<dyn AnalyzerTool>>,
    /// Tools promoted when the primary set degrades.
    pub fallback: Vec<Arc<dyn AnalyzerTool>>,
}

impl SelectedTools {
    /// Total number of selected tools.
    pub fn len(&self) -> usize {
        self.primary.len() + self.fallback.len()
    }

    /// Whether no tools were selected.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.fallback.is_empty()
    }
}

/// Fatal executor failures.
///
/// Per-tool problems are never fatal; they surface as failed tool results
/// inside the consolidated output.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The selection contained no tools at all.
    #[error("no tools were selected for execution")]
    NoToolsSelected,
}

/// Bounded-concurrency tool executor.
///
/// A process-wide service with explicit construction; tests inject their own
/// instances with shortened timeouts.
pub struct ToolExecutor {
    config: ExecutorConfig,
}

impl ToolExecutor {
    /// Create an executor with the given configuration.
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute with a fresh cancellation token and no progress reporting.
    pub async fn execute(
        &self,
        selected: SelectedTools,
        ctx: &AnalysisContext,
        strategy: ExecutionStrategy,
    ) -> Result<ConsolidatedResult, ExecutorError> {
        self.execute_with(selected, ctx, strategy, CancellationToken::new(), None)
            .await
    }

    /// Execute a selection of tools against a context.
    ///
    /// Returns a consolidated result whenever at least the selection was
    /// non-empty, even if every tool failed. Cancelling `cancel` stops new
    /// tools from being scheduled and gives in-flight tools a bounded grace
    /// period to surface a result.
    #[instrument(skip_all, fields(role = %ctx.agent_role, tools = selected.len()))]
    pub async fn execute_with(
        &self,
        selected: SelectedTools,
        ctx: &AnalysisContext,
        strategy: ExecutionStrategy,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<ConsolidatedResult, ExecutorError> {
        if selected.is_empty() {
            return Err(ExecutorError::NoToolsSelected);
        }

        let started = Instant::now();
        let run_deadline = started + self.config.run_timeout;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let ctx = Arc::new(ctx.clone());

        let results = match strategy {
            ExecutionStrategy::ParallelAll => {
                let tracker = Arc::new(ProgressTracker::new(selected.len(), progress));
                let mut all = selected.primary;
                all.extend(selected.fallback);
                self.run_batch(all, &ctx, &semaphore, &cancel, &tracker, run_deadline)
                    .await
            }
            ExecutionStrategy::PrimaryThenFallback => {
                let tracker = Arc::new(ProgressTracker::new(selected.primary.len(), progress));
                let primary_count = selected.primary.len();
                let mut results = self
                    .run_batch(
                        selected.primary,
                        &ctx,
                        &semaphore,
                        &cancel,
                        &tracker,
                        run_deadline,
                    )
                    .await;

                let failed = results.iter().filter(|r| !r.success).count();
                let failure_rate = if primary_count > 0 {
                    failed as f64 / primary_count as f64
                } else {
                    0.0
                };
                if failure_rate > FALLBACK_TRIGGER_RATE && !selected.fallback.is_empty() {
                    warn!(
                        failed,
                        primary = primary_count,
                        "primary majority failed; promoting fallback tools"
                    );
                    tracker.add_total(selected.fallback.len());
                    let fallback_results = self
                        .run_batch(
                            selected.fallback,
                            &ctx,
                            &semaphore,
                            &cancel,
                            &tracker,
                            run_deadline,
                        )
                        .await;
                    results.extend(fallback_results);
                }
                results
            }
            ExecutionStrategy::Sequential { fail_fast } => {
                let tracker = Arc::new(ProgressTracker::new(selected.len(), progress));
                let mut all = selected.primary;
                all.extend(selected.fallback);

                let mut results = Vec::with_capacity(all.len());
                let mut stopped = false;
                for tool in all {
                    if stopped {
                        let tool_id = tool.id().to_string();
                        tracker.started();
                        tracker.finished(false);
                        results.push(ToolResult::failed(
                            tool_id,
                            Utc::now(),
                            Duration::ZERO,
                            ToolFailure::cancelled(),
                        ));
                        continue;
                    }
                    let result = run_one(
                        tool,
                        Arc::clone(&ctx),
                        Arc::clone(&semaphore),
                        cancel.clone(),
                        Arc::clone(&tracker),
                        self.config.clone(),
                        run_deadline,
                    )
                    .await;
                    if fail_fast && !result.success {
                        stopped = true;
                    }
                    results.push(result);
                }
                results
            }
        };

        debug!(
            results = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "execution batch finished"
        );
        Ok(consolidate(&results, started.elapsed()))
    }

    /// Dispatch one batch concurrently; every tool yields exactly one result.
    async fn run_batch(
        &self,
        tools: Vec<Arc<dyn AnalyzerTool>>,
        ctx: &Arc<AnalysisContext>,
        semaphore: &Arc<Semaphore>,
        cancel: &CancellationToken,
        tracker: &Arc<ProgressTracker>,
        run_deadline: Instant,
    ) -> Vec<ToolResult> {
        let mut handles = Vec::with_capacity(tools.len());
        for tool in tools {
            let tool_id = tool.id().to_string();
            let handle = tokio::spawn(run_one(
                tool,
                Arc::clone(ctx),
                Arc::clone(semaphore),
                cancel.clone(),
                Arc::clone(tracker),
                self.config.clone(),
                run_deadline,
            ));
            handles.push((tool_id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (tool_id, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                // A panicking tool still yields a result; its workspace was
                // released by unwinding.
                Err(e) => {
                    warn!(tool = %tool_id, error = %e, "tool task aborted");
                    results.push(ToolResult::failed(
                        tool_id,
                        Utc::now(),
                        Duration::ZERO,
                        ToolFailure::execution(format!("tool task aborted: {e}")),
                    ));
                }
            }
        }
        results
    }
}

/// Execute a single tool inside its own workspace under all deadlines.
async fn run_one(
    tool: Arc<dyn AnalyzerTool>,
    ctx: Arc<AnalysisContext>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: Arc<ProgressTracker>,
    config: ExecutorConfig,
    run_deadline: Instant,
) -> ToolResult {
    let tool_id = tool.id().to_string();

    // Cancellation stops scheduling: tools still waiting for a slot are
    // reported cancelled without ever starting.
    let permit = tokio::select! {
        permit = semaphore.acquire_owned() => match permit {
            Ok(p) => p,
            Err(_) => {
                return ToolResult::failed(
                    tool_id,
                    Utc::now(),
                    Duration::ZERO,
                    ToolFailure::cancelled(),
                )
            }
        },
        _ = cancel.cancelled() => {
            return ToolResult::failed(
                tool_id,
                Utc::now(),
                Duration::ZERO,
                ToolFailure::cancelled(),
            )
        }
    };

    let started_at = Utc::now();
    let started = Instant::now();
    tracker.started();

    let declared = tool.spec().requirements.timeout;
    let budget = run_deadline.saturating_duration_since(Instant::now());
    let effective = config
        .tool_timeout
        .min(declared)
        .min(budget.max(Duration::from_millis(1)));

    let materialized = tokio::time::timeout(
        config.workspace_timeout,
        Workspace::materialize(&config.workspaces_dir, &ctx, &config.workspace_limits),
    )
    .await
    .unwrap_or_else(|_| {
        Err(WorkspaceError::LimitExceeded {
            detail: format!(
                "materialization exceeded {}ms",
                config.workspace_timeout.as_millis()
            ),
        })
    });

    let result = match materialized {
        Err(e) => ToolResult::failed(
            &tool_id,
            started_at,
            started.elapsed(),
            ToolFailure::unavailable(format!("workspace setup failed: {e}")),
        ),
        Ok((workspace, scoped)) => {
            let exec = tool.execute(&scoped);
            tokio::pin!(exec);

            let outcome = tokio::select! {
                res = tokio::time::timeout(effective, &mut exec) => match res {
                    Ok(Ok(raw)) => conform(raw, &tool_id, started_at, started.elapsed()),
                    Ok(Err(e)) => ToolResult::failed(
                        &tool_id,
                        started_at,
                        started.elapsed(),
                        ToolFailure::execution(e.to_string()),
                    ),
                    Err(_) => ToolResult::failed(
                        &tool_id,
                        started_at,
                        started.elapsed(),
                        ToolFailure::timeout(effective),
                    ),
                },
                _ = cancel.cancelled() => {
                    let grace = CANCEL_GRACE.min(effective.saturating_sub(started.elapsed()));
                    match tokio::time::timeout(grace, &mut exec).await {
                        Ok(Ok(raw)) => conform(raw, &tool_id, started_at, started.elapsed()),
                        _ => ToolResult::failed(
                            &tool_id,
                            started_at,
                            started.elapsed(),
                            ToolFailure::cancelled(),
                        ),
                    }
                }
            };
            // Released before the result is reported, on this and every
            // other exit path.
            drop(workspace);
            outcome
        }
    };

    tracker.finished(result.success);
    drop(permit);
    result
}

/// Enforce the tool-output contract; non-conforming output becomes a
/// malformed-output failure.
fn conform(
    raw: ToolResult,
    expected_id: &str,
    started_at: chrono::DateTime<Utc>,
    elapsed: Duration,
) -> ToolResult {
    if raw.tool_id != expected_id {
        return ToolResult::failed(
            expected_id,
            started_at,
            elapsed,
            ToolFailure::malformed(format!(
                "result reported tool id '{}', expected '{}'",
                raw.tool_id, expected_id
            )),
        );
    }
    if raw.success == raw.error.is_some() {
        return ToolResult::failed(
            expected_id,
            started_at,
            elapsed,
            ToolFailure::malformed("success flag inconsistent with error field"),
        );
    }
    raw
}
