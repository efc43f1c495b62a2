//! Behaviour traits shared across crates.
//!
//! The traits are intentionally minimal and live in `prism-types` so they can
//! be shared without creating cyclic dependencies. All higher-level crates
//! (`prism-registry`, `prism-executor`, etc.) depend on *these* definitions.

use anyhow::Result;
use async_trait::async_trait;

use crate::{AnalysisContext, ToolResult, ToolSpec};

/// Deadline every liveness probe must meet.
pub const HEALTH_CHECK_DEADLINE_MS: u64 = 2_000;

/// Core abstraction for analyzer tools.
///
/// A tool consumes an [`AnalysisContext`] whose file paths have been
/// rewritten into an isolated workspace and emits a conforming
/// [`ToolResult`]. Non-conforming output is wrapped by the executor as a
/// malformed-output failure; tools themselves should return `Err` only for
/// infrastructure problems.
#[async_trait]
pub trait AnalyzerTool: Send + Sync {
    /// Static description of the tool.
    fn spec(&self) -> &ToolSpec;

    /// Stable registry identifier.
    fn id(&self) -> &str {
        &self.spec().id
    }

    /// Whether the tool is willing to analyze the given context.
    ///
    /// The default checks the spec's file-count bounds and allowed file
    /// types against the context's live files.
    fn can_analyze(&self, ctx: &AnalysisContext) -> bool {
        let spec = self.spec();
        if !spec.accepts_file_count(ctx.live_file_count()) {
            return false;
        }
        let allowed = &spec.requirements.allowed_file_types;
        if allowed.is_empty() {
            return true;
        }
        match &ctx.pr {
            Some(pr) => pr.live_files().all(|f| {
                f.path
                    .rsplit('.')
                    .next()
                    .map_or(false, |ext| allowed.iter().any(|a| a == ext))
            }),
            None => true,
        }
    }

    /// Run the analysis.
    async fn execute(&self, ctx: &AnalysisContext) -> Result<ToolResult>;

    /// Liveness probe; must return within [`HEALTH_CHECK_DEADLINE_MS`].
    async fn health_check(&self) -> Result<()>;
}

/// Lifecycle surface of hosted-server tools.
///
/// Hosted tools are process-wide singletons; the registry's supervisor owns
/// their start/stop transitions and restarts them after unexpected exits.
#[async_trait]
pub trait HostedTool: AnalyzerTool {
    /// Start the backing server process.
    async fn start(&self) -> Result<()>;

    /// Stop the backing server process.
    async fn stop(&self) -> Result<()>;

    /// Whether the backing process is currently running.
    fn is_running(&self) -> bool;
}
