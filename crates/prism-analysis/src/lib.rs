#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **prism-analysis** – Three-tier analysis pipelines for Prism.
//!
//! The engine exposes three tiers sharing the same executor and cache
//! primitives:
//!
//! - **quick** – PR diff only, a minimal tool set under a tight budget;
//! - **comprehensive** – whole repository, consulting the TTL cache and
//!   storing fresh results;
//! - **targeted** – one or more named perspectives, each with its own cache
//!   key, composed into a single result.
//!
//! Cache writes are committed only on successful tier completion, so
//! cancelling a run can never leave a partial analysis behind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use prism_executor::{
    ExecutionStrategy, ExecutorConfig, ExecutorError, SelectedTools, ToolExecutor,
};
use prism_registry::ToolRegistry;
use prism_selector::{ModelSelector, SelectorError, ToolSelection};
use prism_store_core::AnalysisCache;
use prism_types::traits::HEALTH_CHECK_DEADLINE_MS;
use prism_types::{
    AgentRole, AnalysisContext, AnalyzerTool, ConsolidatedResult, DedupKey, Finding, ModelError,
    Severity, ToolResult,
};

/// Cache analyzer key of the comprehensive tier.
pub const COMPREHENSIVE_ANALYZER: &str = "comprehensive";

/// Per-tool deadline cap for the quick tier.
pub const QUICK_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Run budget cap for the quick tier, keeping its low-single-digit-minutes
/// SLA regardless of the configured defaults.
pub const QUICK_RUN_BUDGET: Duration = Duration::from_secs(180);

//─────────────────────────────
//  Perspectives and tiers
//─────────────────────────────

/// A named dimension of targeted analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Perspective {
    /// Structural review.
    Architecture,
    /// General code quality.
    CodeQuality,
    /// Vulnerabilities and secrets.
    Security,
    /// Third-party dependencies.
    Dependencies,
    /// Recurring design patterns and anti-patterns.
    Patterns,
}

impl Perspective {
    /// All perspectives, the set run by weekly/monthly scheduled scans.
    pub fn all() -> &'static [Perspective] {
        &[
            Perspective::Architecture,
            Perspective::CodeQuality,
            Perspective::Security,
            Perspective::Dependencies,
            Perspective::Patterns,
        ]
    }

    /// Canonical kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Perspective::Architecture => "architecture",
            Perspective::CodeQuality => "code-quality",
            Perspective::Security => "security",
            Perspective::Dependencies => "dependencies",
            Perspective::Patterns => "patterns",
        }
    }

    /// Cache analyzer key for this perspective.
    pub fn cache_key(&self) -> String {
        format!("targeted:{}", self.as_str())
    }

    /// Agent role that analyzes this perspective.
    pub fn role(&self) -> AgentRole {
        match self {
            Perspective::Architecture | Perspective::Patterns => AgentRole::Architecture,
            Perspective::CodeQuality => AgentRole::CodeQuality,
            Perspective::Security => AgentRole::Security,
            Perspective::Dependencies => AgentRole::Dependency,
        }
    }
}

impl fmt::Display for Perspective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which pipeline produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Diff-only analysis.
    Quick,
    /// Whole-repository analysis.
    Comprehensive,
    /// Perspective-composed analysis.
    Targeted,
}

/// Output of any tier: the consolidated result plus tier metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierResult {
    /// The fused findings and metrics.
    pub result: ConsolidatedResult,
    /// Producing tier.
    pub tier: Tier,
    /// Repository health score in `[0, 100]`.
    pub repository_score: u32,
    /// Severity histogram over the deduplicated findings.
    pub issue_distribution: HashMap<Severity, usize>,
    /// Whether the result was served from cache without tool invocation.
    pub from_cache: bool,
}

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Fatal analysis failures; per-tool problems stay inside the result.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Quick analysis invoked without a pull request.
    #[error("quick analysis requires a pull request in the context")]
    MissingPullRequest,

    /// The context violated a structural invariant.
    #[error(transparent)]
    InvalidContext(#[from] ModelError),

    /// The selector found no configuration for the context.
    #[error(transparent)]
    Selection(#[from] SelectorError),

    /// Every configured tool was missing from the registry.
    #[error("none of the configured tools for role '{role}' are available")]
    NoToolsAvailable {
        /// The uncovered role.
        role: String,
    },

    /// The executor refused the run.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

//─────────────────────────────
//  Engine configuration
//─────────────────────────────

/// Tier-level configuration.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// TTL applied to freshly computed cached analyses.
    pub cache_ttl: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cache_ttl: prism_types::DEFAULT_CACHE_TTL,
        }
    }
}

//─────────────────────────────
//  Engine
//─────────────────────────────

/// The three-tier analysis engine.
///
/// A process-wide service with explicit construction; tests inject their own
/// registry, selector, and cache implementations.
pub struct AnalysisEngine {
    registry: Arc<ToolRegistry>,
    selector: Arc<ModelSelector>,
    cache: Arc<dyn AnalysisCache>,
    executor: ToolExecutor,
    quick_executor: ToolExecutor,
    config: AnalysisConfig,
}

impl AnalysisEngine {
    /// Create an engine. The quick tier gets a clamped copy of the executor
    /// configuration so both tiers share one workspace root and concurrency
    /// cap but quick runs stay within their SLA.
    pub fn new(
        registry: Arc<ToolRegistry>,
        selector: Arc<ModelSelector>,
        cache: Arc<dyn AnalysisCache>,
        executor_config: ExecutorConfig,
        config: AnalysisConfig,
    ) -> Self {
        let quick_config = ExecutorConfig {
            tool_timeout: executor_config.tool_timeout.min(QUICK_TOOL_TIMEOUT),
            run_timeout: executor_config.run_timeout.min(QUICK_RUN_BUDGET),
            ..executor_config.clone()
        };
        Self {
            registry,
            selector,
            cache,
            executor: ToolExecutor::new(executor_config),
            quick_executor: ToolExecutor::new(quick_config),
            config,
        }
    }

    /// Quick tier: analyze the PR diff with a minimal tool set.
    pub async fn quick(&self, ctx: &AnalysisContext) -> Result<TierResult, AnalysisError> {
        self.quick_with(ctx, CancellationToken::new()).await
    }

    /// Quick tier with an external cancellation signal.
    #[instrument(skip_all, fields(repo = %ctx.repository.full_name()))]
    pub async fn quick_with(
        &self,
        ctx: &AnalysisContext,
        cancel: CancellationToken,
    ) -> Result<TierResult, AnalysisError> {
        if ctx.pr.is_none() {
            return Err(AnalysisError::MissingPullRequest);
        }
        ctx.validate()?;

        let selected = self.select_tools(ctx).await?;
        let result = self
            .quick_executor
            .execute_with(
                selected,
                ctx,
                ExecutionStrategy::PrimaryThenFallback,
                cancel,
                None,
            )
            .await?;

        info!(
            findings = result.findings.len(),
            tools = result.tools_succeeded.len() + result.tools_failed.len(),
            "quick analysis finished"
        );
        Ok(tier_result(result, Tier::Quick, false))
    }

    /// Comprehensive tier: whole-repository analysis behind the TTL cache.
    pub async fn comprehensive(&self, ctx: &AnalysisContext) -> Result<TierResult, AnalysisError> {
        self.comprehensive_with(ctx, CancellationToken::new()).await
    }

    /// Comprehensive tier with an external cancellation signal.
    #[instrument(skip_all, fields(repo = %ctx.repository.full_name()))]
    pub async fn comprehensive_with(
        &self,
        ctx: &AnalysisContext,
        cancel: CancellationToken,
    ) -> Result<TierResult, AnalysisError> {
        ctx.validate()?;

        match self
            .cache
            .get_valid(ctx.repository.id, COMPREHENSIVE_ANALYZER)
            .await
        {
            Ok(Some(record)) => {
                if let Ok(result) =
                    serde_json::from_value::<ConsolidatedResult>(record.analysis_data.clone())
                {
                    debug!("comprehensive analysis served from cache");
                    return Ok(tier_result(zero_invocations(result), Tier::Comprehensive, true));
                }
                warn!("cached comprehensive analysis was unreadable; recomputing");
            }
            Ok(None) => {}
            // Cache unavailability never aborts the run.
            Err(e) => warn!(error = %e, "cache read failed; proceeding without cache"),
        }

        let selected = self.select_tools(ctx).await?;
        let result = self
            .executor
            .execute_with(
                selected,
                ctx,
                ExecutionStrategy::PrimaryThenFallback,
                cancel.clone(),
                None,
            )
            .await?;

        let tier = tier_result(result, Tier::Comprehensive, false);
        if !cancel.is_cancelled() {
            self.store(ctx, COMPREHENSIVE_ANALYZER, &tier).await;
        }
        Ok(tier)
    }

    /// Targeted tier: compose one or more perspectives, each individually
    /// cached under its own analyzer key.
    pub async fn targeted(
        &self,
        ctx: &AnalysisContext,
        perspectives: &[Perspective],
    ) -> Result<TierResult, AnalysisError> {
        self.targeted_with(ctx, perspectives, CancellationToken::new())
            .await
    }

    /// Targeted tier with an external cancellation signal.
    #[instrument(skip_all, fields(repo = %ctx.repository.full_name(), perspectives = perspectives.len()))]
    pub async fn targeted_with(
        &self,
        ctx: &AnalysisContext,
        perspectives: &[Perspective],
        cancel: CancellationToken,
    ) -> Result<TierResult, AnalysisError> {
        ctx.validate()?;

        let mut parts = Vec::with_capacity(perspectives.len());
        let mut all_cached = true;

        for perspective in perspectives {
            let key = perspective.cache_key();
            match self.cache.get_valid(ctx.repository.id, &key).await {
                Ok(Some(record)) => {
                    if let Ok(result) =
                        serde_json::from_value::<ConsolidatedResult>(record.analysis_data.clone())
                    {
                        debug!(perspective = %perspective, "perspective served from cache");
                        parts.push(zero_invocations(result));
                        continue;
                    }
                    warn!(perspective = %perspective, "cached perspective unreadable; recomputing");
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "cache read failed; proceeding without cache"),
            }

            all_cached = false;
            let mut scoped = ctx.clone();
            scoped.agent_role = perspective.role();
            let selected = self.select_tools(&scoped).await?;
            let result = self
                .executor
                .execute_with(
                    selected,
                    &scoped,
                    ExecutionStrategy::PrimaryThenFallback,
                    cancel.clone(),
                    None,
                )
                .await?;

            let part = tier_result(result, Tier::Targeted, false);
            if !cancel.is_cancelled() {
                self.store(ctx, &key, &part).await;
            }
            parts.push(part.result);
        }

        let merged = merge_consolidated(parts);
        Ok(tier_result(merged, Tier::Targeted, all_cached))
    }

    /// Resolve the selector's tool ids into registry handles.
    ///
    /// An unavailable primary is skipped and the first available fallback is
    /// promoted in its place; an empty outcome is fatal.
    async fn select_tools(&self, ctx: &AnalysisContext) -> Result<SelectedTools, AnalysisError> {
        let language = dominant_language(ctx);
        let selection: ToolSelection = self.selector.resolve(
            ctx.agent_role,
            &language,
            ctx.repository.size_bucket(),
            ctx.tool_overrides.as_ref(),
        )?;

        let mut primary: Vec<Arc<dyn AnalyzerTool>> = Vec::new();
        let mut fallback: Vec<Arc<dyn AnalyzerTool>> = Vec::new();

        match self.available(&selection.primary).await {
            Some(tool) => primary.push(tool),
            None => warn!(
                tool = %selection.primary,
                "primary tool unavailable; promoting fallback"
            ),
        }
        for id in &selection.fallbacks {
            if let Some(tool) = self.available(id).await {
                if primary.is_empty() {
                    primary.push(tool);
                } else {
                    fallback.push(tool);
                }
            } else {
                warn!(tool = %id, "fallback tool unavailable; skipped in selection");
            }
        }

        if primary.is_empty() && fallback.is_empty() {
            return Err(AnalysisError::NoToolsAvailable {
                role: ctx.agent_role.to_string(),
            });
        }
        Ok(SelectedTools { primary, fallback })
    }

    /// A tool is available when registered and passing its liveness probe
    /// within the 2s deadline.
    async fn available(&self, id: &str) -> Option<Arc<dyn AnalyzerTool>> {
        let tool = self.registry.get(id).await?;
        let deadline = Duration::from_millis(HEALTH_CHECK_DEADLINE_MS);
        match tokio::time::timeout(deadline, tool.health_check()).await {
            Ok(Ok(())) => Some(tool),
            _ => None,
        }
    }

    /// Commit a tier result to the cache; failures are logged, never fatal.
    async fn store(&self, ctx: &AnalysisContext, analyzer: &str, tier: &TierResult) {
        let data = match serde_json::to_value(&tier.result) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "could not serialize analysis for caching");
                return;
            }
        };
        let metadata = json!({
            "score": tier.repository_score,
            "durationMs": tier.result.total_duration_ms,
            "tier": tier.tier,
        });
        if let Err(e) = self
            .cache
            .put(
                ctx.repository.id,
                analyzer,
                data,
                self.config.cache_ttl,
                Some(metadata),
            )
            .await
        {
            warn!(error = %e, analyzer, "cache write failed; run result unaffected");
        }
    }
}

//─────────────────────────────
//  Helpers
//─────────────────────────────

/// Most prominent language of the context: the first diff language when a PR
/// is present, else the repository's primary language.
fn dominant_language(ctx: &AnalysisContext) -> String {
    ctx.pr
        .as_ref()
        .and_then(|pr| pr.languages().into_iter().next())
        .or_else(|| ctx.repository.primary_language.clone())
        .unwrap_or_default()
}

/// Derive the repository score from a consolidated result:
/// `100 − min(100, 10·critical + 5·high + 2·medium + 0.5·low)`.
pub fn repository_score(result: &ConsolidatedResult) -> u32 {
    let dist = result.issue_distribution();
    let count = |s: Severity| *dist.get(&s).unwrap_or(&0) as f64;
    let penalty = 10.0 * count(Severity::Critical)
        + 5.0 * count(Severity::High)
        + 2.0 * count(Severity::Medium)
        + 0.5 * count(Severity::Low);
    (100.0 - penalty.min(100.0)).round() as u32
}

fn tier_result(result: ConsolidatedResult, tier: Tier, from_cache: bool) -> TierResult {
    TierResult {
        repository_score: repository_score(&result),
        issue_distribution: result.issue_distribution(),
        result,
        tier,
        from_cache,
    }
}

/// Rewrite the `tools.*` summary of a cached result to reflect that the
/// current run invoked nothing.
fn zero_invocations(mut result: ConsolidatedResult) -> ConsolidatedResult {
    result.metrics.insert("tools.total".to_string(), 0.0);
    result.metrics.insert("tools.succeeded".to_string(), 0.0);
    result.metrics.insert("tools.failed".to_string(), 0.0);
    result.metrics.insert("tools.successRate".to_string(), 0.0);
    result
}

/// Fuse several consolidated results (one per perspective) into one,
/// applying the same dedup and severity-merge rules as the consolidator.
fn merge_consolidated(parts: Vec<ConsolidatedResult>) -> ConsolidatedResult {
    let mut findings: Vec<Finding> = Vec::new();
    let mut index: HashMap<DedupKey, usize> = HashMap::new();
    let mut merged = ConsolidatedResult::default();

    for part in parts {
        for finding in part.findings {
            let key = finding.dedup_key();
            match index.get(&key) {
                Some(&at) => {
                    if finding.severity > findings[at].severity {
                        findings[at] = finding;
                    }
                }
                None => {
                    index.insert(key, findings.len());
                    findings.push(finding);
                }
            }
        }
        for (name, value) in part.metrics {
            if !name.starts_with("tools.") {
                merged.metrics.insert(name, value);
            }
        }
        merged.tools_succeeded.extend(part.tools_succeeded);
        merged.tools_failed.extend(part.tools_failed);
        merged.total_duration_ms += part.total_duration_ms;
    }

    let total = merged.tools_succeeded.len() + merged.tools_failed.len();
    merged
        .metrics
        .insert("tools.total".to_string(), total as f64);
    merged
        .metrics
        .insert("tools.succeeded".to_string(), merged.tools_succeeded.len() as f64);
    merged
        .metrics
        .insert("tools.failed".to_string(), merged.tools_failed.len() as f64);
    merged.metrics.insert(
        "tools.successRate".to_string(),
        if total > 0 {
            merged.tools_succeeded.len() as f64 / total as f64
        } else {
            0.0
        },
    );

    merged.findings = findings;
    merged
}
