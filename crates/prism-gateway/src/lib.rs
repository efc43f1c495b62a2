#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **prism-gateway** – Webhook entry point for Prism.
//!
//! The gateway accepts three request shapes — PR review, repository scan,
//! and scheduled scan — and is the single code path for both
//! human-initiated and scheduler-initiated analysis. Each request
//! materializes an [`AnalysisContext`], picks a tier, and returns the
//! consolidated result. Repositories are created on first observation and
//! refreshed on every event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use prism_analysis::{AnalysisEngine, AnalysisError, Perspective, TierResult, COMPREHENSIVE_ANALYZER};
use prism_scheduler::{ScheduleManager, TickHandler, TickOutcome};
use prism_store_core::{AnalysisCache, RepositoryStore};
use prism_types::{
    AgentRole, AnalysisContext, Cadence, ChangeType, PrFile, PullRequest, Repository,
    Schedule, ScheduleId, ToolOverrides, UserContext,
};

pub mod http;
pub mod scm;

pub use http::{router, GatewayState};
pub use scm::{NullScmProvider, ScmProvider};

//─────────────────────────────
//  Request shapes
//─────────────────────────────

/// `pr.opened` / `pr.updated` trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct PrReviewRequest {
    /// Repository URL.
    pub repository_url: String,
    /// Pull request number.
    pub pr_number: u64,
    /// PR title.
    #[serde(default)]
    pub title: String,
    /// PR description.
    #[serde(default)]
    pub description: String,
    /// Base branch.
    #[serde(default = "default_base_ref")]
    pub base_ref: String,
    /// Head branch.
    #[serde(default)]
    pub target_ref: String,
    /// PR author.
    #[serde(default)]
    pub author: String,
    /// Changed files.
    pub files: Vec<PrFile>,
    /// Commit SHAs.
    #[serde(default)]
    pub commits: Vec<String>,
    /// Role to review under; defaults to code quality.
    #[serde(default)]
    pub agent_role: Option<AgentRole>,
    /// Initiating user; defaults to the webhook identity.
    #[serde(default)]
    pub user: Option<UserContext>,
    /// Per-request tool override.
    #[serde(default)]
    pub tool_overrides: Option<ToolOverrides>,
}

fn default_base_ref() -> String {
    "main".to_string()
}

/// `repo.scan` trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct RepoScanRequest {
    /// Repository URL.
    pub repository_url: String,
    /// Branch to scan; informational, the provider resolves it.
    #[serde(default)]
    pub branch: Option<String>,
    /// Initiating user; defaults to the webhook identity.
    #[serde(default)]
    pub user: Option<UserContext>,
    /// Per-request tool override.
    #[serde(default)]
    pub tool_overrides: Option<ToolOverrides>,
}

/// `schedule.tick` trigger (internal).
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledScanRequest {
    /// The firing schedule.
    pub schedule_id: ScheduleId,
}

/// Response to a PR review: the quick-tier result, plus the still-valid
/// comprehensive analysis of the repository when one is cached.
#[derive(Debug, Serialize)]
pub struct PrReviewResponse {
    /// Quick-tier output.
    pub review: TierResult,
    /// Cached comprehensive analysis data, if valid.
    pub cached_comprehensive: Option<Value>,
}

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Failures surfaced by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The repository URL could not be parsed into provider/owner/name.
    #[error("repository URL '{url}' is not parseable")]
    BadRepositoryUrl {
        /// The offending URL.
        url: String,
    },

    /// A tick referenced an unknown schedule.
    #[error("schedule '{id}' not found")]
    UnknownSchedule {
        /// The missing schedule id.
        id: ScheduleId,
    },

    /// A tick referenced a repository that was never observed.
    #[error("repository '{url}' is unknown")]
    UnknownRepository {
        /// The unknown repository URL.
        url: String,
    },

    /// A tick fired for an on-demand schedule; the dispatcher never does.
    #[error("on-demand schedule for '{url}' cannot be fired")]
    OnDemandNeverFires {
        /// Repository of the on-demand schedule.
        url: String,
    },

    /// The analysis tier failed fatally.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// A backing store was unreachable.
    #[error("store unavailable: {0}")]
    Store(#[from] anyhow::Error),
}

//─────────────────────────────
//  Webhook handler
//─────────────────────────────

/// System identity attached to scheduler-initiated runs.
fn scheduler_user() -> UserContext {
    UserContext {
        user_id: "scheduler".to_string(),
        org_id: "system".to_string(),
        permissions: Vec::new(),
    }
}

fn webhook_user() -> UserContext {
    UserContext {
        user_id: "webhook".to_string(),
        org_id: "external".to_string(),
        permissions: Vec::new(),
    }
}

/// The single entry point for analysis requests.
pub struct WebhookHandler {
    engine: Arc<AnalysisEngine>,
    repos: Arc<dyn RepositoryStore>,
    cache: Arc<dyn AnalysisCache>,
    manager: Arc<ScheduleManager>,
    scm: Arc<dyn ScmProvider>,
}

impl WebhookHandler {
    /// Wire a handler over its collaborators.
    pub fn new(
        engine: Arc<AnalysisEngine>,
        repos: Arc<dyn RepositoryStore>,
        cache: Arc<dyn AnalysisCache>,
        manager: Arc<ScheduleManager>,
        scm: Arc<dyn ScmProvider>,
    ) -> Self {
        Self {
            engine,
            repos,
            cache,
            manager,
            scm,
        }
    }

    /// Handle `pr.opened` / `pr.updated`: quick tier over the diff, with the
    /// cached comprehensive analysis attached when still valid.
    #[instrument(skip_all, fields(url = %request.repository_url, pr = request.pr_number))]
    pub async fn handle_pr_event(
        &self,
        request: PrReviewRequest,
    ) -> Result<PrReviewResponse, GatewayError> {
        let files = normalize_files(request.files);
        let repository = self
            .observe_repository(&request.repository_url, Some(&files))
            .await?;

        let pr = PullRequest {
            number: request.pr_number,
            title: request.title,
            description: request.description,
            base_ref: request.base_ref,
            target_ref: request.target_ref,
            author: request.author,
            files,
            commits: request.commits,
        };
        let ctx = AnalysisContext {
            agent_role: request.agent_role.unwrap_or(AgentRole::CodeQuality),
            pr: Some(pr),
            repository: repository.clone(),
            user: request.user.unwrap_or_else(webhook_user),
            tool_overrides: request.tool_overrides,
        };

        let review = self.engine.quick(&ctx).await?;
        let cached_comprehensive = match self
            .cache
            .get_valid(repository.id, COMPREHENSIVE_ANALYZER)
            .await
        {
            Ok(record) => record.map(|r| r.analysis_data),
            Err(e) => {
                warn!(error = %e, "cache read failed; review returned without context");
                None
            }
        };

        self.ensure_schedule(&repository, &review).await;
        info!(
            findings = review.result.findings.len(),
            score = review.repository_score,
            "PR review finished"
        );
        Ok(PrReviewResponse {
            review,
            cached_comprehensive,
        })
    }

    /// Handle `repo.scan`: comprehensive tier over the whole repository.
    #[instrument(skip_all, fields(url = %request.repository_url))]
    pub async fn handle_repo_scan(
        &self,
        request: RepoScanRequest,
    ) -> Result<TierResult, GatewayError> {
        if let Some(branch) = &request.branch {
            debug!(branch = %branch, "scan requested for a specific branch");
        }
        let repository = self
            .observe_repository(&request.repository_url, None)
            .await?;

        let ctx = AnalysisContext {
            agent_role: AgentRole::CodeQuality,
            pr: None,
            repository: repository.clone(),
            user: request.user.unwrap_or_else(webhook_user),
            tool_overrides: request.tool_overrides,
        };

        let result = self.engine.comprehensive(&ctx).await?;
        self.ensure_schedule(&repository, &result).await;
        Ok(result)
    }

    /// Handle `schedule.tick`: tier chosen by the firing schedule's cadence.
    pub async fn handle_scheduled_scan(
        &self,
        request: ScheduledScanRequest,
    ) -> Result<TierResult, GatewayError> {
        let schedule = self
            .manager
            .store()
            .get(request.schedule_id)
            .await?
            .ok_or(GatewayError::UnknownSchedule {
                id: request.schedule_id,
            })?;
        let repository = self.repository_for(&schedule).await?;
        self.run_scheduled(&schedule, repository).await
    }

    async fn repository_for(&self, schedule: &Schedule) -> Result<Repository, GatewayError> {
        self.repos
            .get_by_url(&schedule.repository_url)
            .await?
            .ok_or_else(|| GatewayError::UnknownRepository {
                url: schedule.repository_url.clone(),
            })
    }

    /// Tier per cadence: every6h → quick, daily → comprehensive,
    /// weekly/monthly → targeted over all perspectives.
    #[instrument(skip_all, fields(url = %schedule.repository_url, cadence = %schedule.cadence))]
    async fn run_scheduled(
        &self,
        schedule: &Schedule,
        mut repository: Repository,
    ) -> Result<TierResult, GatewayError> {
        repository.is_production = self
            .scm
            .is_production(&repository)
            .await
            .unwrap_or(false);

        let ctx = AnalysisContext {
            agent_role: AgentRole::CodeQuality,
            pr: None,
            repository: repository.clone(),
            user: scheduler_user(),
            tool_overrides: if schedule.enabled_tools.is_empty() {
                None
            } else {
                Some(ToolOverrides {
                    primary: schedule.enabled_tools.first().cloned(),
                    fallbacks: schedule.enabled_tools.iter().skip(1).cloned().collect(),
                })
            },
        };

        let result = match schedule.cadence {
            Cadence::Every6h => {
                match self.scm.recent_changes(&repository).await {
                    Ok(Some(pr)) => {
                        let mut quick_ctx = ctx.clone();
                        quick_ctx.pr = Some(pr);
                        self.engine.quick(&quick_ctx).await?
                    }
                    // Without a change source there is no diff to review
                    // quickly; cover the repository instead.
                    Ok(None) => {
                        debug!("no recent changes available; running comprehensive");
                        self.engine.comprehensive(&ctx).await?
                    }
                    Err(e) => {
                        warn!(error = %e, "change source failed; running comprehensive");
                        self.engine.comprehensive(&ctx).await?
                    }
                }
            }
            Cadence::Daily => self.engine.comprehensive(&ctx).await?,
            Cadence::Weekly | Cadence::Monthly => {
                self.engine.targeted(&ctx, Perspective::all()).await?
            }
            Cadence::OnDemand => {
                return Err(GatewayError::OnDemandNeverFires {
                    url: schedule.repository_url.clone(),
                })
            }
        };
        Ok(result)
    }

    /// Create the repository row on first observation, refresh it otherwise.
    async fn observe_repository(
        &self,
        url: &str,
        files: Option<&[PrFile]>,
    ) -> Result<Repository, GatewayError> {
        let (provider, owner, name) = parse_repository_url(url)?;
        let now = Utc::now();

        let mut repository = match self.repos.get_by_url(url).await? {
            Some(existing) => existing,
            None => {
                info!(url, "repository observed for the first time");
                Repository {
                    id: Uuid::new_v4(),
                    provider,
                    owner,
                    name,
                    url: url.to_string(),
                    private: false,
                    primary_language: None,
                    languages: Default::default(),
                    size_bytes: 0,
                    is_production: false,
                    created_at: now,
                    updated_at: now,
                }
            }
        };

        if let Some(files) = files {
            for file in files {
                if let Some(language) = &file.language {
                    let bytes = file.content.as_ref().map_or(0, |c| c.len() as u64);
                    *repository.languages.entry(language.clone()).or_insert(0) += bytes;
                }
            }
            repository.size_bytes = repository.languages.values().sum();
            repository.primary_language = repository
                .languages
                .iter()
                .max_by_key(|(_, bytes)| **bytes)
                .map(|(lang, _)| lang.clone());
        }
        repository.updated_at = now;

        self.repos.upsert(&repository).await?;
        Ok(repository)
    }

    /// Initialize the automatic schedule after an analysis; failures are
    /// logged and never fail the analysis itself.
    async fn ensure_schedule(&self, repository: &Repository, tier: &TierResult) {
        let activity = match self.scm.activity(repository).await {
            Ok(activity) => activity,
            Err(e) => {
                warn!(error = %e, "activity source failed; assuming dormant");
                Default::default()
            }
        };
        let mut repository = repository.clone();
        repository.is_production = self
            .scm
            .is_production(&repository)
            .await
            .unwrap_or(false);

        if let Err(e) = self
            .manager
            .initialize_automatic_schedule(&repository, &tier.result, &activity)
            .await
        {
            warn!(error = %e, "schedule initialization deferred");
        }
    }
}

#[async_trait]
impl TickHandler for WebhookHandler {
    async fn handle_tick(&self, schedule: &Schedule) -> anyhow::Result<TickOutcome> {
        let repository = self.repository_for(schedule).await?;
        let tier = self.run_scheduled(schedule, repository.clone()).await?;
        let activity = self.scm.activity(&repository).await.unwrap_or_default();
        let is_production = self.scm.is_production(&repository).await.unwrap_or(false);
        Ok(TickOutcome {
            result: tier.result,
            is_production,
            activity,
        })
    }
}

//─────────────────────────────
//  Helpers
//─────────────────────────────

/// Deleted files must not carry content; incoming payloads are normalized
/// rather than rejected.
fn normalize_files(mut files: Vec<PrFile>) -> Vec<PrFile> {
    for file in &mut files {
        if file.change_type == ChangeType::Deleted {
            file.content = None;
        }
    }
    files
}

fn parse_repository_url(url: &str) -> Result<(String, String, String), GatewayError> {
    let bad = || GatewayError::BadRepositoryUrl {
        url: url.to_string(),
    };

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let host = segments.next().ok_or_else(bad)?;
    let owner = segments.next().ok_or_else(bad)?;
    let name = segments.next().ok_or_else(bad)?;
    let provider = host.split('.').next().unwrap_or(host);
    if provider.is_empty() || owner.is_empty() || name.is_empty() {
        return Err(bad());
    }
    Ok((
        provider.to_string(),
        owner.to_string(),
        name.trim_end_matches(".git").to_string(),
    ))
}
