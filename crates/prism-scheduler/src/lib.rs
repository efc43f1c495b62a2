#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **prism-scheduler** – Repository cadence scheduling for Prism.
//!
//! Every repository carries one schedule. On each analysis completion the
//! cadence rules are re-evaluated top-down:
//!
//! 1. outstanding critical findings → every six hours, critical priority,
//!    not disableable;
//! 2. production repository → daily at 02:00 UTC;
//! 3. activity score over 80 / 40 / 10 → daily 03:00 / weekly Monday 03:00 /
//!    monthly 1st 03:00;
//! 4. otherwise on-demand and inactive.
//!
//! The dispatcher fires active schedules at `next_run_at`, hands the tick to
//! the webhook handler, records a [`ScheduleRun`], and re-plans the cadence.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use prism_store_core::ScheduleStore;
use prism_types::{
    Cadence, ConsolidatedResult, Repository, RepositoryActivity, RunStatus, Schedule,
    ScheduleId, SchedulePriority, ScheduleRun,
};

pub mod cron;
pub mod dispatcher;

pub use dispatcher::{DispatchConfig, Dispatcher, TickHandler, TickOutcome};

/// Activity score above which a repository is scanned daily.
pub const DAILY_ACTIVITY_THRESHOLD: u32 = 80;

/// Activity score above which a repository is scanned weekly.
pub const WEEKLY_ACTIVITY_THRESHOLD: u32 = 40;

/// Activity score above which a repository is scanned monthly.
pub const MONTHLY_ACTIVITY_THRESHOLD: u32 = 10;

/// Consecutive failed runs after which priority is raised one level.
pub const CONSECUTIVE_FAILURE_THRESHOLD: usize = 3;

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Failures surfaced by scheduling.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A cron expression could not be evaluated.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron {
        /// The offending expression.
        expr: String,
        /// Parser detail.
        reason: String,
    },

    /// Attempt to pause a schedule that operators may not disable.
    #[error("schedule for '{repository_url}' may not be disabled")]
    MayNotBeDisabled {
        /// Repository whose schedule was targeted.
        repository_url: String,
    },

    /// Attempt to resume an on-demand schedule.
    #[error("on-demand schedule for '{repository_url}' cannot be resumed")]
    NotResumable {
        /// Repository whose schedule was targeted.
        repository_url: String,
    },

    /// The requested schedule does not exist.
    #[error("schedule '{id}' not found")]
    ScheduleNotFound {
        /// The missing schedule id.
        id: ScheduleId,
    },

    /// The schedule store was unreachable; the operation was not applied.
    #[error("schedule store unavailable: {0}")]
    StoreUnavailable(#[from] anyhow::Error),
}

//─────────────────────────────
//  Cadence planning
//─────────────────────────────

/// Repository facts the planner consumes besides the run outcome.
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    /// Whether the repository backs a production deployment.
    pub is_production: bool,
    /// Recent development activity.
    pub activity: RepositoryActivity,
}

/// The planner's verdict, applied onto a schedule row.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulePlan {
    /// Assigned cadence.
    pub cadence: Cadence,
    /// Canonical cron expression; empty for on-demand.
    pub cron_expr: String,
    /// Assigned priority.
    pub priority: SchedulePriority,
    /// Why this cadence was chosen.
    pub reason: String,
    /// Whether operators may disable the schedule.
    pub may_be_disabled: bool,
    /// Whether the dispatcher fires the schedule.
    pub is_active: bool,
}

/// Evaluate the cadence rules top-down; the first matching rule wins.
pub fn plan_cadence(critical_findings: usize, ctx: &PlanContext) -> SchedulePlan {
    if critical_findings > 0 {
        return SchedulePlan {
            cadence: Cadence::Every6h,
            cron_expr: cron::EVERY_6H_EXPR.to_string(),
            priority: SchedulePriority::Critical,
            reason: format!("{critical_findings} critical finding(s) outstanding"),
            may_be_disabled: false,
            is_active: true,
        };
    }

    if ctx.is_production {
        return SchedulePlan {
            cadence: Cadence::Daily,
            cron_expr: cron::DAILY_PRODUCTION_EXPR.to_string(),
            priority: SchedulePriority::High,
            reason: "production repository".to_string(),
            may_be_disabled: true,
            is_active: true,
        };
    }

    let score = ctx.activity.score();
    if score > DAILY_ACTIVITY_THRESHOLD {
        SchedulePlan {
            cadence: Cadence::Daily,
            cron_expr: cron::DAILY_ACTIVITY_EXPR.to_string(),
            priority: SchedulePriority::High,
            reason: format!("activity score {score}"),
            may_be_disabled: true,
            is_active: true,
        }
    } else if score > WEEKLY_ACTIVITY_THRESHOLD {
        SchedulePlan {
            cadence: Cadence::Weekly,
            cron_expr: cron::WEEKLY_EXPR.to_string(),
            priority: SchedulePriority::Medium,
            reason: format!("activity score {score}"),
            may_be_disabled: true,
            is_active: true,
        }
    } else if score > MONTHLY_ACTIVITY_THRESHOLD {
        SchedulePlan {
            cadence: Cadence::Monthly,
            cron_expr: cron::MONTHLY_EXPR.to_string(),
            priority: SchedulePriority::Low,
            reason: format!("activity score {score}"),
            may_be_disabled: true,
            is_active: true,
        }
    } else {
        SchedulePlan {
            cadence: Cadence::OnDemand,
            cron_expr: String::new(),
            priority: SchedulePriority::Minimal,
            reason: format!("activity score {score}; analysis on demand only"),
            may_be_disabled: true,
            is_active: false,
        }
    }
}

//─────────────────────────────
//  Schedule manager
//─────────────────────────────

/// Owns schedule rows: creation, cadence adjustment, pause/resume, and run
/// accounting. `is_active` transitions go through the store's row-level
/// transactions, serialized per repository.
pub struct ScheduleManager {
    store: Arc<dyn ScheduleStore>,
}

impl ScheduleManager {
    /// Create a manager over a schedule store.
    pub fn new(store: Arc<dyn ScheduleStore>) -> Self {
        Self { store }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.store
    }

    /// Create the automatic schedule for a repository after its first
    /// analysis. A no-op returning the existing row when one already exists;
    /// callers change cadence through [`ScheduleManager::update_cadence`].
    #[instrument(skip_all, fields(repo = %repository.full_name()))]
    pub async fn initialize_automatic_schedule(
        &self,
        repository: &Repository,
        result: &ConsolidatedResult,
        activity: &RepositoryActivity,
    ) -> Result<Schedule, SchedulerError> {
        if let Some(existing) = self.store.get_by_repository_url(&repository.url).await? {
            debug!("schedule already exists; initialization is a no-op");
            return Ok(existing);
        }

        let ctx = PlanContext {
            is_production: repository.is_production,
            activity: *activity,
        };
        let plan = plan_cadence(result.critical_count(), &ctx);
        let now = Utc::now();
        let next_run_at = if plan.is_active {
            Some(cron::next_fire(&plan.cron_expr, now)?)
        } else {
            None
        };

        let schedule = Schedule {
            id: Uuid::new_v4(),
            repository_id: repository.id,
            repository_url: repository.url.clone(),
            cadence: plan.cadence,
            cron_expr: plan.cron_expr,
            priority: plan.priority,
            reason: plan.reason,
            may_be_disabled: plan.may_be_disabled,
            is_active: plan.is_active,
            enabled_tools: Vec::new(),
            notification_channels: Vec::new(),
            consecutive_failures: 0,
            last_run_at: None,
            next_run_at,
            created_at: now,
            updated_at: now,
        };
        self.store.create(&schedule).await?;
        info!(
            cadence = %schedule.cadence,
            priority = %schedule.priority,
            "automatic schedule initialized"
        );
        Ok(schedule)
    }

    /// Apply a new plan onto an existing schedule, recomputing `next_run_at`.
    pub async fn update_cadence(
        &self,
        id: ScheduleId,
        plan: SchedulePlan,
    ) -> Result<Schedule, SchedulerError> {
        let mut schedule = self
            .store
            .get(id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound { id })?;
        apply_plan(&mut schedule, plan)?;
        self.store.update(&schedule).await?;
        Ok(schedule)
    }

    /// Record a finished run and re-plan the schedule.
    ///
    /// A successful run resets the failure streak and re-evaluates the
    /// cadence rules. A failed run leaves the cadence alone and grows the
    /// schedule's consecutive-failure counter; when the streak reaches
    /// [`CONSECUTIVE_FAILURE_THRESHOLD`], priority is raised one level for
    /// operator attention. The raise happens once per streak, on the
    /// transition into the threshold.
    #[instrument(skip_all, fields(schedule = %run.schedule_id, status = run.status.as_str()))]
    pub async fn record_completion(
        &self,
        run: ScheduleRun,
        plan_ctx: Option<&PlanContext>,
    ) -> Result<Schedule, SchedulerError> {
        let id = run.schedule_id;
        let mut schedule = self
            .store
            .get(id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound { id })?;

        self.store.record_run(&run).await?;
        schedule.last_run_at = Some(run.started_at);

        match run.status {
            RunStatus::Success => {
                schedule.consecutive_failures = 0;
                if let Some(ctx) = plan_ctx {
                    let plan = plan_cadence(run.critical_count, ctx);
                    apply_plan(&mut schedule, plan)?;
                }
            }
            RunStatus::Failed | RunStatus::Error => {
                schedule.consecutive_failures += 1;
                if schedule.consecutive_failures as usize == CONSECUTIVE_FAILURE_THRESHOLD {
                    let raised = schedule.priority.raised();
                    if raised != schedule.priority {
                        warn!(
                            from = %schedule.priority,
                            to = %raised,
                            streak = schedule.consecutive_failures,
                            "consecutive failures; raising schedule priority"
                        );
                        schedule.priority = raised;
                        if schedule.priority == SchedulePriority::Critical {
                            schedule.may_be_disabled = false;
                        }
                    }
                }
            }
        }

        if schedule.is_active {
            schedule.next_run_at = Some(cron::next_fire(&schedule.cron_expr, Utc::now())?);
        } else {
            schedule.next_run_at = None;
        }
        schedule.updated_at = Utc::now();
        self.store.update(&schedule).await?;
        Ok(schedule)
    }

    /// Pause an active schedule. Refused when the schedule is not
    /// disableable (critical priority).
    pub async fn pause(&self, id: ScheduleId) -> Result<Schedule, SchedulerError> {
        let mut schedule = self
            .store
            .get(id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound { id })?;
        if !schedule.may_be_disabled {
            return Err(SchedulerError::MayNotBeDisabled {
                repository_url: schedule.repository_url,
            });
        }
        schedule.is_active = false;
        schedule.next_run_at = None;
        schedule.updated_at = Utc::now();
        self.store.update(&schedule).await?;
        info!(repo = %schedule.repository_url, "schedule paused");
        Ok(schedule)
    }

    /// Resume a paused schedule. On-demand schedules have nothing to resume.
    pub async fn resume(&self, id: ScheduleId) -> Result<Schedule, SchedulerError> {
        let mut schedule = self
            .store
            .get(id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound { id })?;
        if schedule.cadence == Cadence::OnDemand {
            return Err(SchedulerError::NotResumable {
                repository_url: schedule.repository_url,
            });
        }
        schedule.is_active = true;
        schedule.next_run_at = Some(cron::next_fire(&schedule.cron_expr, Utc::now())?);
        schedule.updated_at = Utc::now();
        self.store.update(&schedule).await?;
        info!(repo = %schedule.repository_url, "schedule resumed");
        Ok(schedule)
    }
}

/// Write a plan's fields onto a schedule and recompute `next_run_at`.
fn apply_plan(schedule: &mut Schedule, plan: SchedulePlan) -> Result<(), SchedulerError> {
    schedule.cadence = plan.cadence;
    schedule.cron_expr = plan.cron_expr;
    schedule.priority = plan.priority;
    schedule.reason = plan.reason;
    schedule.may_be_disabled = plan.may_be_disabled;
    schedule.is_active = plan.is_active;
    schedule.next_run_at = if plan.is_active {
        Some(cron::next_fire(&schedule.cron_expr, Utc::now())?)
    } else {
        None
    };
    schedule.updated_at = Utc::now();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_store_memory::MemoryBackend;
    use prism_types::{Finding, FindingKind, Severity};
    use std::collections::HashMap;

    fn repository(url: &str) -> Repository {
        Repository {
            id: Uuid::new_v4(),
            provider: "github".to_string(),
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            url: url.to_string(),
            private: false,
            primary_language: Some("rust".to_string()),
            languages: HashMap::from([("rust".to_string(), 100)]),
            size_bytes: 100,
            is_production: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn result_with_criticals(n: usize) -> ConsolidatedResult {
        let mut result = ConsolidatedResult::default();
        for i in 0..n {
            result.findings.push(
                Finding::new(
                    FindingKind::Issue,
                    Severity::Critical,
                    "security",
                    format!("critical issue {i}"),
                )
                .at("src/lib.rs", i as u32 + 1),
            );
        }
        result
    }

    fn busy_activity() -> RepositoryActivity {
        RepositoryActivity {
            commits_last_week: 10,
            commits_last_month: 20,
            active_devs: 3,
            open_prs: 2,
            merge_frequency: 1,
        }
    }

    fn run(schedule_id: ScheduleId, status: RunStatus, criticals: usize) -> ScheduleRun {
        ScheduleRun {
            id: Uuid::new_v4(),
            schedule_id,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            status,
            findings_count: criticals,
            critical_count: criticals,
            duration_ms: 42,
            error: None,
        }
    }

    #[test]
    fn critical_findings_win_over_everything() {
        let ctx = PlanContext {
            is_production: true,
            activity: busy_activity(),
        };
        let plan = plan_cadence(2, &ctx);
        assert_eq!(plan.cadence, Cadence::Every6h);
        assert_eq!(plan.cron_expr, "0 */6 * * *");
        assert_eq!(plan.priority, SchedulePriority::Critical);
        assert!(!plan.may_be_disabled);
        assert!(plan.reason.contains("critical"));
    }

    #[test]
    fn production_gets_daily_at_two() {
        let ctx = PlanContext {
            is_production: true,
            activity: RepositoryActivity::default(),
        };
        let plan = plan_cadence(0, &ctx);
        assert_eq!(plan.cadence, Cadence::Daily);
        assert_eq!(plan.cron_expr, "0 2 * * *");
        assert_eq!(plan.priority, SchedulePriority::High);
    }

    #[test]
    fn activity_thresholds_map_to_cadences() {
        let plan_for = |activity: RepositoryActivity| {
            plan_cadence(
                0,
                &PlanContext {
                    is_production: false,
                    activity,
                },
            )
        };

        // score = 10*active_devs
        let daily = plan_for(RepositoryActivity {
            active_devs: 9,
            ..Default::default()
        });
        assert_eq!(daily.cadence, Cadence::Daily);
        assert_eq!(daily.cron_expr, "0 3 * * *");

        let weekly = plan_for(RepositoryActivity {
            active_devs: 5,
            ..Default::default()
        });
        assert_eq!(weekly.cadence, Cadence::Weekly);
        assert_eq!(weekly.priority, SchedulePriority::Medium);

        let monthly = plan_for(RepositoryActivity {
            active_devs: 2,
            ..Default::default()
        });
        assert_eq!(monthly.cadence, Cadence::Monthly);
        assert_eq!(monthly.priority, SchedulePriority::Low);
    }

    #[test]
    fn inactive_repository_goes_on_demand() {
        let plan = plan_cadence(
            0,
            &PlanContext {
                is_production: false,
                activity: RepositoryActivity::default(),
            },
        );
        assert_eq!(plan.cadence, Cadence::OnDemand);
        assert_eq!(plan.priority, SchedulePriority::Minimal);
        assert!(plan.cron_expr.is_empty());
        assert!(!plan.is_active);
    }

    #[tokio::test]
    async fn initialization_is_idempotent() {
        let store = Arc::new(MemoryBackend::new());
        let manager = ScheduleManager::new(store);
        let repo = repository("https://example.invalid/acme/widgets");
        let result = ConsolidatedResult::default();
        let activity = busy_activity();

        let first = manager
            .initialize_automatic_schedule(&repo, &result, &activity)
            .await
            .unwrap();
        let second = manager
            .initialize_automatic_schedule(&repo, &result, &activity)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.cadence, second.cadence);
    }

    #[tokio::test]
    async fn critical_run_escalates_weekly_schedule() {
        let store = Arc::new(MemoryBackend::new());
        let manager = ScheduleManager::new(store);
        let repo = repository("https://example.invalid/acme/widgets");

        // Moderate activity: weekly, medium priority.
        let activity = RepositoryActivity {
            active_devs: 5,
            ..Default::default()
        };
        let schedule = manager
            .initialize_automatic_schedule(&repo, &ConsolidatedResult::default(), &activity)
            .await
            .unwrap();
        assert_eq!(schedule.cadence, Cadence::Weekly);
        assert_eq!(schedule.priority, SchedulePriority::Medium);

        let ctx = PlanContext {
            is_production: false,
            activity,
        };
        let updated = manager
            .record_completion(run(schedule.id, RunStatus::Success, 1), Some(&ctx))
            .await
            .unwrap();

        assert_eq!(updated.cadence, Cadence::Every6h);
        assert_eq!(updated.cron_expr, "0 */6 * * *");
        assert_eq!(updated.priority, SchedulePriority::Critical);
        assert!(!updated.may_be_disabled);
        assert!(updated.reason.contains("critical"));
        assert!(updated.next_run_at.is_some());
        assert!(updated.last_run_at.is_some());
    }

    #[tokio::test]
    async fn cleared_criticals_deescalate() {
        let store = Arc::new(MemoryBackend::new());
        let manager = ScheduleManager::new(store);
        let repo = repository("https://example.invalid/acme/widgets");
        let activity = RepositoryActivity {
            active_devs: 5,
            ..Default::default()
        };
        let ctx = PlanContext {
            is_production: false,
            activity,
        };

        let schedule = manager
            .initialize_automatic_schedule(&repo, &result_with_criticals(1), &activity)
            .await
            .unwrap();
        assert_eq!(schedule.cadence, Cadence::Every6h);

        let updated = manager
            .record_completion(run(schedule.id, RunStatus::Success, 0), Some(&ctx))
            .await
            .unwrap();
        assert_eq!(updated.cadence, Cadence::Weekly);
        assert_eq!(updated.priority, SchedulePriority::Medium);
        assert!(updated.may_be_disabled);
    }

    #[tokio::test]
    async fn failure_streak_raises_priority_once_without_recadencing() {
        let store = Arc::new(MemoryBackend::new());
        let manager = ScheduleManager::new(store);
        let repo = repository("https://example.invalid/acme/widgets");
        let activity = RepositoryActivity {
            active_devs: 2,
            ..Default::default()
        };

        let schedule = manager
            .initialize_automatic_schedule(&repo, &ConsolidatedResult::default(), &activity)
            .await
            .unwrap();
        assert_eq!(schedule.cadence, Cadence::Monthly);
        assert_eq!(schedule.priority, SchedulePriority::Low);

        let mut latest = schedule.clone();
        for n in 1..=2 {
            latest = manager
                .record_completion(run(schedule.id, RunStatus::Failed, 0), None)
                .await
                .unwrap();
            assert_eq!(latest.consecutive_failures, n);
            assert_eq!(latest.priority, SchedulePriority::Low);
        }

        latest = manager
            .record_completion(run(schedule.id, RunStatus::Failed, 0), None)
            .await
            .unwrap();
        assert_eq!(latest.cadence, Cadence::Monthly);
        assert_eq!(latest.priority, SchedulePriority::Medium);

        // A longer streak keeps the already-raised priority.
        for _ in 0..2 {
            latest = manager
                .record_completion(run(schedule.id, RunStatus::Error, 0), None)
                .await
                .unwrap();
        }
        assert_eq!(latest.consecutive_failures, 5);
        assert_eq!(latest.priority, SchedulePriority::Medium);
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let store = Arc::new(MemoryBackend::new());
        let manager = ScheduleManager::new(store);
        let repo = repository("https://example.invalid/acme/widgets");
        let activity = RepositoryActivity {
            active_devs: 2,
            ..Default::default()
        };

        let schedule = manager
            .initialize_automatic_schedule(&repo, &ConsolidatedResult::default(), &activity)
            .await
            .unwrap();

        let mut latest = schedule.clone();
        for _ in 0..3 {
            latest = manager
                .record_completion(run(schedule.id, RunStatus::Failed, 0), None)
                .await
                .unwrap();
        }
        assert_eq!(latest.priority, SchedulePriority::Medium);

        latest = manager
            .record_completion(run(schedule.id, RunStatus::Success, 0), None)
            .await
            .unwrap();
        assert_eq!(latest.consecutive_failures, 0);

        // A fresh streak must reach the threshold again before the next
        // raise.
        for n in 1..=2 {
            latest = manager
                .record_completion(run(schedule.id, RunStatus::Failed, 0), None)
                .await
                .unwrap();
            assert_eq!(latest.consecutive_failures, n);
            assert_eq!(latest.priority, SchedulePriority::Medium);
        }
        latest = manager
            .record_completion(run(schedule.id, RunStatus::Failed, 0), None)
            .await
            .unwrap();
        assert_eq!(latest.priority, SchedulePriority::High);
    }

    #[tokio::test]
    async fn pause_refused_for_critical_schedules() {
        let store = Arc::new(MemoryBackend::new());
        let manager = ScheduleManager::new(store);
        let repo = repository("https://example.invalid/acme/widgets");

        let schedule = manager
            .initialize_automatic_schedule(
                &repo,
                &result_with_criticals(1),
                &RepositoryActivity::default(),
            )
            .await
            .unwrap();

        let err = manager.pause(schedule.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::MayNotBeDisabled { .. }));
    }

    #[tokio::test]
    async fn pause_and_resume_roundtrip() {
        let store = Arc::new(MemoryBackend::new());
        let manager = ScheduleManager::new(store);
        let repo = repository("https://example.invalid/acme/widgets");
        let activity = RepositoryActivity {
            active_devs: 5,
            ..Default::default()
        };

        let schedule = manager
            .initialize_automatic_schedule(&repo, &ConsolidatedResult::default(), &activity)
            .await
            .unwrap();

        let paused = manager.pause(schedule.id).await.unwrap();
        assert!(!paused.is_active);
        assert!(paused.next_run_at.is_none());

        let resumed = manager.resume(schedule.id).await.unwrap();
        assert!(resumed.is_active);
        assert!(resumed.next_run_at.is_some());
    }
}
