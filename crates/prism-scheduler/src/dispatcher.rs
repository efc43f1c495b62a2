//! The dispatch loop: fires active schedules at their `next_run_at`.
//!
//! Every tick goes through the webhook handler (via [`TickHandler`]) so
//! scheduler-initiated and human-initiated analysis share one code path.
//! One repository never has two overlapping runs; dispatches are coalesced
//! on the repository URL.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use prism_types::{
    ConsolidatedResult, RepositoryActivity, RunStatus, Schedule, ScheduleRun,
};

use crate::{PlanContext, ScheduleManager};

/// What a fired tick produced, fed back into cadence planning.
pub struct TickOutcome {
    /// The analysis result of the run.
    pub result: ConsolidatedResult,
    /// Whether the repository backs production.
    pub is_production: bool,
    /// Activity observed at analysis time.
    pub activity: RepositoryActivity,
}

/// Receiver of scheduled ticks; implemented by the webhook handler.
#[async_trait]
pub trait TickHandler: Send + Sync {
    /// Run the analysis a schedule tick asks for.
    async fn handle_tick(&self, schedule: &Schedule) -> anyhow::Result<TickOutcome>;
}

/// Dispatch loop configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on how long the loop sleeps between scans.
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// Long-lived dispatcher over the active schedules.
pub struct Dispatcher {
    manager: Arc<ScheduleManager>,
    handler: Arc<dyn TickHandler>,
    config: DispatchConfig,
    shutdown: CancellationToken,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        manager: Arc<ScheduleManager>,
        handler: Arc<dyn TickHandler>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            manager,
            handler,
            config,
            shutdown: CancellationToken::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Stop the loop after the current scan.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Spawn the dispatch loop; the handle completes on shutdown.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            info!("schedule dispatcher started");
            loop {
                let sleep_for = dispatcher.scan_and_fire().await;
                tokio::select! {
                    _ = dispatcher.shutdown.cancelled() => {
                        info!("schedule dispatcher stopping");
                        break;
                    }
                    _ = tokio::time::sleep(sleep_for) => {}
                }
            }
        })
    }

    /// One scan: fire every due schedule, then report how long to sleep
    /// until the nearest upcoming tick.
    async fn scan_and_fire(self: &Arc<Self>) -> Duration {
        let schedules = match self.manager.store().list_active().await {
            Ok(schedules) => schedules,
            // Store down: the tick is deferred, nothing is recorded.
            Err(e) => {
                warn!(error = %e, "schedule store unavailable; tick deferred");
                return self.config.poll_interval;
            }
        };

        let now = Utc::now();
        let mut nearest: Option<chrono::DateTime<Utc>> = None;

        for schedule in schedules {
            let Some(next_run_at) = schedule.next_run_at else {
                continue;
            };
            if next_run_at > now {
                nearest = Some(nearest.map_or(next_run_at, |n| n.min(next_run_at)));
                continue;
            }

            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(schedule.repository_url.clone()) {
                debug!(repo = %schedule.repository_url, "run already in flight; coalesced");
                continue;
            }
            drop(in_flight);

            let dispatcher = Arc::clone(self);
            tokio::spawn(async move {
                dispatcher.fire(schedule).await;
            });
        }

        let floor = self.config.poll_interval.min(Duration::from_secs(1));
        match nearest {
            Some(at) => (at - now)
                .to_std()
                .unwrap_or(floor)
                .min(self.config.poll_interval)
                .max(floor),
            None => self.config.poll_interval,
        }
    }

    /// Fire one schedule: run the tick, record the run, re-plan the cadence.
    async fn fire(&self, schedule: Schedule) {
        let started_at = Utc::now();
        let started = Instant::now();
        info!(repo = %schedule.repository_url, cadence = %schedule.cadence, "schedule fired");

        let (status, findings_count, critical_count, error, plan_ctx) =
            match self.handler.handle_tick(&schedule).await {
                Ok(outcome) => (
                    RunStatus::Success,
                    outcome.result.findings.len(),
                    outcome.result.critical_count(),
                    None,
                    Some(PlanContext {
                        is_production: outcome.is_production,
                        activity: outcome.activity,
                    }),
                ),
                Err(e) => {
                    warn!(repo = %schedule.repository_url, error = %e, "scheduled run errored");
                    (RunStatus::Error, 0, 0, Some(e.to_string()), None)
                }
            };

        let run = ScheduleRun {
            id: Uuid::new_v4(),
            schedule_id: schedule.id,
            started_at,
            completed_at: Some(Utc::now()),
            status,
            findings_count,
            critical_count,
            duration_ms: started.elapsed().as_millis() as u64,
            error,
        };

        if let Err(e) = self.manager.record_completion(run, plan_ctx.as_ref()).await {
            warn!(
                repo = %schedule.repository_url,
                error = %e,
                "run could not be recorded; schedule left untouched"
            );
        }

        self.in_flight
            .lock()
            .await
            .remove(&schedule.repository_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_store_core::ScheduleStore;
    use prism_store_memory::MemoryBackend;
    use prism_types::{Cadence, SchedulePriority};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        ticks: AtomicUsize,
        concurrent: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl CountingHandler {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                ticks: AtomicUsize::new(0),
                concurrent: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl TickHandler for CountingHandler {
        async fn handle_tick(&self, _schedule: &Schedule) -> anyhow::Result<TickOutcome> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(TickOutcome {
                result: ConsolidatedResult::default(),
                is_production: false,
                activity: RepositoryActivity {
                    active_devs: 5,
                    ..Default::default()
                },
            })
        }
    }

    async fn due_schedule(store: &MemoryBackend, url: &str) -> Schedule {
        let now = Utc::now();
        let schedule = Schedule {
            id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            repository_url: url.to_string(),
            cadence: Cadence::Weekly,
            cron_expr: "0 3 * * MON".to_string(),
            priority: SchedulePriority::Medium,
            reason: "moderate activity".to_string(),
            may_be_disabled: true,
            is_active: true,
            enabled_tools: vec![],
            notification_channels: vec![],
            consecutive_failures: 0,
            last_run_at: None,
            next_run_at: Some(now - chrono::Duration::seconds(5)),
            created_at: now,
            updated_at: now,
        };
        store.create(&schedule).await.unwrap();
        schedule
    }

    #[tokio::test]
    async fn due_schedule_fires_and_records_a_run() {
        let store = Arc::new(MemoryBackend::new());
        let schedule = due_schedule(&store, "https://example.invalid/acme/widgets").await;
        let manager = Arc::new(ScheduleManager::new(store.clone()));
        let handler = CountingHandler::new(Duration::from_millis(5));

        let dispatcher = Arc::new(Dispatcher::new(
            manager,
            handler.clone(),
            DispatchConfig {
                poll_interval: Duration::from_millis(20),
            },
        ));
        let handle = dispatcher.spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;
        dispatcher.shutdown();
        handle.await.unwrap();

        assert!(handler.ticks.load(Ordering::SeqCst) >= 1);
        let runs = store.runs_for(schedule.id, 10).await.unwrap();
        assert!(!runs.is_empty());
        assert_eq!(runs[0].status, RunStatus::Success);

        // Re-planned after the successful run; next tick lies in the future.
        let updated = store.get(schedule.id).await.unwrap().unwrap();
        assert!(updated.next_run_at.unwrap() > Utc::now());
        assert!(updated.last_run_at.is_some());
    }

    #[tokio::test]
    async fn runs_for_one_repository_never_overlap() {
        let store = Arc::new(MemoryBackend::new());
        due_schedule(&store, "https://example.invalid/acme/widgets").await;
        let manager = Arc::new(ScheduleManager::new(store.clone()));
        let handler = CountingHandler::new(Duration::from_millis(80));

        let dispatcher = Arc::new(Dispatcher::new(
            manager,
            handler.clone(),
            DispatchConfig {
                poll_interval: Duration::from_millis(5),
            },
        ));
        let handle = dispatcher.spawn();
        tokio::time::sleep(Duration::from_millis(250)).await;
        dispatcher.shutdown();
        handle.await.unwrap();

        assert!(handler.peak.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn errored_tick_records_an_error_run() {
        struct FailingHandler;

        #[async_trait]
        impl TickHandler for FailingHandler {
            async fn handle_tick(&self, _schedule: &Schedule) -> anyhow::Result<TickOutcome> {
                anyhow::bail!("analysis backend down")
            }
        }

        let store = Arc::new(MemoryBackend::new());
        let schedule = due_schedule(&store, "https://example.invalid/acme/widgets").await;
        let manager = Arc::new(ScheduleManager::new(store.clone()));

        let dispatcher = Arc::new(Dispatcher::new(
            manager,
            Arc::new(FailingHandler),
            DispatchConfig {
                poll_interval: Duration::from_millis(20),
            },
        ));
        let handle = dispatcher.spawn();
        tokio::time::sleep(Duration::from_millis(150)).await;
        dispatcher.shutdown();
        handle.await.unwrap();

        let runs = store.runs_for(schedule.id, 10).await.unwrap();
        assert!(!runs.is_empty());
        assert_eq!(runs[0].status, RunStatus::Error);
        assert!(runs[0].error.as_deref().unwrap().contains("backend down"));

        // Cadence untouched by a single failure.
        let updated = store.get(schedule.id).await.unwrap().unwrap();
        assert_eq!(updated.cadence, Cadence::Weekly);
    }
}
