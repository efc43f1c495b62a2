#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **prism-store-memory** – In-memory storage driver for Prism.
//!
//! This crate provides a fast, non-persistent backend suitable for testing,
//! development, and scenarios where persistence is not required. All data is
//! stored in memory and lost when the process terminates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use prism_store_core::{AnalysisCache, RepositoryStore, ScheduleStore};
use prism_types::{
    CachedAnalysis, Repository, RepositoryId, Schedule, ScheduleId, ScheduleRun,
};

/// An in-memory, non-persistent backend for all three Prism stores.
///
/// Rows live in `HashMap`s behind `RwLock`s. Cache rows are append-mostly:
/// each `put` pushes a new record and history is retained, with only the
/// newest row per `(repository, analyzer)` consulted by reads.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    analyses: Arc<RwLock<HashMap<(RepositoryId, String), Vec<CachedAnalysis>>>>,
    schedules: Arc<RwLock<HashMap<ScheduleId, Schedule>>>,
    runs: Arc<RwLock<HashMap<ScheduleId, Vec<ScheduleRun>>>>,
    repositories: Arc<RwLock<HashMap<RepositoryId, Repository>>>,
}

impl MemoryBackend {
    /// Creates a new, empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cache rows stored, history included.
    pub async fn analysis_row_count(&self) -> usize {
        self.analyses.read().await.values().map(Vec::len).sum()
    }

    /// Clear all stored rows. Useful for test resets.
    pub async fn clear(&self) {
        self.analyses.write().await.clear();
        self.schedules.write().await.clear();
        self.runs.write().await.clear();
        self.repositories.write().await.clear();
    }
}

#[async_trait]
impl AnalysisCache for MemoryBackend {
    async fn get_latest(
        &self,
        repository: RepositoryId,
        analyzer: &str,
    ) -> Result<Option<CachedAnalysis>> {
        let analyses = self.analyses.read().await;
        Ok(analyses
            .get(&(repository, analyzer.to_string()))
            .and_then(|rows| rows.last().cloned()))
    }

    async fn get_valid(
        &self,
        repository: RepositoryId,
        analyzer: &str,
    ) -> Result<Option<CachedAnalysis>> {
        let now = Utc::now();
        Ok(self
            .get_latest(repository, analyzer)
            .await?
            .filter(|row| row.is_valid_at(now)))
    }

    async fn put(
        &self,
        repository: RepositoryId,
        analyzer: &str,
        data: Value,
        ttl: Duration,
        metadata: Option<Value>,
    ) -> Result<CachedAnalysis> {
        let now = Utc::now();
        let record = CachedAnalysis {
            repository_id: repository,
            analyzer: analyzer.to_string(),
            analysis_data: data,
            metadata: metadata.unwrap_or(Value::Null),
            cached_until: now + chrono::Duration::from_std(ttl)?,
            produced_at: now,
        };
        record.validate()?;

        self.analyses
            .write()
            .await
            .entry((repository, analyzer.to_string()))
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn invalidate(
        &self,
        repository: RepositoryId,
        analyzer: Option<&str>,
    ) -> Result<usize> {
        let now = Utc::now();
        let mut analyses = self.analyses.write().await;
        let mut touched = 0;
        for ((repo, key), rows) in analyses.iter_mut() {
            if *repo != repository {
                continue;
            }
            if analyzer.map_or(false, |a| a != key) {
                continue;
            }
            for row in rows.iter_mut().filter(|r| r.cached_until > now) {
                row.cached_until = now;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[async_trait]
impl ScheduleStore for MemoryBackend {
    async fn create(&self, schedule: &Schedule) -> Result<()> {
        schedule.validate()?;
        let mut schedules = self.schedules.write().await;
        if schedules
            .values()
            .any(|s| s.repository_url == schedule.repository_url)
        {
            bail!(
                "schedule already exists for repository '{}'",
                schedule.repository_url
            );
        }
        schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>> {
        Ok(self.schedules.read().await.get(&id).cloned())
    }

    async fn get_by_repository_url(&self, url: &str) -> Result<Option<Schedule>> {
        Ok(self
            .schedules
            .read()
            .await
            .values()
            .find(|s| s.repository_url == url)
            .cloned())
    }

    async fn update(&self, schedule: &Schedule) -> Result<()> {
        schedule.validate()?;
        let mut schedules = self.schedules.write().await;
        if !schedules.contains_key(&schedule.id) {
            bail!("schedule '{}' does not exist", schedule.id);
        }
        schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<Schedule>> {
        Ok(self
            .schedules
            .read()
            .await
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect())
    }

    async fn record_run(&self, run: &ScheduleRun) -> Result<()> {
        self.runs
            .write()
            .await
            .entry(run.schedule_id)
            .or_default()
            .push(run.clone());
        Ok(())
    }

    async fn runs_for(&self, schedule: ScheduleId, limit: usize) -> Result<Vec<ScheduleRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .get(&schedule)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl RepositoryStore for MemoryBackend {
    async fn upsert(&self, repository: &Repository) -> Result<()> {
        self.repositories
            .write()
            .await
            .insert(repository.id, repository.clone());
        Ok(())
    }

    async fn get(&self, id: RepositoryId) -> Result<Option<Repository>> {
        Ok(self.repositories.read().await.get(&id).cloned())
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<Repository>> {
        Ok(self
            .repositories
            .read()
            .await
            .values()
            .find(|r| r.url == url)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Repository>> {
        Ok(self.repositories.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_types::{Cadence, RunStatus, SchedulePriority};
    use serde_json::json;
    use uuid::Uuid;

    fn schedule_for(url: &str) -> Schedule {
        let now = Utc::now();
        Schedule {
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
            next_run_at: Some(now + chrono::Duration::days(1)),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn put_then_get_valid_roundtrip() {
        let backend = MemoryBackend::new();
        let repo = Uuid::new_v4();

        let stored = backend
            .put(
                repo,
                "comprehensive",
                json!({"score": 91}),
                Duration::from_secs(3600),
                None,
            )
            .await
            .unwrap();
        assert!(stored.cached_until > stored.produced_at);

        let valid = backend.get_valid(repo, "comprehensive").await.unwrap();
        assert_eq!(valid.unwrap().analysis_data, json!({"score": 91}));
        assert!(backend.get_valid(repo, "quick").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_rows_remain_latest_but_not_valid() {
        let backend = MemoryBackend::new();
        let repo = Uuid::new_v4();

        backend
            .put(repo, "comprehensive", json!(1), Duration::from_secs(3600), None)
            .await
            .unwrap();
        backend.invalidate(repo, Some("comprehensive")).await.unwrap();

        assert!(backend
            .get_latest(repo, "comprehensive")
            .await
            .unwrap()
            .is_some());
        assert!(backend
            .get_valid(repo, "comprehensive")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invalidate_without_analyzer_expires_all_keys() {
        let backend = MemoryBackend::new();
        let repo = Uuid::new_v4();
        let other = Uuid::new_v4();

        backend
            .put(repo, "comprehensive", json!(1), Duration::from_secs(60), None)
            .await
            .unwrap();
        backend
            .put(repo, "targeted:security", json!(2), Duration::from_secs(60), None)
            .await
            .unwrap();
        backend
            .put(other, "comprehensive", json!(3), Duration::from_secs(60), None)
            .await
            .unwrap();

        let touched = backend.invalidate(repo, None).await.unwrap();
        assert_eq!(touched, 2);
        assert!(backend.get_valid(other, "comprehensive").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn history_is_retained_and_newest_consulted() {
        let backend = MemoryBackend::new();
        let repo = Uuid::new_v4();

        backend
            .put(repo, "comprehensive", json!("old"), Duration::from_secs(60), None)
            .await
            .unwrap();
        backend
            .put(repo, "comprehensive", json!("new"), Duration::from_secs(60), None)
            .await
            .unwrap();

        assert_eq!(backend.analysis_row_count().await, 2);
        let latest = backend.get_latest(repo, "comprehensive").await.unwrap();
        assert_eq!(latest.unwrap().analysis_data, json!("new"));
    }

    #[tokio::test]
    async fn schedules_are_unique_per_repository_url() {
        let backend = MemoryBackend::new();
        let url = "https://example.invalid/acme/widgets";

        backend.create(&schedule_for(url)).await.unwrap();
        assert!(backend.create(&schedule_for(url)).await.is_err());

        let found = backend.get_by_repository_url(url).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn run_history_is_newest_first() {
        let backend = MemoryBackend::new();
        let schedule = schedule_for("https://example.invalid/acme/widgets");
        backend.create(&schedule).await.unwrap();

        for i in 0..3u64 {
            backend
                .record_run(&ScheduleRun {
                    id: Uuid::new_v4(),
                    schedule_id: schedule.id,
                    started_at: Utc::now(),
                    completed_at: Some(Utc::now()),
                    status: RunStatus::Success,
                    findings_count: i as usize,
                    critical_count: 0,
                    duration_ms: 100 + i,
                    error: None,
                })
                .await
                .unwrap();
        }

        let runs = backend.runs_for(schedule.id, 2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].findings_count, 2);
        assert_eq!(runs[1].findings_count, 1);
    }
}
