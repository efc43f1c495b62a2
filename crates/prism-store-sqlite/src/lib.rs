#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **prism-store-sqlite** – SQLite-based persistent storage driver for Prism.
//!
//! This crate provides a durable backend for the analysis cache, schedule
//! store, and repository store using the SQLite engine via sqlx. It offers
//! row-level transactions and portable on-disk storage while keeping the
//! same interface as the in-memory driver.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use prism_store_core::{AnalysisCache, RepositoryStore, ScheduleStore};
use prism_types::{
    CachedAnalysis, Repository, RepositoryId, Schedule, ScheduleId, ScheduleRun,
};

/// A persistent backend for all three Prism stores.
///
/// The database carries four tables mirroring the persistence boundary:
/// `repositories`, `repository_analysis`, `repository_schedules`, and
/// `schedule_runs`. Cache rows are append-mostly; the newest row per
/// `(repositoryId, analyzer)` serves reads.
#[derive(Debug)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Opens or creates a database at the given path and runs migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let database_url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePool::connect(&database_url).await?;
        Self::from_pool(pool).await
    }

    /// Opens an in-memory database; useful for tests and temporary storage.
    ///
    /// The pool is pinned to one connection: every pooled connection would
    /// otherwise open its own private `:memory:` database.
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Creates a backend from an existing pool, running migrations.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let backend = Self { pool };
        backend.migrate().await?;
        Ok(backend)
    }

    /// Close the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                private INTEGER NOT NULL,
                primaryLanguage TEXT,
                languages TEXT NOT NULL,
                size INTEGER NOT NULL,
                createdAt TEXT NOT NULL,
                updatedAt TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repository_analysis (
                id TEXT PRIMARY KEY,
                repositoryId TEXT NOT NULL,
                analyzer TEXT NOT NULL,
                analysisData TEXT NOT NULL,
                metadata TEXT NOT NULL,
                cachedUntil TEXT NOT NULL,
                durationMs INTEGER NOT NULL,
                createdAt TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analysis_key \
             ON repository_analysis(repositoryId, analyzer, createdAt)",
        )
        .execute(&self.pool)
        .await?;

        // repositoryId is a driver-side extra so schedules round-trip
        // without a join; the boundary key remains repositoryUrl.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repository_schedules (
                id TEXT PRIMARY KEY,
                repositoryId TEXT NOT NULL,
                repositoryUrl TEXT NOT NULL UNIQUE,
                cronExpression TEXT NOT NULL,
                cadence TEXT NOT NULL,
                enabledTools TEXT NOT NULL,
                notificationChannels TEXT NOT NULL,
                priority TEXT NOT NULL,
                reason TEXT NOT NULL,
                mayBeDisabled INTEGER NOT NULL,
                isActive INTEGER NOT NULL,
                consecutiveFailures INTEGER NOT NULL DEFAULT 0,
                lastRunAt TEXT,
                nextRunAt TEXT,
                createdAt TEXT NOT NULL,
                updatedAt TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schedule_runs (
                id TEXT PRIMARY KEY,
                scheduleId TEXT NOT NULL,
                startedAt TEXT NOT NULL,
                completedAt TEXT,
                status TEXT NOT NULL,
                findingsCount INTEGER NOT NULL,
                criticalCount INTEGER NOT NULL,
                durationMs INTEGER NOT NULL,
                error TEXT
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_runs_schedule \
             ON schedule_runs(scheduleId, startedAt)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

//─────────────────────────────
//  Row mapping helpers
//─────────────────────────────

fn ts(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("invalid timestamp '{value}'"))?
        .with_timezone(&Utc))
}

fn opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(ts).transpose()
}

fn id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("invalid id '{value}'"))
}

fn enum_str<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        Value::String(s) => Ok(s),
        other => Err(anyhow!("expected string-serialized enum, got {other}")),
    }
}

fn enum_from<T: DeserializeOwned>(value: &str) -> Result<T> {
    serde_json::from_value(Value::String(value.to_string()))
        .with_context(|| format!("invalid enum value '{value}'"))
}

fn analysis_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CachedAnalysis> {
    let repository_id: String = row.get("repositoryId");
    let analysis_data: String = row.get("analysisData");
    let metadata: String = row.get("metadata");
    let cached_until: String = row.get("cachedUntil");
    let created_at: String = row.get("createdAt");
    Ok(CachedAnalysis {
        repository_id: id(&repository_id)?,
        analyzer: row.get("analyzer"),
        analysis_data: serde_json::from_str(&analysis_data)?,
        metadata: serde_json::from_str(&metadata)?,
        cached_until: ts(&cached_until)?,
        produced_at: ts(&created_at)?,
    })
}

fn schedule_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Schedule> {
    let sid: String = row.get("id");
    let repository_id: String = row.get("repositoryId");
    let cadence: String = row.get("cadence");
    let priority: String = row.get("priority");
    let enabled_tools: String = row.get("enabledTools");
    let channels: String = row.get("notificationChannels");
    let created_at: String = row.get("createdAt");
    let updated_at: String = row.get("updatedAt");
    Ok(Schedule {
        id: id(&sid)?,
        repository_id: id(&repository_id)?,
        repository_url: row.get("repositoryUrl"),
        cadence: enum_from(&cadence)?,
        cron_expr: row.get("cronExpression"),
        priority: enum_from(&priority)?,
        reason: row.get("reason"),
        may_be_disabled: row.get::<i64, _>("mayBeDisabled") != 0,
        is_active: row.get::<i64, _>("isActive") != 0,
        enabled_tools: serde_json::from_str(&enabled_tools)?,
        notification_channels: serde_json::from_str(&channels)?,
        consecutive_failures: row.get::<i64, _>("consecutiveFailures") as u32,
        last_run_at: opt_ts(row.get("lastRunAt"))?,
        next_run_at: opt_ts(row.get("nextRunAt"))?,
        created_at: ts(&created_at)?,
        updated_at: ts(&updated_at)?,
    })
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ScheduleRun> {
    let rid: String = row.get("id");
    let schedule_id: String = row.get("scheduleId");
    let started_at: String = row.get("startedAt");
    let status: String = row.get("status");
    Ok(ScheduleRun {
        id: id(&rid)?,
        schedule_id: id(&schedule_id)?,
        started_at: ts(&started_at)?,
        completed_at: opt_ts(row.get("completedAt"))?,
        status: enum_from(&status)?,
        findings_count: row.get::<i64, _>("findingsCount") as usize,
        critical_count: row.get::<i64, _>("criticalCount") as usize,
        duration_ms: row.get::<i64, _>("durationMs") as u64,
        error: row.get("error"),
    })
}

fn repository_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Repository> {
    let rid: String = row.get("id");
    let full_name: String = row.get("name");
    let languages: String = row.get("languages");
    let created_at: String = row.get("createdAt");
    let updated_at: String = row.get("updatedAt");
    let (owner, name) = full_name
        .split_once('/')
        .map(|(o, n)| (o.to_string(), n.to_string()))
        .unwrap_or_else(|| (String::new(), full_name.clone()));
    Ok(Repository {
        id: id(&rid)?,
        provider: row.get("provider"),
        owner,
        name,
        url: row.get("url"),
        private: row.get::<i64, _>("private") != 0,
        primary_language: row.get("primaryLanguage"),
        languages: serde_json::from_str(&languages)?,
        size_bytes: row.get::<i64, _>("size") as u64,
        is_production: false,
        created_at: ts(&created_at)?,
        updated_at: ts(&updated_at)?,
    })
}

//─────────────────────────────
//  Trait implementations
//─────────────────────────────

#[async_trait]
impl AnalysisCache for SqliteBackend {
    async fn get_latest(
        &self,
        repository: RepositoryId,
        analyzer: &str,
    ) -> Result<Option<CachedAnalysis>> {
        let row = sqlx::query(
            "SELECT * FROM repository_analysis \
             WHERE repositoryId = ? AND analyzer = ? \
             ORDER BY createdAt DESC, rowid DESC LIMIT 1",
        )
        .bind(repository.to_string())
        .bind(analyzer)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(analysis_from_row).transpose()
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
            .filter(|record| record.is_valid_at(now)))
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
        let metadata = metadata.unwrap_or(Value::Null);
        let record = CachedAnalysis {
            repository_id: repository,
            analyzer: analyzer.to_string(),
            analysis_data: data,
            metadata: metadata.clone(),
            cached_until: now + chrono::Duration::from_std(ttl)?,
            produced_at: now,
        };
        record.validate()?;

        let duration_ms = metadata
            .get("durationMs")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        sqlx::query(
            r#"
            INSERT INTO repository_analysis
            (id, repositoryId, analyzer, analysisData, metadata, cachedUntil, durationMs, createdAt)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(repository.to_string())
        .bind(analyzer)
        .bind(serde_json::to_string(&record.analysis_data)?)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(record.cached_until.to_rfc3339())
        .bind(duration_ms)
        .bind(record.produced_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn invalidate(
        &self,
        repository: RepositoryId,
        analyzer: Option<&str>,
    ) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let result = match analyzer {
            Some(analyzer) => {
                sqlx::query(
                    "UPDATE repository_analysis SET cachedUntil = ? \
                     WHERE repositoryId = ? AND analyzer = ? AND cachedUntil > ?",
                )
                .bind(&now)
                .bind(repository.to_string())
                .bind(analyzer)
                .bind(&now)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE repository_analysis SET cachedUntil = ? \
                     WHERE repositoryId = ? AND cachedUntil > ?",
                )
                .bind(&now)
                .bind(repository.to_string())
                .bind(&now)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl ScheduleStore for SqliteBackend {
    async fn create(&self, schedule: &Schedule) -> Result<()> {
        schedule.validate()?;
        let existing = self
            .get_by_repository_url(&schedule.repository_url)
            .await?;
        if existing.is_some() {
            bail!(
                "schedule already exists for repository '{}'",
                schedule.repository_url
            );
        }
        self.write_schedule(schedule, false).await
    }

    async fn get(&self, sid: ScheduleId) -> Result<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM repository_schedules WHERE id = ?")
            .bind(sid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn get_by_repository_url(&self, url: &str) -> Result<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM repository_schedules WHERE repositoryUrl = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn update(&self, schedule: &Schedule) -> Result<()> {
        schedule.validate()?;
        if ScheduleStore::get(self, schedule.id).await?.is_none() {
            bail!("schedule '{}' does not exist", schedule.id);
        }
        self.write_schedule(schedule, true).await
    }

    async fn list_active(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query("SELECT * FROM repository_schedules WHERE isActive = 1")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn record_run(&self, run: &ScheduleRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO schedule_runs
            (id, scheduleId, startedAt, completedAt, status, findingsCount, criticalCount, durationMs, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.schedule_id.to_string())
        .bind(run.started_at.to_rfc3339())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(enum_str(&run.status)?)
        .bind(run.findings_count as i64)
        .bind(run.critical_count as i64)
        .bind(run.duration_ms as i64)
        .bind(run.error.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn runs_for(&self, schedule: ScheduleId, limit: usize) -> Result<Vec<ScheduleRun>> {
        let rows = sqlx::query(
            "SELECT * FROM schedule_runs WHERE scheduleId = ? \
             ORDER BY startedAt DESC, rowid DESC LIMIT ?",
        )
        .bind(schedule.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }
}

impl SqliteBackend {
    async fn write_schedule(&self, schedule: &Schedule, replace: bool) -> Result<()> {
        let verb = if replace {
            "INSERT OR REPLACE"
        } else {
            "INSERT"
        };
        let query = format!(
            r#"
            {verb} INTO repository_schedules
            (id, repositoryId, repositoryUrl, cronExpression, cadence, enabledTools,
             notificationChannels, priority, reason, mayBeDisabled, isActive,
             consecutiveFailures, lastRunAt, nextRunAt, createdAt, updatedAt)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        );
        sqlx::query(&query)
            .bind(schedule.id.to_string())
            .bind(schedule.repository_id.to_string())
            .bind(&schedule.repository_url)
            .bind(&schedule.cron_expr)
            .bind(enum_str(&schedule.cadence)?)
            .bind(serde_json::to_string(&schedule.enabled_tools)?)
            .bind(serde_json::to_string(&schedule.notification_channels)?)
            .bind(enum_str(&schedule.priority)?)
            .bind(&schedule.reason)
            .bind(schedule.may_be_disabled as i64)
            .bind(schedule.is_active as i64)
            .bind(schedule.consecutive_failures as i64)
            .bind(schedule.last_run_at.map(|t| t.to_rfc3339()))
            .bind(schedule.next_run_at.map(|t| t.to_rfc3339()))
            .bind(schedule.created_at.to_rfc3339())
            .bind(schedule.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RepositoryStore for SqliteBackend {
    async fn upsert(&self, repository: &Repository) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO repositories
            (id, provider, name, url, private, primaryLanguage, languages, size, createdAt, updatedAt)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(repository.id.to_string())
        .bind(&repository.provider)
        .bind(repository.full_name())
        .bind(&repository.url)
        .bind(repository.private as i64)
        .bind(repository.primary_language.clone())
        .bind(serde_json::to_string(&repository.languages)?)
        .bind(repository.size_bytes as i64)
        .bind(repository.created_at.to_rfc3339())
        .bind(repository.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, rid: RepositoryId) -> Result<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE id = ?")
            .bind(rid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(repository_from_row).transpose()
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(repository_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Repository>> {
        let rows = sqlx::query("SELECT * FROM repositories")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(repository_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_types::{Cadence, RunStatus, SchedulePriority};
    use serde_json::json;
    use std::collections::HashMap;

    fn repository(url: &str) -> Repository {
        Repository {
            id: Uuid::new_v4(),
            provider: "github".to_string(),
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            url: url.to_string(),
            private: true,
            primary_language: Some("rust".to_string()),
            languages: HashMap::from([("rust".to_string(), 9000)]),
            size_bytes: 9000,
            is_production: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn schedule(url: &str) -> Schedule {
        let now = Utc::now();
        Schedule {
            id: Uuid::new_v4(),
            repository_id: Uuid::new_v4(),
            repository_url: url.to_string(),
            cadence: Cadence::Daily,
            cron_expr: "0 3 * * *".to_string(),
            priority: SchedulePriority::High,
            reason: "high activity".to_string(),
            may_be_disabled: true,
            is_active: true,
            enabled_tools: vec!["scanner".to_string()],
            notification_channels: vec!["#reviews".to_string()],
            consecutive_failures: 0,
            last_run_at: None,
            next_run_at: Some(now + chrono::Duration::hours(6)),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn repository_roundtrip() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let repo = repository("https://example.invalid/acme/widgets");
        backend.upsert(&repo).await.unwrap();

        let loaded = RepositoryStore::get(&backend, repo.id).await.unwrap().unwrap();
        assert_eq!(loaded.owner, "acme");
        assert_eq!(loaded.name, "widgets");
        assert_eq!(loaded.languages.get("rust"), Some(&9000));
        assert!(loaded.private);

        let by_url = backend.get_by_url(&repo.url).await.unwrap();
        assert_eq!(by_url.unwrap().id, repo.id);
    }

    #[tokio::test]
    async fn cache_put_get_invalidate() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let repo = Uuid::new_v4();

        backend
            .put(
                repo,
                "comprehensive",
                json!({"score": 77}),
                Duration::from_secs(3600),
                Some(json!({"durationMs": 1234})),
            )
            .await
            .unwrap();

        let valid = backend.get_valid(repo, "comprehensive").await.unwrap();
        assert_eq!(valid.unwrap().analysis_data, json!({"score": 77}));

        let touched = backend.invalidate(repo, Some("comprehensive")).await.unwrap();
        assert_eq!(touched, 1);
        assert!(backend.get_valid(repo, "comprehensive").await.unwrap().is_none());
        assert!(backend.get_latest(repo, "comprehensive").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn newest_cache_row_serves_reads() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let repo = Uuid::new_v4();

        backend
            .put(repo, "comprehensive", json!("old"), Duration::from_secs(60), None)
            .await
            .unwrap();
        backend
            .put(repo, "comprehensive", json!("new"), Duration::from_secs(60), None)
            .await
            .unwrap();

        let latest = backend.get_latest(repo, "comprehensive").await.unwrap();
        assert_eq!(latest.unwrap().analysis_data, json!("new"));
    }

    #[tokio::test]
    async fn schedule_roundtrip_and_uniqueness() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let s = schedule("https://example.invalid/acme/widgets");

        backend.create(&s).await.unwrap();
        assert!(backend.create(&schedule(&s.repository_url)).await.is_err());

        let loaded = ScheduleStore::get(&backend, s.id).await.unwrap().unwrap();
        assert_eq!(loaded.cadence, Cadence::Daily);
        assert_eq!(loaded.priority, SchedulePriority::High);
        assert_eq!(loaded.enabled_tools, vec!["scanner".to_string()]);

        let mut updated = loaded.clone();
        updated.cadence = Cadence::Every6h;
        updated.cron_expr = "0 */6 * * *".to_string();
        updated.priority = SchedulePriority::Critical;
        updated.may_be_disabled = false;
        backend.update(&updated).await.unwrap();

        let active = backend.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].cadence, Cadence::Every6h);
    }

    #[tokio::test]
    async fn run_history_roundtrip() {
        let backend = SqliteBackend::in_memory().await.unwrap();
        let s = schedule("https://example.invalid/acme/widgets");
        backend.create(&s).await.unwrap();

        for i in 0..3i64 {
            backend
                .record_run(&ScheduleRun {
                    id: Uuid::new_v4(),
                    schedule_id: s.id,
                    started_at: Utc::now() + chrono::Duration::seconds(i),
                    completed_at: Some(Utc::now() + chrono::Duration::seconds(i + 1)),
                    status: if i == 2 { RunStatus::Failed } else { RunStatus::Success },
                    findings_count: i as usize,
                    critical_count: 0,
                    duration_ms: 50,
                    error: (i == 2).then(|| "tool crashed".to_string()),
                })
                .await
                .unwrap();
        }

        let runs = backend.runs_for(s.id, 10).await.unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("tool crashed"));
    }
}
