#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **prism-store-core** – Core storage abstractions for Prism.
//!
//! This crate defines the contracts for the three authoritative stores
//! (analysis cache, schedules, repositories) without providing concrete
//! implementations. Storage drivers (in-memory, SQLite) implement these
//! traits in separate crates that depend on this core abstraction.
//!
//! All mutations are transactional at the row level; drivers guarantee that
//! readers never observe a partially written row.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use prism_types::{
    CachedAnalysis, Repository, RepositoryId, Schedule, ScheduleId, ScheduleRun,
};

pub use prism_types::DEFAULT_CACHE_TTL;

//─────────────────────────────
//  Analysis cache
//─────────────────────────────

/// TTL-bounded store of repository analyses keyed by `(repository, analyzer)`.
///
/// The cache is append-mostly: `put` adds a new row and prior rows are
/// retained for audit, but only the newest row per key is ever consulted.
/// Invalidation is a lazy tombstone that expires matching rows in place.
#[async_trait]
pub trait AnalysisCache: Send + Sync {
    /// Newest record for the key, regardless of validity.
    async fn get_latest(
        &self,
        repository: RepositoryId,
        analyzer: &str,
    ) -> Result<Option<CachedAnalysis>>;

    /// Newest record for the key, only if still valid (`now < cached_until`).
    async fn get_valid(
        &self,
        repository: RepositoryId,
        analyzer: &str,
    ) -> Result<Option<CachedAnalysis>>;

    /// Store a new record with `cached_until = now + ttl`.
    async fn put(
        &self,
        repository: RepositoryId,
        analyzer: &str,
        data: Value,
        ttl: Duration,
        metadata: Option<Value>,
    ) -> Result<CachedAnalysis>;

    /// Expire matching rows by setting `cached_until = now`.
    ///
    /// With `analyzer = None`, every analyzer of the repository is expired.
    /// Returns the number of rows touched.
    async fn invalidate(
        &self,
        repository: RepositoryId,
        analyzer: Option<&str>,
    ) -> Result<usize>;
}

//─────────────────────────────
//  Schedule store
//─────────────────────────────

/// Persistence for repository schedules and their run history.
///
/// Schedules are unique per repository URL; a schedule owns its run history.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a new schedule. Fails if one already exists for the URL.
    async fn create(&self, schedule: &Schedule) -> Result<()>;

    /// Fetch by id.
    async fn get(&self, id: ScheduleId) -> Result<Option<Schedule>>;

    /// Fetch by repository URL.
    async fn get_by_repository_url(&self, url: &str) -> Result<Option<Schedule>>;

    /// Replace an existing schedule row.
    async fn update(&self, schedule: &Schedule) -> Result<()>;

    /// All schedules the dispatcher should fire.
    async fn list_active(&self) -> Result<Vec<Schedule>>;

    /// Append a run record to the owning schedule's history.
    async fn record_run(&self, run: &ScheduleRun) -> Result<()>;

    /// Most recent runs for a schedule, newest first.
    async fn runs_for(&self, schedule: ScheduleId, limit: usize) -> Result<Vec<ScheduleRun>>;
}

//─────────────────────────────
//  Repository store
//─────────────────────────────

/// Persistence for observed repositories.
///
/// Repositories are created on first observation and updated on metadata
/// refresh; the core never destroys them.
#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Insert or refresh a repository row, keyed by id.
    async fn upsert(&self, repository: &Repository) -> Result<()>;

    /// Fetch by id.
    async fn get(&self, id: RepositoryId) -> Result<Option<Repository>>;

    /// Fetch by URL.
    async fn get_by_url(&self, url: &str) -> Result<Option<Repository>>;

    /// All known repositories.
    async fn list(&self) -> Result<Vec<Repository>>;
}
