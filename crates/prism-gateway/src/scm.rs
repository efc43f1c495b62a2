//! Interface to the source-control provider.
//!
//! Fetching diffs and activity statistics is the job of an external
//! collaborator; the gateway only depends on this trait. The null provider
//! keeps the system functional without one: scheduled quick scans fall back
//! to the comprehensive tier and activity scores read as zero.

use async_trait::async_trait;

use prism_types::{PullRequest, Repository, RepositoryActivity};

/// Source-control metadata provider.
#[async_trait]
pub trait ScmProvider: Send + Sync {
    /// Changes merged since the last scan, shaped as a pull request, for
    /// scheduled quick scans. `None` when nothing (or no provider) is
    /// available.
    async fn recent_changes(
        &self,
        _repository: &Repository,
    ) -> anyhow::Result<Option<PullRequest>> {
        Ok(None)
    }

    /// Recent development activity used for cadence planning.
    async fn activity(&self, _repository: &Repository) -> anyhow::Result<RepositoryActivity> {
        Ok(RepositoryActivity::default())
    }

    /// Whether the repository backs a production deployment.
    async fn is_production(&self, _repository: &Repository) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Provider used when no source-control integration is configured.
pub struct NullScmProvider;

#[async_trait]
impl ScmProvider for NullScmProvider {}
