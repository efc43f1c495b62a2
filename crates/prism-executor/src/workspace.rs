//! Isolated scratch workspaces for tool executions.
//!
//! Each execution materializes the PR's live file set into a fresh temporary
//! directory and hands the tool a context whose file paths point into it.
//! The directory is removed when the [`Workspace`] drops, which covers every
//! exit path: success, failure, timeout, cancellation, and unwinding panics.

use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

use prism_types::AnalysisContext;

/// Resource ceilings enforced while materializing a workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceLimits {
    /// Maximum total bytes of file content written into the workspace.
    pub max_total_bytes: u64,
    /// Maximum number of files written into the workspace.
    pub max_file_count: usize,
}

impl Default for WorkspaceLimits {
    fn default() -> Self {
        Self {
            max_total_bytes: 64 * 1024 * 1024,
            max_file_count: 2_000,
        }
    }
}

/// Failures while setting up a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A file path escaped the workspace root.
    #[error("unsafe file path '{path}' rejected")]
    UnsafePath {
        /// The rejected path.
        path: String,
    },

    /// The PR file set exceeded a workspace limit.
    #[error("workspace limit exceeded: {detail}")]
    LimitExceeded {
        /// Which limit and by how much.
        detail: String,
    },

    /// Underlying filesystem failure.
    #[error("workspace I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A per-execution scratch directory holding the PR's live files.
///
/// Never shared between executions; concurrent executions for the same user
/// land in distinct directories. Removal happens on drop.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    _temp: TempDir,
}

impl Workspace {
    /// Materialize the context's live files under `base_dir` and return the
    /// workspace together with a context whose live-file paths point into it.
    ///
    /// Deleted files are neither written nor re-pathed; their entries stay in
    /// the context (without content) so diff-oriented tools still see them.
    pub async fn materialize(
        base_dir: &Path,
        ctx: &AnalysisContext,
        limits: &WorkspaceLimits,
    ) -> Result<(Self, AnalysisContext), WorkspaceError> {
        tokio::fs::create_dir_all(base_dir).await?;

        let temp = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize_component(&ctx.user.user_id)))
            .tempdir_in(base_dir)?;
        let root = temp.path().to_path_buf();

        let mut scoped = ctx.clone();
        let mut total_bytes: u64 = 0;
        let mut file_count: usize = 0;

        if let Some(pr) = &mut scoped.pr {
            for file in &mut pr.files {
                if file.change_type == prism_types::ChangeType::Deleted {
                    continue;
                }
                let relative = safe_relative_path(&file.path)?;
                let target = root.join(&relative);

                file_count += 1;
                if file_count > limits.max_file_count {
                    return Err(WorkspaceError::LimitExceeded {
                        detail: format!("file count above {}", limits.max_file_count),
                    });
                }

                if let Some(content) = &file.content {
                    total_bytes += content.len() as u64;
                    if total_bytes > limits.max_total_bytes {
                        return Err(WorkspaceError::LimitExceeded {
                            detail: format!("content above {} bytes", limits.max_total_bytes),
                        });
                    }
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, content).await?;
                }

                file.path = target.to_string_lossy().into_owned();
            }
        }

        debug!(
            root = %root.display(),
            files = file_count,
            bytes = total_bytes,
            "workspace materialized"
        );

        Ok((Self { root, _temp: temp }, scoped))
    }

    /// Root directory of the workspace.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Reject absolute paths and parent-directory traversal.
fn safe_relative_path(raw: &str) -> Result<PathBuf, WorkspaceError> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return Err(WorkspaceError::UnsafePath {
            path: raw.to_string(),
        });
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(WorkspaceError::UnsafePath {
                    path: raw.to_string(),
                })
            }
        }
    }
    Ok(path.to_path_buf())
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use prism_types::{
        AgentRole, ChangeType, PrFile, PullRequest, Repository, UserContext,
    };
    use std::collections::HashMap;
    use uuid::Uuid;

    fn context_with_files(files: Vec<PrFile>) -> AnalysisContext {
        AnalysisContext {
            agent_role: AgentRole::CodeQuality,
            pr: Some(PullRequest {
                number: 9,
                title: "t".to_string(),
                description: String::new(),
                base_ref: "main".to_string(),
                target_ref: "feat".to_string(),
                author: "dev".to_string(),
                files,
                commits: vec![],
            }),
            repository: Repository {
                id: Uuid::new_v4(),
                provider: "github".to_string(),
                owner: "acme".to_string(),
                name: "widgets".to_string(),
                url: "https://example.invalid/acme/widgets".to_string(),
                private: false,
                primary_language: Some("rust".to_string()),
                languages: HashMap::from([("rust".to_string(), 100)]),
                size_bytes: 100,
                is_production: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            user: UserContext {
                user_id: "user-1".to_string(),
                org_id: "org".to_string(),
                permissions: vec![],
            },
            tool_overrides: None,
        }
    }

    fn file(path: &str, content: Option<&str>, change: ChangeType) -> PrFile {
        PrFile {
            path: path.to_string(),
            content: content.map(String::from),
            diff: None,
            change_type: change,
            language: Some("rust".to_string()),
        }
    }

    #[tokio::test]
    async fn live_files_land_in_workspace_and_paths_are_rewritten() {
        let base = tempfile::tempdir().unwrap();
        let ctx = context_with_files(vec![
            file("src/lib.rs", Some("fn a() {}"), ChangeType::Modified),
            file("gone.rs", None, ChangeType::Deleted),
        ]);

        let (ws, scoped) = Workspace::materialize(base.path(), &ctx, &WorkspaceLimits::default())
            .await
            .unwrap();

        let files = &scoped.pr.as_ref().unwrap().files;
        let rewritten = Path::new(&files[0].path);
        assert!(rewritten.starts_with(ws.root()));
        assert_eq!(
            tokio::fs::read_to_string(rewritten).await.unwrap(),
            "fn a() {}"
        );
        // Deleted entries keep their original path and are not materialized.
        assert_eq!(files[1].path, "gone.rs");
        assert!(!ws.root().join("gone.rs").exists());
    }

    #[tokio::test]
    async fn workspace_is_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let ctx = context_with_files(vec![file(
            "src/lib.rs",
            Some("fn a() {}"),
            ChangeType::Added,
        )]);

        let root = {
            let (ws, _) = Workspace::materialize(base.path(), &ctx, &WorkspaceLimits::default())
                .await
                .unwrap();
            ws.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let base = tempfile::tempdir().unwrap();
        let ctx = context_with_files(vec![file(
            "../escape.rs",
            Some("nope"),
            ChangeType::Added,
        )]);

        let err = Workspace::materialize(base.path(), &ctx, &WorkspaceLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::UnsafePath { .. }));
    }

    #[tokio::test]
    async fn byte_limit_is_enforced() {
        let base = tempfile::tempdir().unwrap();
        let ctx = context_with_files(vec![file(
            "big.rs",
            Some("0123456789"),
            ChangeType::Added,
        )]);
        let limits = WorkspaceLimits {
            max_total_bytes: 4,
            max_file_count: 10,
        };

        let err = Workspace::materialize(base.path(), &ctx, &limits)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::LimitExceeded { .. }));
    }
}
