#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **prism-registry** – Tool catalog for Prism.
//!
//! The registry keeps three indices over the registered analyzer tools
//! (`id → tool`, `role → set<toolId>`, `language → set<toolId>`) and answers
//! compatibility queries for analysis contexts. Registration updates all
//! indices under a single write lock so readers never observe a partially
//! indexed tool.
//!
//! Hosted-server tools additionally pass through the [`ToolSupervisor`],
//! which owns their process lifecycle and restarts them after unexpected
//! exits.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use prism_types::traits::HEALTH_CHECK_DEADLINE_MS;
use prism_types::{AgentRole, AnalysisContext, AnalyzerTool};

pub mod errors;
pub mod supervisor;

pub use errors::RegistryError;
pub use supervisor::ToolSupervisor;

/// Index key marking tools with no language restriction.
const UNIVERSAL_LANGUAGE: &str = "*";

/// Minimum registered tools per role for selection to degrade gracefully.
pub const MIN_TOOLS_PER_ROLE: usize = 2;

#[derive(Default)]
struct Indices {
    by_id: HashMap<String, Arc<dyn AnalyzerTool>>,
    by_role: HashMap<AgentRole, BTreeSet<String>>,
    by_language: HashMap<String, BTreeSet<String>>,
}

impl Indices {
    fn insert(&mut self, tool: Arc<dyn AnalyzerTool>) {
        let spec = tool.spec().clone();
        let id = spec.id.clone();

        // Re-registration replaces the previous entry wholesale.
        self.remove(&id);

        for role in &spec.supported_roles {
            self.by_role.entry(*role).or_default().insert(id.clone());
        }
        if spec.supported_languages.is_empty() {
            self.by_language
                .entry(UNIVERSAL_LANGUAGE.to_string())
                .or_default()
                .insert(id.clone());
        } else {
            for lang in &spec.supported_languages {
                self.by_language
                    .entry(lang.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }
        self.by_id.insert(id, tool);
    }

    fn remove(&mut self, id: &str) -> Option<Arc<dyn AnalyzerTool>> {
        let tool = self.by_id.remove(id)?;
        for ids in self.by_role.values_mut() {
            ids.remove(id);
        }
        for ids in self.by_language.values_mut() {
            ids.remove(id);
        }
        Some(tool)
    }
}

/// Thread-safe catalog of analyzer tools.
///
/// The registry is read-mostly: lookups take a shared lock, while
/// register/unregister take the exclusive lock and mutate every index in one
/// step. Share across tasks with `Arc<ToolRegistry>`.
pub struct ToolRegistry {
    inner: RwLock<Indices>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Indices::default()),
        }
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous registration with the same id.
    ///
    /// Registration is idempotent by id and updates all three indices under
    /// one write lock, so concurrent readers never see the tool in some
    /// indices but not others.
    pub async fn register(&self, tool: Arc<dyn AnalyzerTool>) {
        let id = tool.id().to_string();
        self.inner.write().await.insert(tool);
        info!(tool = %id, "registered analyzer tool");
    }

    /// Remove a tool from all indices. Returns the tool if it was present.
    pub async fn unregister(&self, id: &str) -> Option<Arc<dyn AnalyzerTool>> {
        let removed = self.inner.write().await.remove(id);
        if removed.is_some() {
            info!(tool = %id, "unregistered analyzer tool");
        }
        removed
    }

    /// Fetch a tool by id.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn AnalyzerTool>> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    /// All registered tool ids, sorted.
    pub async fn list(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner.by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tools able to fill `role`.
    pub async fn tools_for_role(&self, role: AgentRole) -> Vec<Arc<dyn AnalyzerTool>> {
        let inner = self.inner.read().await;
        inner
            .by_role
            .get(&role)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    /// Tools understanding `language`, universal tools included.
    pub async fn tools_for_language(&self, language: &str) -> Vec<Arc<dyn AnalyzerTool>> {
        let inner = self.inner.read().await;
        let mut ids: BTreeSet<&String> = BTreeSet::new();
        if let Some(for_lang) = inner.by_language.get(language) {
            ids.extend(for_lang);
        }
        if let Some(universal) = inner.by_language.get(UNIVERSAL_LANGUAGE) {
            ids.extend(universal);
        }
        ids.into_iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    /// Tools compatible with a context: the intersection of the role index,
    /// the language index over the context's languages, and each tool's own
    /// `can_analyze` check.
    pub async fn compatible(&self, ctx: &AnalysisContext) -> Vec<Arc<dyn AnalyzerTool>> {
        let languages = context_languages(ctx);
        let inner = self.inner.read().await;

        let Some(role_ids) = inner.by_role.get(&ctx.agent_role) else {
            return Vec::new();
        };

        role_ids
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|tool| {
                let spec = tool.spec();
                languages.is_empty() || languages.iter().any(|l| spec.supports_language(l))
            })
            .filter(|tool| tool.can_analyze(ctx))
            .cloned()
            .collect()
    }

    /// Probe every registered tool's liveness, each under the 2s deadline.
    ///
    /// A probe that errors or misses the deadline maps to `false`.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let tools: Vec<(String, Arc<dyn AnalyzerTool>)> = {
            let inner = self.inner.read().await;
            inner
                .by_id
                .iter()
                .map(|(id, tool)| (id.clone(), tool.clone()))
                .collect()
        };

        let deadline = Duration::from_millis(HEALTH_CHECK_DEADLINE_MS);
        let probes = tools.into_iter().map(|(id, tool)| async move {
            let healthy = match tokio::time::timeout(deadline, tool.health_check()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(tool = %id, error = %e, "health check failed");
                    false
                }
                Err(_) => {
                    warn!(tool = %id, "health check missed the {deadline:?} deadline");
                    false
                }
            };
            (id, healthy)
        });

        join_all(probes).await.into_iter().collect()
    }

    /// Verify that every role has at least [`MIN_TOOLS_PER_ROLE`] tools so
    /// selection can degrade to a fallback.
    pub async fn verify_coverage(&self, roles: &[AgentRole]) -> Result<(), RegistryError> {
        let inner = self.inner.read().await;
        for role in roles {
            let count = inner.by_role.get(role).map_or(0, |ids| ids.len());
            if count < MIN_TOOLS_PER_ROLE {
                return Err(RegistryError::InsufficientCoverage {
                    role: role.to_string(),
                    count,
                });
            }
        }
        debug!("registry coverage verified for {} roles", roles.len());
        Ok(())
    }
}

/// Languages relevant to a context: the PR's file languages when a PR is
/// present, else the repository's primary language.
fn context_languages(ctx: &AnalysisContext) -> BTreeSet<String> {
    match &ctx.pr {
        Some(pr) => pr.languages(),
        None => ctx
            .repository
            .primary_language
            .iter()
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use prism_types::{
        ChangeType, PrFile, PullRequest, Repository, ToolKind, ToolRequirements, ToolResult,
        ToolSpec, UserContext,
    };
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;

    struct StubTool {
        spec: ToolSpec,
        healthy: bool,
    }

    impl StubTool {
        fn new(id: &str, roles: Vec<AgentRole>, languages: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                spec: ToolSpec {
                    id: id.to_string(),
                    kind: ToolKind::InProcess,
                    version: "1.0.0".to_string(),
                    capabilities: vec![],
                    requirements: ToolRequirements::default(),
                    supported_roles: roles,
                    supported_languages: languages.into_iter().map(String::from).collect(),
                },
                healthy: true,
            })
        }

        fn unhealthy(id: &str, roles: Vec<AgentRole>) -> Arc<Self> {
            Arc::new(Self {
                spec: ToolSpec {
                    id: id.to_string(),
                    kind: ToolKind::InProcess,
                    version: "1.0.0".to_string(),
                    capabilities: vec![],
                    requirements: ToolRequirements::default(),
                    supported_roles: roles,
                    supported_languages: vec![],
                },
                healthy: false,
            })
        }
    }

    #[async_trait]
    impl AnalyzerTool for StubTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }

        async fn execute(&self, _ctx: &AnalysisContext) -> Result<ToolResult> {
            Ok(ToolResult::ok(
                self.spec.id.clone(),
                Utc::now(),
                Duration::from_millis(1),
                vec![],
                StdHashMap::new(),
            ))
        }

        async fn health_check(&self) -> Result<()> {
            if self.healthy {
                Ok(())
            } else {
                anyhow::bail!("backing process gone")
            }
        }
    }

    fn rust_context() -> AnalysisContext {
        AnalysisContext {
            agent_role: AgentRole::Security,
            pr: Some(PullRequest {
                number: 1,
                title: "t".to_string(),
                description: String::new(),
                base_ref: "main".to_string(),
                target_ref: "feat".to_string(),
                author: "dev".to_string(),
                files: vec![PrFile {
                    path: "src/lib.rs".to_string(),
                    content: Some("fn main() {}".to_string()),
                    diff: None,
                    change_type: ChangeType::Modified,
                    language: Some("rust".to_string()),
                }],
                commits: vec![],
            }),
            repository: Repository {
                id: Uuid::new_v4(),
                provider: "github".to_string(),
                owner: "acme".to_string(),
                name: "widgets".to_string(),
                url: "https://github.com/acme/widgets".to_string(),
                private: false,
                primary_language: Some("rust".to_string()),
                languages: StdHashMap::from([("rust".to_string(), 1000)]),
                size_bytes: 1000,
                is_production: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            user: UserContext {
                user_id: "u".to_string(),
                org_id: "o".to_string(),
                permissions: vec![],
            },
            tool_overrides: None,
        }
    }

    #[tokio::test]
    async fn registration_is_idempotent_by_id() {
        let registry = ToolRegistry::new();
        registry
            .register(StubTool::new("scanner", vec![AgentRole::Security], vec![]))
            .await;
        registry
            .register(StubTool::new(
                "scanner",
                vec![AgentRole::Security, AgentRole::CodeQuality],
                vec!["rust"],
            ))
            .await;

        assert_eq!(registry.list().await, vec!["scanner".to_string()]);
        assert_eq!(
            registry.tools_for_role(AgentRole::CodeQuality).await.len(),
            1
        );
        // The replaced registration dropped universality.
        assert!(registry.tools_for_language("python").await.is_empty());
    }

    #[tokio::test]
    async fn unregister_clears_all_indices() {
        let registry = ToolRegistry::new();
        registry
            .register(StubTool::new(
                "scanner",
                vec![AgentRole::Security],
                vec!["rust"],
            ))
            .await;
        assert!(registry.unregister("scanner").await.is_some());
        assert!(registry.get("scanner").await.is_none());
        assert!(registry.tools_for_role(AgentRole::Security).await.is_empty());
        assert!(registry.tools_for_language("rust").await.is_empty());
        assert!(registry.unregister("scanner").await.is_none());
    }

    #[tokio::test]
    async fn universal_tools_match_every_language() {
        let registry = ToolRegistry::new();
        registry
            .register(StubTool::new("generic", vec![AgentRole::Security], vec![]))
            .await;
        registry
            .register(StubTool::new(
                "rusty",
                vec![AgentRole::Security],
                vec!["rust"],
            ))
            .await;

        assert_eq!(registry.tools_for_language("rust").await.len(), 2);
        assert_eq!(registry.tools_for_language("go").await.len(), 1);
    }

    #[tokio::test]
    async fn compatible_intersects_role_language_and_can_analyze() {
        let registry = ToolRegistry::new();
        registry
            .register(StubTool::new(
                "rust-sec",
                vec![AgentRole::Security],
                vec!["rust"],
            ))
            .await;
        registry
            .register(StubTool::new(
                "go-sec",
                vec![AgentRole::Security],
                vec!["go"],
            ))
            .await;
        registry
            .register(StubTool::new(
                "rust-style",
                vec![AgentRole::CodeQuality],
                vec!["rust"],
            ))
            .await;

        let ctx = rust_context();
        let compatible = registry.compatible(&ctx).await;
        assert_eq!(compatible.len(), 1);
        assert_eq!(compatible[0].id(), "rust-sec");
    }

    #[tokio::test]
    async fn health_check_maps_failures() {
        let registry = ToolRegistry::new();
        registry
            .register(StubTool::new("alive", vec![AgentRole::Security], vec![]))
            .await;
        registry
            .register(StubTool::unhealthy("dead", vec![AgentRole::Security]))
            .await;

        let health = registry.health_check().await;
        assert_eq!(health.get("alive"), Some(&true));
        assert_eq!(health.get("dead"), Some(&false));
    }

    #[tokio::test]
    async fn coverage_requires_two_tools_per_role() {
        let registry = ToolRegistry::new();
        registry
            .register(StubTool::new("solo", vec![AgentRole::Security], vec![]))
            .await;

        let err = registry
            .verify_coverage(&[AgentRole::Security])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::InsufficientCoverage { count: 1, .. }
        ));

        registry
            .register(StubTool::new("backup", vec![AgentRole::Security], vec![]))
            .await;
        assert!(registry.verify_coverage(&[AgentRole::Security]).await.is_ok());
    }
}
