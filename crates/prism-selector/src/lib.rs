#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **prism-selector** – Analyzer configuration resolution for Prism.
//!
//! For a given `(agent role, language, repository size)` the selector
//! resolves which tool runs as primary and which ordered fallbacks back it
//! up. Configuration is consulted in a fixed order: per-request override,
//! stored exact row, role default, universal default. The selector never
//! fabricates configuration; when nothing matches it surfaces
//! [`SelectorError::NoConfigurationForContext`] and the run aborts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use prism_types::{AgentRole, SizeBucket, ToolOverrides};

/// A resolved tool choice: one primary and its ordered fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSelection {
    /// Tool to attempt first.
    pub primary: String,
    /// Tools promoted, in order, when the primary degrades.
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

/// One stored configuration row for an exact `(role, language, size)` key.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectionRow {
    /// Agent role the row applies to.
    pub role: AgentRole,
    /// Language the row applies to.
    pub language: String,
    /// Repository size bucket the row applies to.
    pub size: SizeBucket,
    /// The selection itself.
    #[serde(flatten)]
    pub selection: ToolSelection,
}

/// Per-role default used when no exact row matches.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleDefault {
    /// Agent role the default applies to.
    pub role: AgentRole,
    /// The selection itself.
    #[serde(flatten)]
    pub selection: ToolSelection,
}

/// Declarative selector configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectorConfig {
    /// Exact `(role, language, size)` rows.
    #[serde(default)]
    pub rows: Vec<SelectionRow>,
    /// Per-role defaults.
    #[serde(default)]
    pub role_defaults: Vec<RoleDefault>,
    /// Last-resort default across all roles.
    #[serde(default)]
    pub universal_default: Option<ToolSelection>,
}

/// Failures surfaced by selection.
#[derive(Debug, Error)]
pub enum SelectorError {
    /// No configuration row, role default, or universal default matched.
    #[error("no tool configuration for role '{role}', language '{language}', size '{size}'")]
    NoConfigurationForContext {
        /// Requested role.
        role: String,
        /// Requested language.
        language: String,
        /// Requested size bucket.
        size: String,
    },
}

/// Resolves analyzer configuration for analysis contexts.
pub struct ModelSelector {
    rows: HashMap<(AgentRole, String, SizeBucket), ToolSelection>,
    role_defaults: HashMap<AgentRole, ToolSelection>,
    universal_default: Option<ToolSelection>,
}

impl ModelSelector {
    /// Build a selector from declarative configuration.
    pub fn from_config(config: SelectorConfig) -> Self {
        let rows = config
            .rows
            .into_iter()
            .map(|row| ((row.role, row.language, row.size), row.selection))
            .collect();
        let role_defaults = config
            .role_defaults
            .into_iter()
            .map(|d| (d.role, d.selection))
            .collect();
        Self {
            rows,
            role_defaults,
            universal_default: config.universal_default,
        }
    }

    /// An empty selector; every resolution fails until rows are added.
    pub fn empty() -> Self {
        Self::from_config(SelectorConfig::default())
    }

    /// Resolve the selection for a context.
    ///
    /// Lookup order: per-request override → exact `(role, language, size)`
    /// row → role default → universal default. A matching override primary
    /// short-circuits the stored configuration entirely; override fallbacks
    /// alone replace the fallback list of whatever the lookup produced.
    pub fn resolve(
        &self,
        role: AgentRole,
        language: &str,
        size: SizeBucket,
        overrides: Option<&ToolOverrides>,
    ) -> Result<ToolSelection, SelectorError> {
        if let Some(o) = overrides {
            if let Some(primary) = &o.primary {
                debug!(role = %role, primary = %primary, "per-request override in effect");
                return Ok(ToolSelection {
                    primary: primary.clone(),
                    fallbacks: o.fallbacks.clone(),
                });
            }
        }

        let mut selection = self
            .rows
            .get(&(role, language.to_string(), size))
            .or_else(|| self.role_defaults.get(&role))
            .or(self.universal_default.as_ref())
            .cloned()
            .ok_or_else(|| SelectorError::NoConfigurationForContext {
                role: role.to_string(),
                language: language.to_string(),
                size: size.to_string(),
            })?;

        if let Some(o) = overrides {
            if !o.fallbacks.is_empty() {
                selection.fallbacks = o.fallbacks.clone();
            }
        }
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(primary: &str, fallbacks: &[&str]) -> ToolSelection {
        ToolSelection {
            primary: primary.to_string(),
            fallbacks: fallbacks.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn selector() -> ModelSelector {
        ModelSelector::from_config(SelectorConfig {
            rows: vec![SelectionRow {
                role: AgentRole::Security,
                language: "rust".to_string(),
                size: SizeBucket::Small,
                selection: selection("rust-sec-small", &["generic-sec"]),
            }],
            role_defaults: vec![RoleDefault {
                role: AgentRole::Security,
                selection: selection("generic-sec", &["backup-sec"]),
            }],
            universal_default: Some(selection("universal", &[])),
        })
    }

    #[test]
    fn exact_row_wins_over_role_default() {
        let resolved = selector()
            .resolve(AgentRole::Security, "rust", SizeBucket::Small, None)
            .unwrap();
        assert_eq!(resolved.primary, "rust-sec-small");
    }

    #[test]
    fn role_default_covers_unmatched_language() {
        let resolved = selector()
            .resolve(AgentRole::Security, "go", SizeBucket::Large, None)
            .unwrap();
        assert_eq!(resolved.primary, "generic-sec");
        assert_eq!(resolved.fallbacks, vec!["backup-sec".to_string()]);
    }

    #[test]
    fn universal_default_covers_unmatched_role() {
        let resolved = selector()
            .resolve(AgentRole::Documentation, "rust", SizeBucket::Small, None)
            .unwrap();
        assert_eq!(resolved.primary, "universal");
    }

    #[test]
    fn missing_configuration_is_an_error() {
        let selector = ModelSelector::from_config(SelectorConfig::default());
        let err = selector
            .resolve(AgentRole::Security, "rust", SizeBucket::Small, None)
            .unwrap_err();
        assert!(matches!(
            err,
            SelectorError::NoConfigurationForContext { .. }
        ));
    }

    #[test]
    fn override_primary_short_circuits() {
        let overrides = ToolOverrides {
            primary: Some("special".to_string()),
            fallbacks: vec!["spare".to_string()],
        };
        let resolved = selector()
            .resolve(
                AgentRole::Security,
                "rust",
                SizeBucket::Small,
                Some(&overrides),
            )
            .unwrap();
        assert_eq!(resolved.primary, "special");
        assert_eq!(resolved.fallbacks, vec!["spare".to_string()]);
    }

    #[test]
    fn override_fallbacks_replace_lookup_fallbacks() {
        let overrides = ToolOverrides {
            primary: None,
            fallbacks: vec!["only-this".to_string()],
        };
        let resolved = selector()
            .resolve(
                AgentRole::Security,
                "rust",
                SizeBucket::Small,
                Some(&overrides),
            )
            .unwrap();
        assert_eq!(resolved.primary, "rust-sec-small");
        assert_eq!(resolved.fallbacks, vec!["only-this".to_string()]);
    }

    #[test]
    fn config_deserializes_from_toml_shaped_json() {
        let config: SelectorConfig = serde_json::from_value(serde_json::json!({
            "rows": [{
                "role": "security",
                "language": "rust",
                "size": "small",
                "primary": "rust-sec",
                "fallbacks": ["generic"]
            }],
            "role_defaults": [{
                "role": "code-quality",
                "primary": "linter"
            }],
            "universal_default": { "primary": "catch-all" }
        }))
        .unwrap();
        let selector = ModelSelector::from_config(config);
        assert_eq!(
            selector
                .resolve(AgentRole::CodeQuality, "go", SizeBucket::Medium, None)
                .unwrap()
                .primary,
            "linter"
        );
    }
}
