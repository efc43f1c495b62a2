#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **prism-types** – Shared primitive data structures for Prism.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It defines the review-analysis data model (repositories, pull requests,
//! findings, schedules) and the behaviour trait analyzer tools implement.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

//─────────────────────────────
//  Behaviour traits
//─────────────────────────────

/// Behaviour traits (`AnalyzerTool`, `HostedTool`) shared across crates.
pub mod traits;
pub use traits::{AnalyzerTool, HostedTool};

//─────────────────────────────
//  Core identifiers
//─────────────────────────────

/// Unique identifier for a repository record (UUID v4).
pub type RepositoryId = Uuid;

/// Unique identifier for a schedule row (UUID v4).
pub type ScheduleId = Uuid;

/// Unique identifier for a single schedule run (UUID v4).
pub type RunId = Uuid;

//─────────────────────────────
//  Repository model
//─────────────────────────────

/// Repositories below this size are bucketed `small`.
pub const SMALL_REPO_MAX_BYTES: u64 = 1024 * 1024;

/// Repositories below this size (and at least [`SMALL_REPO_MAX_BYTES`]) are
/// bucketed `medium`; everything above is `large`.
pub const MEDIUM_REPO_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Coarse repository size classification used for analyzer selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeBucket {
    /// Under 1 MiB of tracked source.
    Small,
    /// Between 1 MiB and 50 MiB.
    Medium,
    /// 50 MiB and above.
    Large,
}

impl SizeBucket {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeBucket::Small => "small",
            SizeBucket::Medium => "medium",
            SizeBucket::Large => "large",
        }
    }
}

impl fmt::Display for SizeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source repository under review.
///
/// Created on first observation, updated on metadata refresh, never
/// destroyed by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Stable record identifier.
    pub id: RepositoryId,
    /// Hosting provider, e.g. `github`.
    pub provider: String,
    /// Owning organisation or user.
    pub owner: String,
    /// Repository name within the owner namespace.
    pub name: String,
    /// Clone/browse URL.
    pub url: String,
    /// Whether the repository is private.
    pub private: bool,
    /// Inferred primary language, if any.
    pub primary_language: Option<String>,
    /// Aggregate byte count per language.
    pub languages: HashMap<String, u64>,
    /// Total tracked size in bytes.
    pub size_bytes: u64,
    /// Whether the repository backs a production deployment.
    ///
    /// Runtime metadata supplied by the caller; not part of the persisted
    /// repository row.
    #[serde(default)]
    pub is_production: bool,
    /// First-observation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last metadata refresh.
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// `owner/name` as displayed by hosting providers.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Size classification derived from `size_bytes`.
    pub fn size_bucket(&self) -> SizeBucket {
        if self.size_bytes < SMALL_REPO_MAX_BYTES {
            SizeBucket::Small
        } else if self.size_bytes < MEDIUM_REPO_MAX_BYTES {
            SizeBucket::Medium
        } else {
            SizeBucket::Large
        }
    }
}

//─────────────────────────────
//  Pull request model
//─────────────────────────────

/// How a file was touched by a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// File introduced by the change.
    Added,
    /// Existing file modified.
    Modified,
    /// File removed; carries no content.
    Deleted,
}

/// One file within a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrFile {
    /// Repository-relative path.
    pub path: String,
    /// Full post-change content; absent for deleted files.
    pub content: Option<String>,
    /// Unified diff hunk, when available.
    pub diff: Option<String>,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Detected language, if known.
    pub language: Option<String>,
}

/// A pull request under review; immutable within one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Provider-assigned PR number.
    pub number: u64,
    /// PR title.
    pub title: String,
    /// PR body/description.
    pub description: String,
    /// Base branch the change merges into.
    pub base_ref: String,
    /// Head branch carrying the change.
    pub target_ref: String,
    /// PR author login.
    pub author: String,
    /// Changed files.
    pub files: Vec<PrFile>,
    /// Commit SHAs included in the change.
    pub commits: Vec<String>,
}

impl PullRequest {
    /// Distinct languages present in the change set, sorted.
    pub fn languages(&self) -> BTreeSet<String> {
        self.files
            .iter()
            .filter_map(|f| f.language.clone())
            .collect()
    }

    /// Files that still exist after the change (deleted files excluded).
    pub fn live_files(&self) -> impl Iterator<Item = &PrFile> {
        self.files
            .iter()
            .filter(|f| f.change_type != ChangeType::Deleted)
    }
}

//─────────────────────────────
//  Analysis context
//─────────────────────────────

/// Caller identity attached to every analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    /// Initiating user.
    pub user_id: String,
    /// Owning organisation.
    pub org_id: String,
    /// Granted permission strings.
    pub permissions: Vec<String>,
}

/// The analysis dimension a tool is asked to cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    /// Vulnerability and secret scanning.
    Security,
    /// General code quality review.
    CodeQuality,
    /// Structural and architectural review.
    Architecture,
    /// Performance characteristics.
    Performance,
    /// Third-party dependency review.
    Dependency,
    /// Documentation coverage and accuracy.
    Documentation,
}

impl AgentRole {
    /// Canonical kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Security => "security",
            AgentRole::CodeQuality => "code-quality",
            AgentRole::Architecture => "architecture",
            AgentRole::Performance => "performance",
            AgentRole::Dependency => "dependency",
            AgentRole::Documentation => "documentation",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request tool selection override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOverrides {
    /// Tool to use as primary instead of the configured one.
    pub primary: Option<String>,
    /// Ordered fallback list replacing the configured one when non-empty.
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

/// The input handed to every analyzer tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    /// Role the invoked tool is filling.
    pub agent_role: AgentRole,
    /// Pull request under review; absent for whole-repository scans.
    pub pr: Option<PullRequest>,
    /// Repository metadata.
    pub repository: Repository,
    /// Initiating caller.
    pub user: UserContext,
    /// Optional per-request tool selection override.
    pub tool_overrides: Option<ToolOverrides>,
}

impl AnalysisContext {
    /// Check the structural invariants of the context.
    ///
    /// Deleted files must not carry content, and every file language must
    /// appear in the repository language map.
    pub fn validate(&self) -> Result<(), ModelError> {
        if let Some(pr) = &self.pr {
            for file in &pr.files {
                if file.change_type == ChangeType::Deleted && file.content.is_some() {
                    return Err(ModelError::DeletedFileWithContent {
                        path: file.path.clone(),
                    });
                }
                if let Some(lang) = &file.language {
                    if !self.repository.languages.contains_key(lang) {
                        return Err(ModelError::InconsistentLanguages {
                            language: lang.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of live (non-deleted) files in scope.
    pub fn live_file_count(&self) -> usize {
        self.pr.as_ref().map_or(0, |pr| pr.live_files().count())
    }
}

//─────────────────────────────
//  Tool descriptors
//─────────────────────────────

/// Where a tool's implementation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolKind {
    /// Linked into this process.
    InProcess,
    /// A long-running external server the process talks to.
    HostedServer,
}

/// Lifecycle expected of a tool's backing process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    /// Stays resident between invocations.
    Persistent,
    /// Started per invocation.
    OnDemand,
}

/// Authentication a tool requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthKind {
    /// No credentials.
    None,
    /// Static API key.
    ApiKey,
    /// Provider service account.
    ServiceAccount,
}

/// Input constraints a tool places on the contexts it will accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequirements {
    /// Minimum number of live files; contexts below are incompatible.
    pub min_files: usize,
    /// Maximum number of live files; `None` means unbounded.
    pub max_files: Option<usize>,
    /// Accepted file extensions; empty means all.
    pub allowed_file_types: Vec<String>,
    /// Backing-process lifecycle.
    pub mode: ExecutionMode,
    /// Per-invocation deadline.
    pub timeout: Duration,
    /// Required authentication.
    pub auth: AuthKind,
}

impl Default for ToolRequirements {
    fn default() -> Self {
        Self {
            min_files: 0,
            max_files: None,
            allowed_file_types: Vec::new(),
            mode: ExecutionMode::OnDemand,
            timeout: Duration::from_secs(30),
            auth: AuthKind::None,
        }
    }
}

/// Static description of a registered analyzer tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Stable registry identifier.
    pub id: String,
    /// Implementation variant.
    pub kind: ToolKind,
    /// Semantic version string.
    pub version: String,
    /// Free-form capability tags.
    pub capabilities: Vec<String>,
    /// Input constraints.
    pub requirements: ToolRequirements,
    /// Roles the tool can fill.
    pub supported_roles: Vec<AgentRole>,
    /// Languages the tool understands; empty means universal.
    pub supported_languages: Vec<String>,
}

impl ToolSpec {
    /// Whether the tool can fill `role`.
    pub fn supports_role(&self, role: AgentRole) -> bool {
        self.supported_roles.contains(&role)
    }

    /// Whether the tool understands `language` (empty list = universal).
    pub fn supports_language(&self, language: &str) -> bool {
        self.supported_languages.is_empty()
            || self.supported_languages.iter().any(|l| l == language)
    }

    /// Whether a context with `n` live files satisfies the file-count bounds.
    pub fn accepts_file_count(&self, n: usize) -> bool {
        n >= self.requirements.min_files
            && self.requirements.max_files.map_or(true, |max| n <= max)
    }
}

//─────────────────────────────
//  Findings
//─────────────────────────────

/// Severity of a finding. Declared in ascending order so the derived
/// `Ord` gives `critical > high > medium > low > info`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Minor issue.
    Low,
    /// Worth fixing.
    Medium,
    /// Should block merge.
    High,
    /// Must block merge.
    Critical,
}

impl Severity {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What sort of observation a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    /// A defect.
    Issue,
    /// A recommended improvement.
    Suggestion,
    /// Neutral information.
    Info,
    /// A measured value.
    Metric,
}

/// Identity under which findings are deduplicated across tools.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    /// Finding kind.
    pub kind: FindingKind,
    /// Finding category.
    pub category: String,
    /// File path, or `<global>` for repository-wide findings.
    pub file: String,
    /// Line number, or 0 when absent.
    pub line: u32,
    /// Finding message.
    pub message: String,
}

/// File placeholder used in [`DedupKey`] for findings without a location.
pub const GLOBAL_FILE: &str = "<global>";

/// A single observation produced by an analyzer tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Observation kind.
    pub kind: FindingKind,
    /// Severity.
    pub severity: Severity,
    /// Category tag, e.g. `security` or `style`.
    pub category: String,
    /// Human-readable message.
    pub message: String,
    /// File the finding points at, if any.
    pub file: Option<String>,
    /// Line within the file.
    pub line: Option<u32>,
    /// Column within the line.
    pub column: Option<u32>,
    /// Originating rule identifier.
    pub rule_id: Option<String>,
    /// Whether an automatic fix is available.
    #[serde(default)]
    pub auto_fixable: bool,
    /// Suggested fix, when present.
    pub fix: Option<String>,
}

impl Finding {
    /// Construct a finding with no location information.
    pub fn new(
        kind: FindingKind,
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            category: category.into(),
            message: message.into(),
            file: None,
            line: None,
            column: None,
            rule_id: None,
            auto_fixable: false,
            fix: None,
        }
    }

    /// Attach a file/line location.
    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    /// Identity used for cross-tool deduplication.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            kind: self.kind,
            category: self.category.clone(),
            file: self.file.clone().unwrap_or_else(|| GLOBAL_FILE.to_string()),
            line: self.line.unwrap_or(0),
            message: self.message.clone(),
        }
    }
}

//─────────────────────────────
//  Tool results
//─────────────────────────────

/// Machine-readable failure classification carried by failed tool results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// Per-tool deadline exceeded.
    Timeout,
    /// Tool returned data not conforming to the result contract.
    MalformedOutput,
    /// Health check or spawn failed.
    Unavailable,
    /// Execution stopped by external cancellation.
    Cancelled,
    /// The tool itself reported failure.
    ExecutionFailed,
}

impl FailureCode {
    /// Canonical SCREAMING_SNAKE_CASE name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::Timeout => "TIMEOUT",
            FailureCode::MalformedOutput => "MALFORMED_OUTPUT",
            FailureCode::Unavailable => "UNAVAILABLE",
            FailureCode::Cancelled => "CANCELLED",
            FailureCode::ExecutionFailed => "EXECUTION_FAILED",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail attached to a failed [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    /// Failure classification.
    pub code: FailureCode,
    /// Human-readable detail.
    pub message: String,
    /// Whether retrying could succeed.
    pub recoverable: bool,
}

impl ToolFailure {
    /// Deadline-exceeded failure; always recoverable.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            code: FailureCode::Timeout,
            message: format!("execution exceeded {}ms deadline", timeout.as_millis()),
            recoverable: true,
        }
    }

    /// Non-conforming output wrapped per the tool invocation contract.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            code: FailureCode::MalformedOutput,
            message: detail.into(),
            recoverable: false,
        }
    }

    /// Tool could not be reached or spawned.
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            code: FailureCode::Unavailable,
            message: detail.into(),
            recoverable: true,
        }
    }

    /// Execution stopped by external cancellation; recoverable.
    pub fn cancelled() -> Self {
        Self {
            code: FailureCode::Cancelled,
            message: "run cancelled before the tool completed".to_string(),
            recoverable: true,
        }
    }

    /// The tool reported its own failure.
    pub fn execution(detail: impl Into<String>) -> Self {
        Self {
            code: FailureCode::ExecutionFailed,
            message: detail.into(),
            recoverable: false,
        }
    }
}

/// Outcome of one tool invocation. Every attempt yields exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Invoked tool.
    pub tool_id: String,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Invocation start time.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Findings produced; empty on failure.
    pub findings: Vec<Finding>,
    /// Tool-reported metrics, un-namespaced.
    pub metrics: HashMap<String, f64>,
    /// Failure detail when `success` is false.
    pub error: Option<ToolFailure>,
}

impl ToolResult {
    /// Successful invocation.
    pub fn ok(
        tool_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
        findings: Vec<Finding>,
        metrics: HashMap<String, f64>,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            success: true,
            started_at,
            duration_ms: duration.as_millis() as u64,
            findings,
            metrics,
            error: None,
        }
    }

    /// Failed invocation.
    pub fn failed(
        tool_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
        failure: ToolFailure,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            success: false,
            started_at,
            duration_ms: duration.as_millis() as u64,
            findings: Vec::new(),
            metrics: HashMap::new(),
            error: Some(failure),
        }
    }
}

/// A tool attempt that failed, as listed on a consolidated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTool {
    /// Tool that failed.
    pub tool_id: String,
    /// Failure detail.
    pub error: ToolFailure,
}

/// Fused outcome of a batch of tool invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedResult {
    /// Deduplicated findings across all tools.
    pub findings: Vec<Finding>,
    /// Namespaced per-tool metrics plus the `tools.*` summary metrics.
    pub metrics: HashMap<String, f64>,
    /// Tools that completed successfully.
    pub tools_succeeded: Vec<String>,
    /// Tools that failed, with their errors.
    pub tools_failed: Vec<FailedTool>,
    /// Total wall-clock duration of the batch in milliseconds.
    pub total_duration_ms: u64,
}

impl ConsolidatedResult {
    /// Number of findings at [`Severity::Critical`].
    pub fn critical_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .count()
    }

    /// Severity histogram over the deduplicated findings.
    pub fn issue_distribution(&self) -> HashMap<Severity, usize> {
        let mut dist = HashMap::new();
        for finding in &self.findings {
            *dist.entry(finding.severity).or_insert(0) += 1;
        }
        dist
    }
}

//─────────────────────────────
//  Cached analyses
//─────────────────────────────

/// Default time-to-live for cached repository analyses (24h).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// One stored repository analysis, keyed by `(repository, analyzer)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    /// Repository the analysis belongs to.
    pub repository_id: RepositoryId,
    /// Analyzer that produced it, e.g. `comprehensive` or `targeted:security`.
    pub analyzer: String,
    /// The analysis payload.
    pub analysis_data: serde_json::Value,
    /// Auxiliary metadata recorded alongside the payload.
    pub metadata: serde_json::Value,
    /// Expiry instant; the record is valid while `now < cached_until`.
    pub cached_until: DateTime<Utc>,
    /// Production instant; always strictly before `cached_until`.
    pub produced_at: DateTime<Utc>,
}

impl CachedAnalysis {
    /// Whether the record is still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.cached_until
    }

    /// Check the `cached_until > produced_at` invariant.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.cached_until <= self.produced_at {
            return Err(ModelError::CacheWindowInverted {
                analyzer: self.analyzer.clone(),
            });
        }
        Ok(())
    }
}

//─────────────────────────────
//  Schedules
//─────────────────────────────

/// Recurrence frequency assigned to a repository's automated analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Cadence {
    /// Every six hours.
    Every6h,
    /// Once a day.
    Daily,
    /// Once a week.
    Weekly,
    /// Once a month.
    Monthly,
    /// Only when explicitly requested; never fired by the dispatcher.
    OnDemand,
}

impl Cadence {
    /// Canonical camelCase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Every6h => "every6h",
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
            Cadence::OnDemand => "onDemand",
        }
    }

    /// Relative ordering from most frequent (0) to never (4).
    ///
    /// Used to enforce that escalation only moves toward more frequent
    /// cadences.
    pub fn frequency_rank(&self) -> u8 {
        match self {
            Cadence::Every6h => 0,
            Cadence::Daily => 1,
            Cadence::Weekly => 2,
            Cadence::Monthly => 3,
            Cadence::OnDemand => 4,
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-facing priority of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePriority {
    /// Critical findings outstanding; schedule may not be disabled.
    Critical,
    /// Production or highly active repository.
    High,
    /// Moderately active repository.
    Medium,
    /// Low-activity repository.
    Low,
    /// Dormant repository.
    Minimal,
}

impl SchedulePriority {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulePriority::Critical => "critical",
            SchedulePriority::High => "high",
            SchedulePriority::Medium => "medium",
            SchedulePriority::Low => "low",
            SchedulePriority::Minimal => "minimal",
        }
    }

    /// One level more urgent, saturating at `Critical`.
    pub fn raised(&self) -> Self {
        match self {
            SchedulePriority::Minimal => SchedulePriority::Low,
            SchedulePriority::Low => SchedulePriority::Medium,
            SchedulePriority::Medium => SchedulePriority::High,
            SchedulePriority::High | SchedulePriority::Critical => SchedulePriority::Critical,
        }
    }
}

impl fmt::Display for SchedulePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Automated-analysis schedule owned by a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Row identifier.
    pub id: ScheduleId,
    /// Owning repository.
    pub repository_id: RepositoryId,
    /// Repository URL; schedules are unique per URL.
    pub repository_url: String,
    /// Assigned recurrence.
    pub cadence: Cadence,
    /// Canonical 5-field cron expression (UTC); empty for on-demand.
    pub cron_expr: String,
    /// Operator-facing priority.
    pub priority: SchedulePriority,
    /// Why the current cadence was assigned.
    pub reason: String,
    /// Whether operators may disable the schedule.
    pub may_be_disabled: bool,
    /// Whether the dispatcher fires this schedule.
    pub is_active: bool,
    /// Tools enabled for scheduled runs; empty means the configured default.
    pub enabled_tools: Vec<String>,
    /// Channels notified on completion.
    pub notification_channels: Vec<String>,
    /// Failed runs since the last successful one; drives the
    /// priority-raise policy and resets to zero on success.
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Last dispatch, if any.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next planned dispatch; `None` for inactive schedules.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Check the schedule invariants.
    ///
    /// On-demand schedules must be inactive with an empty cron expression;
    /// critical-priority schedules may never be disableable.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.cadence == Cadence::OnDemand && (self.is_active || !self.cron_expr.is_empty()) {
            return Err(ModelError::OnDemandScheduleActive {
                repository_url: self.repository_url.clone(),
            });
        }
        if self.priority == SchedulePriority::Critical && self.may_be_disabled {
            return Err(ModelError::CriticalScheduleDisableable {
                repository_url: self.repository_url.clone(),
            });
        }
        Ok(())
    }
}

/// Terminal status of one schedule run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Analysis completed and produced a result.
    Success,
    /// Analysis completed but reported failure.
    Failed,
    /// Dispatch or analysis errored before completion.
    Error,
}

impl RunStatus {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
        }
    }
}

/// Record of a single fired schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRun {
    /// Row identifier.
    pub id: RunId,
    /// Owning schedule.
    pub schedule_id: ScheduleId,
    /// Dispatch time.
    pub started_at: DateTime<Utc>,
    /// Completion time; absent while in flight.
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal status.
    pub status: RunStatus,
    /// Findings produced by the run.
    pub findings_count: usize,
    /// Critical findings produced by the run.
    pub critical_count: usize,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Error detail for failed/errored runs.
    pub error: Option<String>,
}

//─────────────────────────────
//  Repository activity
//─────────────────────────────

/// Recent development activity used for cadence assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryActivity {
    /// Commits in the trailing week.
    pub commits_last_week: u32,
    /// Commits in the trailing month.
    pub commits_last_month: u32,
    /// Distinct authors in the trailing month.
    pub active_devs: u32,
    /// Currently open pull requests.
    pub open_prs: u32,
    /// Merges per week, rounded.
    pub merge_frequency: u32,
}

impl RepositoryActivity {
    /// Weighted activity score:
    /// `4·commitsLastWeek + commitsLastMonth + 10·activeDevs + 5·openPRs + 3·mergeFrequency`.
    pub fn score(&self) -> u32 {
        4 * self.commits_last_week
            + self.commits_last_month
            + 10 * self.active_devs
            + 5 * self.open_prs
            + 3 * self.merge_frequency
    }
}

//─────────────────────────────
//  Model errors
//─────────────────────────────

/// Structural invariant violations in the data model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A deleted file carried content.
    #[error("deleted file '{path}' must not carry content")]
    DeletedFileWithContent {
        /// Offending file path.
        path: String,
    },

    /// A file language is missing from the repository language map.
    #[error("file language '{language}' missing from repository language map")]
    InconsistentLanguages {
        /// The unmapped language.
        language: String,
    },

    /// An on-demand schedule was active or carried a cron expression.
    #[error("on-demand schedule for '{repository_url}' must be inactive with an empty cron expression")]
    OnDemandScheduleActive {
        /// Offending schedule's repository URL.
        repository_url: String,
    },

    /// A critical-priority schedule was marked disableable.
    #[error("critical-priority schedule for '{repository_url}' may not be disableable")]
    CriticalScheduleDisableable {
        /// Offending schedule's repository URL.
        repository_url: String,
    },

    /// A cached analysis expired before it was produced.
    #[error("cached analysis for '{analyzer}' has cachedUntil <= producedAt")]
    CacheWindowInverted {
        /// Offending analyzer key.
        analyzer: String,
    },
}
