//! Fusion of per-tool results into one consolidated result.
//!
//! Findings are deduplicated by `(kind, category, file, line, message)`; on
//! collision the higher severity survives, ties going to the earlier
//! arrival. Tool metrics are namespaced by tool id, and four summary
//! metrics describe the batch as a whole.

use std::collections::HashMap;
use std::time::Duration;

use prism_types::{
    ConsolidatedResult, DedupKey, FailedTool, Finding, ToolFailure, ToolResult,
};

/// Fuse a batch of tool results.
///
/// A consolidated result is produced even when every tool failed: findings
/// are then empty and `tools_failed` lists every attempt.
pub fn consolidate(results: &[ToolResult], total_duration: Duration) -> ConsolidatedResult {
    let mut findings: Vec<Finding> = Vec::new();
    let mut index: HashMap<DedupKey, usize> = HashMap::new();
    let mut metrics: HashMap<String, f64> = HashMap::new();
    let mut tools_succeeded = Vec::new();
    let mut tools_failed = Vec::new();

    for result in results {
        for (name, value) in &result.metrics {
            metrics.insert(format!("{}.{}", result.tool_id, name), *value);
        }

        if result.success {
            tools_succeeded.push(result.tool_id.clone());
        } else {
            tools_failed.push(FailedTool {
                tool_id: result.tool_id.clone(),
                error: result
                    .error
                    .clone()
                    .unwrap_or_else(|| ToolFailure::execution("tool reported failure")),
            });
        }

        for finding in &result.findings {
            let key = finding.dedup_key();
            match index.get(&key) {
                // Ties break to the earlier arrival, so only a strictly
                // higher severity replaces the survivor (in place, keeping
                // first-arrival ordering).
                Some(&at) => {
                    if finding.severity > findings[at].severity {
                        findings[at] = finding.clone();
                    }
                }
                None => {
                    index.insert(key, findings.len());
                    findings.push(finding.clone());
                }
            }
        }
    }

    let total = results.len();
    let succeeded = tools_succeeded.len();
    metrics.insert("tools.total".to_string(), total as f64);
    metrics.insert("tools.succeeded".to_string(), succeeded as f64);
    metrics.insert("tools.failed".to_string(), tools_failed.len() as f64);
    metrics.insert(
        "tools.successRate".to_string(),
        if total > 0 {
            succeeded as f64 / total as f64
        } else {
            0.0
        },
    );

    ConsolidatedResult {
        findings,
        metrics,
        tools_succeeded,
        tools_failed,
        total_duration_ms: total_duration.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use prism_types::{FindingKind, Severity};
    use std::collections::HashMap as StdHashMap;

    fn result_with(tool: &str, findings: Vec<Finding>) -> ToolResult {
        ToolResult::ok(
            tool,
            Utc::now(),
            Duration::from_millis(5),
            findings,
            StdHashMap::new(),
        )
    }

    fn unused_var(severity: Severity) -> Finding {
        Finding::new(FindingKind::Issue, severity, "style", "unused var").at("x.ts", 10)
    }

    #[test]
    fn higher_severity_survives_dedup() {
        let a = result_with("tool-a", vec![unused_var(Severity::Low)]);
        let b = result_with("tool-b", vec![unused_var(Severity::Medium)]);

        let merged = consolidate(&[a, b], Duration::from_millis(10));
        assert_eq!(merged.findings.len(), 1);
        assert_eq!(merged.findings[0].severity, Severity::Medium);
    }

    #[test]
    fn equal_severity_keeps_earlier_arrival() {
        let mut early = unused_var(Severity::Medium);
        early.rule_id = Some("early".to_string());
        let mut late = unused_var(Severity::Medium);
        late.rule_id = Some("late".to_string());

        let merged = consolidate(
            &[
                result_with("tool-a", vec![early]),
                result_with("tool-b", vec![late]),
            ],
            Duration::from_millis(10),
        );
        assert_eq!(merged.findings.len(), 1);
        assert_eq!(merged.findings[0].rule_id.as_deref(), Some("early"));
    }

    #[test]
    fn consolidation_is_idempotent() {
        let results = vec![
            result_with("tool-a", vec![unused_var(Severity::Low)]),
            result_with("tool-b", vec![unused_var(Severity::High)]),
            result_with(
                "tool-c",
                vec![Finding::new(
                    FindingKind::Suggestion,
                    Severity::Info,
                    "docs",
                    "add example",
                )],
            ),
        ];

        let once = consolidate(&results, Duration::from_millis(10));
        let again = consolidate(
            &[ToolResult::ok(
                "merged",
                Utc::now(),
                Duration::from_millis(10),
                once.findings.clone(),
                StdHashMap::new(),
            )],
            Duration::from_millis(10),
        );
        assert_eq!(once.findings, again.findings);
    }

    #[test]
    fn metrics_are_namespaced_with_summaries() {
        let mut with_metrics = result_with("tool-a", vec![]);
        with_metrics.metrics.insert("loc".to_string(), 120.0);

        let failed = ToolResult::failed(
            "tool-b",
            Utc::now(),
            Duration::from_millis(2),
            ToolFailure::timeout(Duration::from_secs(30)),
        );

        let merged = consolidate(&[with_metrics, failed], Duration::from_millis(10));
        assert_eq!(merged.metrics.get("tool-a.loc"), Some(&120.0));
        assert_eq!(merged.metrics.get("tools.total"), Some(&2.0));
        assert_eq!(merged.metrics.get("tools.succeeded"), Some(&1.0));
        assert_eq!(merged.metrics.get("tools.failed"), Some(&1.0));
        assert_eq!(merged.metrics.get("tools.successRate"), Some(&0.5));
        assert_eq!(merged.tools_failed.len(), 1);
        assert_eq!(merged.tools_failed[0].tool_id, "tool-b");
    }

    #[test]
    fn all_failures_still_produce_a_result() {
        let failed = ToolResult::failed(
            "tool-a",
            Utc::now(),
            Duration::from_millis(2),
            ToolFailure::unavailable("spawn failed"),
        );
        let merged = consolidate(&[failed], Duration::from_millis(5));
        assert!(merged.findings.is_empty());
        assert_eq!(merged.tools_failed.len(), 1);
        assert_eq!(merged.metrics.get("tools.successRate"), Some(&0.0));
    }
}
