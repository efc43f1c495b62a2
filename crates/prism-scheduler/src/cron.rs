//! Cron expression canonicalization and next-fire computation.
//!
//! Schedules store canonical 5-field expressions (minute hour dom month dow,
//! all UTC). The `cron` crate wants a seconds field, so evaluation prepends
//! one.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use prism_types::Cadence;

use crate::SchedulerError;

/// Canonical expression for the every-six-hours cadence.
pub const EVERY_6H_EXPR: &str = "0 */6 * * *";

/// Canonical expression for daily scans of production repositories (02:00).
pub const DAILY_PRODUCTION_EXPR: &str = "0 2 * * *";

/// Canonical expression for daily scans of highly active repositories (03:00).
pub const DAILY_ACTIVITY_EXPR: &str = "0 3 * * *";

/// Canonical expression for weekly scans (Monday 03:00). The day is spelled
/// out: numeric day-of-week is ambiguous between cron dialects.
pub const WEEKLY_EXPR: &str = "0 3 * * MON";

/// Canonical expression for monthly scans (1st, 03:00).
pub const MONTHLY_EXPR: &str = "0 3 1 * *";

/// Default expression for a cadence. Daily defaults to the activity slot;
/// the planner picks the production slot explicitly.
pub fn default_expr(cadence: Cadence) -> &'static str {
    match cadence {
        Cadence::Every6h => EVERY_6H_EXPR,
        Cadence::Daily => DAILY_ACTIVITY_EXPR,
        Cadence::Weekly => WEEKLY_EXPR,
        Cadence::Monthly => MONTHLY_EXPR,
        Cadence::OnDemand => "",
    }
}

/// First fire time strictly after `after` for a 5-field expression.
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
    let with_seconds = format!("0 {}", expr.trim());
    let schedule =
        cron::Schedule::from_str(&with_seconds).map_err(|e| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| SchedulerError::InvalidCron {
            expr: expr.to_string(),
            reason: "expression never fires".to_string(),
        })
}
