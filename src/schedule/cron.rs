//! Cron expression parsing and next-fire evaluation.
//!
//! Accepts standard 5-field expressions (minute hour day-of-month month
//! day-of-week) and 6-field expressions with a leading seconds field.
//! Anything else is rejected at subscription-creation or -change time —
//! never silently defaulted at schedule time.

use chrono::{DateTime, Utc};
use croner::Cron;
use thiserror::Error;

/// Errors from cron expression validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("cron expression must have 5 or 6 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid cron expression: {0}")]
    Invalid(String),
}

/// A validated 5- or 6-field cron expression.
///
/// Keeps the user's original spelling for display and persistence alongside
/// the compiled schedule. Evaluation is a pure function of the expression
/// and a reference time ([`CronExpr::next_after`]).
#[derive(Clone)]
pub struct CronExpr {
    raw: String,
    compiled: Cron,
}

impl CronExpr {
    /// Validates and compiles an expression.
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if !matches!(fields.len(), 5 | 6) {
            return Err(CronError::FieldCount(fields.len()));
        }

        // Legacy day-of-week spellings: 0-7/1-7 mean every day, 7 means
        // Sunday. Normalized once here so the compiled schedule and the
        // stored expression never disagree.
        let mut normalized = fields.clone();
        let last = normalized.len() - 1;
        normalized[last] = match normalized[last] {
            "0-7" | "1-7" => "*",
            "7" => "0",
            other => other,
        };

        let compiled = Cron::new(&normalized.join(" "))
            .with_seconds_optional()
            .parse()
            .map_err(|e| CronError::Invalid(e.to_string()))?;

        Ok(Self {
            raw: fields.join(" "),
            compiled,
        })
    }

    /// The next fire time strictly after `reference`, if any.
    pub fn next_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.compiled.find_next_occurrence(&reference, false).ok()
    }

    /// The expression as the user wrote it (whitespace collapsed).
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CronExpr").field(&self.raw).finish()
    }
}

impl std::fmt::Display for CronExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

// ============================================================================
// Tests
// ============================================================================
