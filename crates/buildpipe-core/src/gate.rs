//! Autodeploy gate: whether deploy stairs may run right now.
//!
//! Patterns are matched at the start of the value only, without anchoring the
//! end: an hour pattern `1` admits hours `1` and `10`..`19`. Existing
//! configurations rely on that.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{BlacklistDates, DeployPolicy};
use crate::error::{BuildpipeError, Result};

/// Hours admitted when the policy has no `allowed_hours_regex`.
pub const DEFAULT_ALLOWED_HOURS: &str = r"\d|1\d|2[0-3]";

/// Weekdays admitted when the policy has no `allowed_weekdays_regex`.
pub const DEFAULT_ALLOWED_WEEKDAYS: &str = "[1-7]";

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutodeployVerdict {
    /// Whether deploy stairs may run.
    pub allowed: bool,

    /// Checks that closed the gate (empty if allowed).
    pub violations: Vec<String>,
}

#[derive(Debug, Clone)]
enum Blacklist {
    Dates(BTreeSet<String>),
    Pattern(Regex),
}

/// A deploy policy with its patterns compiled.
#[derive(Debug, Clone)]
pub struct DeployWindow {
    timezone: Tz,
    hours: Regex,
    weekdays: Regex,
    blacklist: Option<Blacklist>,
}

impl DeployWindow {
    /// Compile a policy. Bad regexes and unknown timezones are config errors.
    pub fn from_policy(policy: &DeployPolicy) -> Result<Self> {
        let timezone = match policy.timezone.as_deref() {
            None | Some("") => Tz::UTC,
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| BuildpipeError::InvalidTimezone(name.to_string()))?,
        };
        let hours = prefix_regex(
            policy
                .allowed_hours_regex
                .as_deref()
                .unwrap_or(DEFAULT_ALLOWED_HOURS),
        )?;
        let weekdays = prefix_regex(
            policy
                .allowed_weekdays_regex
                .as_deref()
                .unwrap_or(DEFAULT_ALLOWED_WEEKDAYS),
        )?;
        let blacklist = match &policy.blacklist_dates {
            None => None,
            Some(BlacklistDates::Dates(dates)) => {
                Some(Blacklist::Dates(dates.iter().cloned().collect()))
            }
            Some(BlacklistDates::Pattern(pattern)) => {
                Some(Blacklist::Pattern(prefix_regex(pattern)?))
            }
        };

        Ok(Self {
            timezone,
            hours,
            weekdays,
            blacklist,
        })
    }

    /// Evaluate the window at `now`, in the policy's timezone.
    pub fn evaluate(&self, now: DateTime<Utc>) -> AutodeployVerdict {
        let local = now.with_timezone(&self.timezone);
        let hour = local.hour().to_string();
        let weekday = local.weekday().number_from_monday().to_string();
        let date = local.format("%m-%d").to_string();

        let mut violations = Vec::new();
        if !self.hours.is_match(&hour) {
            violations.push(format!("hour {hour} is outside the allowed hours"));
        }
        if !self.weekdays.is_match(&weekday) {
            violations.push(format!("weekday {weekday} is not an allowed weekday"));
        }
        let blacklisted = match &self.blacklist {
            None => false,
            Some(Blacklist::Dates(dates)) => dates.contains(&date),
            Some(Blacklist::Pattern(pattern)) => pattern.is_match(&date),
        };
        if blacklisted {
            violations.push(format!("date {date} is blacklisted"));
        }

        AutodeployVerdict {
            allowed: violations.is_empty(),
            violations,
        }
    }
}

/// Autodeploy gate evaluation.
pub struct AutodeployGate;

impl AutodeployGate {
    /// Whether deploy stairs may run at `now` under `policy`.
    ///
    /// All three checks (hour, weekday, blacklist) must pass.
    pub fn can_autodeploy(policy: &DeployPolicy, now: DateTime<Utc>) -> Result<bool> {
        let verdict = DeployWindow::from_policy(policy)?.evaluate(now);
        if !verdict.allowed {
            debug!(violations = ?verdict.violations, "autodeploy gate closed");
        }
        Ok(verdict.allowed)
    }
}

/// Compile `pattern` so that it only matches at the start of the input.
fn prefix_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})")).map_err(|e| BuildpipeError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}
