//! Cancellation penalty calculator.
//!
//! Pure functions over calendar dates and counters; no clock access and no
//! storage. Callers pass `now` explicitly so the rules stay testable with
//! pinned dates.
//!
//! Two independent mechanisms feed a ban:
//! - the date-based penalty, driven by how close to the service date a
//!   unilateral cancellation lands;
//! - the count-based threshold, driven by how many cancellations the user
//!   has accumulated. The threshold verdict is advisory and additive; it
//!   never shortens a date-based ban.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Cancellations at or past this lifetime count draw a warning.
pub const WARNING_THRESHOLD: u32 = 3;

/// Cancellations at or past this lifetime count draw a temporary ban.
pub const BAN_THRESHOLD: u32 = 5;

/// Ban span applied for a threshold ban, same as a same-day cancellation.
pub const THRESHOLD_BAN_DAYS: u32 = 2;

/// How a booking was cancelled, penalty-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationType {
    /// Both parties agreed; never penalized.
    MutualAgreement,
    /// One party walked away; penalized by proximity to the service date.
    WithoutAgreement,
}

impl fmt::Display for CancellationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationType::MutualAgreement => write!(f, "mutual_agreement"),
            CancellationType::WithoutAgreement => write!(f, "without_agreement"),
        }
    }
}

impl FromStr for CancellationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mutual_agreement" => Ok(CancellationType::MutualAgreement),
            "without_agreement" => Ok(CancellationType::WithoutAgreement),
            _ => Err(format!("Invalid cancellation type: {}", s)),
        }
    }
}

/// Whole calendar days between today and the scheduled service date.
///
/// Both sides are already truncated to midnight by being `NaiveDate`s, so
/// this is an exact day count: 0 means the service is today, negative means
/// the date is already past.
pub fn days_until_service(scheduled: NaiveDate, today: NaiveDate) -> i64 {
    (scheduled - today).num_days()
}

/// Ban length in days for a cancellation at the given distance.
///
/// Mutual agreement is always free. Otherwise: two or more days of notice is
/// free, exactly one day costs one ban day, same-day or later costs two.
pub fn ban_duration(days_until: i64, cancellation_type: CancellationType) -> u32 {
    match cancellation_type {
        CancellationType::MutualAgreement => 0,
        CancellationType::WithoutAgreement => {
            if days_until >= 2 {
                0
            } else if days_until == 1 {
                1
            } else {
                2
            }
        }
    }
}

/// When a ban of `ban_days` starting now would lift.
///
/// The ban runs to the end of the last banned day: `ban_days` days from
/// now's civil date, at 23:59:59.999. Zero days means no ban.
pub fn ban_end_date(ban_days: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if ban_days == 0 {
        return None;
    }
    let last_day = now
        .date_naive()
        .checked_add_days(Days::new(u64::from(ban_days)))?;
    let end = last_day.and_hms_milli_opt(23, 59, 59, 999)?;
    Some(end.and_utc())
}

/// Whether the user is currently banned from creating bookings.
pub fn is_banned(banned_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    banned_until.is_some_and(|until| now < until)
}

/// Verdict of the cancellation-count threshold check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdVerdict {
    pub should_warn: bool,
    pub should_ban: bool,
    /// User-facing warning, present whenever `should_warn` is set.
    pub message: Option<String>,
}

/// Evaluate the threshold against the count a cancellation would bring the
/// user to.
///
/// `current_count` is the user's count before this cancellation; the verdict
/// is on `current_count + 1`. At [`BAN_THRESHOLD`] the user is warned and
/// banned; at [`WARNING_THRESHOLD`] they are warned only.
pub fn cancellation_threshold(current_count: u32) -> ThresholdVerdict {
    let new_count = current_count + 1;
    if new_count >= BAN_THRESHOLD {
        ThresholdVerdict {
            should_warn: true,
            should_ban: true,
            message: Some(
                "You have been temporarily banned due to too many cancellations (5+).".to_string(),
            ),
        }
    } else if new_count >= WARNING_THRESHOLD {
        ThresholdVerdict {
            should_warn: true,
            should_ban: false,
            message: Some(
                "Warning: You have 3+ cancellations. Your reliability badge has been affected."
                    .to_string(),
            ),
        }
    } else {
        ThresholdVerdict {
            should_warn: false,
            should_ban: false,
            message: None,
        }
    }
}

/// Outcome of the date-based penalty rules for one cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyAssessment {
    /// Calendar days of notice the canceller gave.
    pub days_until_service: i64,
    /// Ban length the rules assign for that notice.
    pub ban_days: u32,
    /// When the ban lifts; `None` when no ban applies.
    pub banned_until: Option<DateTime<Utc>>,
}

impl PenaltyAssessment {
    /// Run the date-based rules for a cancellation happening at `now`.
    pub fn assess(
        scheduled: NaiveDate,
        cancellation_type: CancellationType,
        now: DateTime<Utc>,
    ) -> Self {
        let days_until = days_until_service(scheduled, now.date_naive());
        let ban_days = ban_duration(days_until, cancellation_type);
        PenaltyAssessment {
            days_until_service: days_until,
            ban_days,
            banned_until: ban_end_date(ban_days, now),
        }
    }
}
