//! Screening policy: timeliness and due dates for infant HIV screenings.
//!
//! Every dated business rule the engine applies lives in this module as a named constant
//! or as a row of [`CATEGORY_POLICIES`], so the rules can be audited and tested without
//! touching the join logic. The thresholds follow ministry screening-window guidance and
//! gate compliance reporting; they are not configurable.

use chrono::{Days, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lab tests are searched from the LMP up to 52 weeks later, which also captures tests
/// drawn around labour.
pub const PREGNANCY_LAB_WINDOW_WEEKS: u64 = 52;

/// Infant screening tests are searched up to two years after birth (exclusive).
pub const INFANT_SCREENING_WINDOW_MONTHS: u32 = 24;

/// ELISA is timely up to 18 months after birth, counted as 18 four-week months.
pub const ELISA_TIMELY_MAX_DAYS: i64 = 18 * 7 * 4;

/// Default due date offset for ELISA and any unrecognised category.
pub const DEFAULT_DUE_MONTHS: u32 = 18;

/// Anchor test category of an HIV screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestCategory {
    Pcr1,
    Pcr2,
    Pcr3,
    Elisa,
    Unknown,
}

impl TestCategory {
    /// Parses a clinician-entered test name. Spacing and case are ignored, so `"PCR 1"`,
    /// `"pcr1"` and `" Pcr  1 "` all map to [`TestCategory::Pcr1`]. Anything unrecognised
    /// maps to [`TestCategory::Unknown`].
    pub fn parse(label: &str) -> Self {
        let compact: String = label
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        match compact.as_str() {
            "PCR1" => TestCategory::Pcr1,
            "PCR2" => TestCategory::Pcr2,
            "PCR3" => TestCategory::Pcr3,
            "ELISA" => TestCategory::Elisa,
            _ => TestCategory::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestCategory::Pcr1 => "PCR 1",
            TestCategory::Pcr2 => "PCR 2",
            TestCategory::Pcr3 => "PCR 3",
            TestCategory::Elisa => "ELISA",
            TestCategory::Unknown => "unknown",
        }
    }
}

impl Serialize for TestCategory {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for TestCategory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let label = String::deserialize(deserializer)?;
        Ok(TestCategory::parse(&label))
    }
}

impl fmt::Display for TestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How many days after the anchor a sample may be taken and still count as timely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelyRule {
    /// Timely iff `days < n`.
    Before(i64),
    /// Timely iff `days <= n`.
    AtMost(i64),
    Never,
}

impl TimelyRule {
    fn admits(self, days: i64) -> bool {
        match self {
            TimelyRule::Before(limit) => days < limit,
            TimelyRule::AtMost(limit) => days <= limit,
            TimelyRule::Never => false,
        }
    }
}

/// Offset from the anchor date to the screening due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueOffset {
    Days(u64),
    CalendarMonths(u32),
}

impl DueOffset {
    fn apply(self, anchor: NaiveDate) -> NaiveDate {
        let due = match self {
            DueOffset::Days(days) => anchor.checked_add_days(Days::new(days)),
            DueOffset::CalendarMonths(months) => anchor.checked_add_months(Months::new(months)),
        };
        due.unwrap_or(NaiveDate::MAX)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CategoryPolicy {
    pub category: TestCategory,
    pub timely: TimelyRule,
    pub due: DueOffset,
}

pub const CATEGORY_POLICIES: [CategoryPolicy; 5] = [
    CategoryPolicy {
        category: TestCategory::Pcr1,
        timely: TimelyRule::Before(4),
        due: DueOffset::Days(3),
    },
    CategoryPolicy {
        category: TestCategory::Pcr2,
        timely: TimelyRule::Before(42),
        due: DueOffset::Days(42),
    },
    CategoryPolicy {
        category: TestCategory::Pcr3,
        timely: TimelyRule::Before(91),
        due: DueOffset::Days(90),
    },
    CategoryPolicy {
        category: TestCategory::Elisa,
        timely: TimelyRule::AtMost(ELISA_TIMELY_MAX_DAYS),
        due: DueOffset::CalendarMonths(DEFAULT_DUE_MONTHS),
    },
    CategoryPolicy {
        category: TestCategory::Unknown,
        timely: TimelyRule::Never,
        due: DueOffset::CalendarMonths(DEFAULT_DUE_MONTHS),
    },
];

pub fn policy_for(category: TestCategory) -> &'static CategoryPolicy {
    CATEGORY_POLICIES
        .iter()
        .find(|p| p.category == category)
        .unwrap_or(&CATEGORY_POLICIES[CATEGORY_POLICIES.len() - 1])
}

/// Whether a sample taken on `sample_date` is within the window for `category`, counting
/// whole days from `anchor_date` (the infant's birth date).
pub fn is_timely(anchor_date: NaiveDate, category: TestCategory, sample_date: NaiveDate) -> bool {
    let days = sample_date.signed_duration_since(anchor_date).num_days();
    policy_for(category).timely.admits(days)
}

/// The date by which the sample for `category` should be taken.
pub fn due_date(category: TestCategory, anchor_date: NaiveDate) -> NaiveDate {
    policy_for(category).due.apply(anchor_date)
}

/// A span of order-received times used to scope a lab query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWindow {
    /// `start <= t <= end`
    Between {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    /// `t < end`
    Before { end: NaiveDateTime },
}

impl DateWindow {
    /// `[lmp, lmp + 52 weeks]`, both ends at midnight.
    pub fn pregnancy(lmp: NaiveDate) -> Self {
        let start = lmp.and_time(NaiveTime::MIN);
        let end = lmp
            .checked_add_days(Days::new(PREGNANCY_LAB_WINDOW_WEEKS * 7))
            .unwrap_or(NaiveDate::MAX)
            .and_time(NaiveTime::MIN);
        DateWindow::Between { start, end }
    }

    /// Everything received before `birth_date + 2 years`.
    pub fn infant_screening(birth_date: NaiveDate) -> Self {
        let end = birth_date
            .checked_add_months(Months::new(INFANT_SCREENING_WINDOW_MONTHS))
            .unwrap_or(NaiveDate::MAX)
            .and_time(NaiveTime::MIN);
        DateWindow::Before { end }
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        match *self {
            DateWindow::Between { start, end } => start <= t && t <= end,
            DateWindow::Before { end } => t < end,
        }
    }
}
