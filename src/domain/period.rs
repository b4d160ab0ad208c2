//! Period granularities, period keys, and sync-window computation.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregation granularity for summary records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
            PeriodType::Quarterly => "quarterly",
            PeriodType::Yearly => "yearly",
        }
    }

    /// Destination summary table for this granularity.
    pub fn summary_table(&self) -> &'static str {
        match self {
            PeriodType::Weekly => "weekly_summary",
            PeriodType::Monthly => "monthly_summary",
            PeriodType::Quarterly => "quarterly_summary",
            PeriodType::Yearly => "yearly_summary",
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weekly" => Ok(PeriodType::Weekly),
            "monthly" => Ok(PeriodType::Monthly),
            "quarterly" => Ok(PeriodType::Quarterly),
            "yearly" => Ok(PeriodType::Yearly),
            other => Err(format!("unknown period type: {other}")),
        }
    }
}

/// Natural key of one summary period. Weekly periods are keyed by their
/// reporting start date as delivered by the warehouse; coarser periods by
/// calendar components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeriodKey {
    Weekly { start: NaiveDate },
    Monthly { year: i32, month: u32 },
    Quarterly { year: i32, quarter: u32 },
    Yearly { year: i32 },
}

impl PeriodKey {
    /// Period key that contains `date` at the given granularity.
    pub fn for_date(period_type: PeriodType, date: NaiveDate) -> Self {
        match period_type {
            PeriodType::Weekly => PeriodKey::Weekly { start: date },
            PeriodType::Monthly => PeriodKey::Monthly {
                year: date.year(),
                month: date.month(),
            },
            PeriodType::Quarterly => PeriodKey::Quarterly {
                year: date.year(),
                quarter: (date.month() - 1) / 3 + 1,
            },
            PeriodType::Yearly => PeriodKey::Yearly { year: date.year() },
        }
    }

    pub fn period_type(&self) -> PeriodType {
        match self {
            PeriodKey::Weekly { .. } => PeriodType::Weekly,
            PeriodKey::Monthly { .. } => PeriodType::Monthly,
            PeriodKey::Quarterly { .. } => PeriodType::Quarterly,
            PeriodKey::Yearly { .. } => PeriodType::Yearly,
        }
    }
}

/// Closed date window a single sync run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SyncWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if start > end {
            return Err(format!("window start {start} is after end {end}"));
        }
        Ok(Self { start, end })
    }

    /// Window from the day after the last synced boundary up to `today`.
    /// With no prior boundary the window reaches back `initial_lookback_days`.
    pub fn following(
        last_boundary: Option<NaiveDate>,
        today: NaiveDate,
        initial_lookback_days: i64,
    ) -> Self {
        let start = match last_boundary {
            Some(boundary) => boundary + Duration::days(1),
            None => today - Duration::days(initial_lookback_days),
        };
        // A boundary at or past today still yields a valid (empty-ish) window.
        let start = start.min(today);
        Self { start, end: today }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn period_key_for_date_maps_granularities() {
        let date = d("2025-05-14");
        assert_eq!(
            PeriodKey::for_date(PeriodType::Weekly, date),
            PeriodKey::Weekly { start: date }
        );
        assert_eq!(
            PeriodKey::for_date(PeriodType::Monthly, date),
            PeriodKey::Monthly { year: 2025, month: 5 }
        );
        assert_eq!(
            PeriodKey::for_date(PeriodType::Quarterly, date),
            PeriodKey::Quarterly { year: 2025, quarter: 2 }
        );
        assert_eq!(
            PeriodKey::for_date(PeriodType::Yearly, date),
            PeriodKey::Yearly { year: 2025 }
        );
    }

    #[test]
    fn quarter_boundaries() {
        assert_eq!(
            PeriodKey::for_date(PeriodType::Quarterly, d("2025-01-01")),
            PeriodKey::Quarterly { year: 2025, quarter: 1 }
        );
        assert_eq!(
            PeriodKey::for_date(PeriodType::Quarterly, d("2025-12-31")),
            PeriodKey::Quarterly { year: 2025, quarter: 4 }
        );
    }

    #[test]
    fn window_rejects_inverted_range() {
        assert!(SyncWindow::new(d("2025-02-01"), d("2025-01-01")).is_err());
    }

    #[test]
    fn window_following_resumes_after_boundary() {
        let w = SyncWindow::following(Some(d("2025-03-08")), d("2025-03-20"), 28);
        assert_eq!(w.start, d("2025-03-09"));
        assert_eq!(w.end, d("2025-03-20"));
    }

    #[test]
    fn window_following_uses_lookback_without_boundary() {
        let w = SyncWindow::following(None, d("2025-03-20"), 28);
        assert_eq!(w.start, d("2025-02-20"));
        assert_eq!(w.end, d("2025-03-20"));
    }

    #[test]
    fn window_following_clamps_future_boundary() {
        let w = SyncWindow::following(Some(d("2025-03-25")), d("2025-03-20"), 28);
        assert_eq!(w.start, d("2025-03-20"));
        assert_eq!(w.end, d("2025-03-20"));
    }

    #[test]
    fn period_type_parses_case_insensitively() {
        assert_eq!("Monthly".parse::<PeriodType>().unwrap(), PeriodType::Monthly);
        assert!("biweekly".parse::<PeriodType>().is_err());
    }
}
