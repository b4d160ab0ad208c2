//! Post-write data-quality checks.
//!
//! Three checks run after the write phases complete, regardless of batch
//! failures: row-count reconciliation, share-bound validation, and funnel
//! consistency. None of them block or roll back the sync; they produce
//! diagnostic records attached to the run.

use tracing::warn;

use crate::domain::{CheckStatus, CheckType, DataQualityCheck, EntityGroup};

use super::transformer::WriteOutcome;

#[derive(Debug, Default)]
pub struct DataQualityChecker;

impl DataQualityChecker {
    pub fn new() -> Self {
        Self
    }

    pub fn run_checks(
        &self,
        sync_run_id: &str,
        groups: &[EntityGroup],
        outcome: &WriteOutcome,
    ) -> Vec<DataQualityCheck> {
        let mut checks = vec![self.row_count_check(sync_run_id, groups, outcome)];
        checks.extend(self.share_bound_checks(sync_run_id, groups));
        checks.extend(self.funnel_consistency_checks(sync_run_id, groups));

        let failed = checks
            .iter()
            .filter(|c| c.check_status == CheckStatus::Failed)
            .count();
        let warnings = checks
            .iter()
            .filter(|c| c.check_status == CheckStatus::Warning)
            .count();
        if failed > 0 || warnings > 0 {
            warn!(failed, warnings, "data-quality checks found issues");
        }
        checks
    }

    /// Expected query-record count vs. the count the write phases actually
    /// landed. Equal means passed; anything else is a warning.
    fn row_count_check(
        &self,
        sync_run_id: &str,
        groups: &[EntityGroup],
        outcome: &WriteOutcome,
    ) -> DataQualityCheck {
        let expected: i64 = groups.iter().map(|g| g.queries.len() as i64).sum();
        let actual = outcome.queries_written;
        let difference = expected - actual;

        let status = if difference == 0 {
            CheckStatus::Passed
        } else {
            CheckStatus::Warning
        };

        let mut check = DataQualityCheck::new(sync_run_id, CheckType::RowCount, status);
        check.source_value = Some(expected as f64);
        check.target_value = Some(actual as f64);
        check.difference = Some(difference as f64);
        check.difference_pct = if expected != 0 {
            Some(difference as f64 / expected as f64 * 100.0)
        } else {
            None
        };
        check.table_name = Some("query_performance".to_string());
        check.message = Some(format!(
            "expected {expected} query records, wrote {actual}"
        ));
        check
    }

    /// Every share field must lie in [0, 1]. One warning per offending
    /// (asin, query) pair with the offending shares in metadata.
    fn share_bound_checks(
        &self,
        sync_run_id: &str,
        groups: &[EntityGroup],
    ) -> Vec<DataQualityCheck> {
        let mut checks = Vec::new();
        for group in groups {
            for query in &group.queries {
                let [impression_share, click_share, cart_add_share, purchase_share] =
                    query.shares();
                let out_of_bounds = query
                    .shares()
                    .iter()
                    .any(|share| !(0.0..=1.0).contains(share));
                if !out_of_bounds {
                    continue;
                }

                let mut check = DataQualityCheck::new(
                    sync_run_id,
                    CheckType::SumValidation,
                    CheckStatus::Warning,
                );
                check.table_name = Some("query_performance".to_string());
                check.column_name = Some("asin_share".to_string());
                check.message = Some(format!(
                    "share fields out of [0, 1] for asin {} query '{}'",
                    group.entity.asin, query.search_query
                ));
                check.metadata = serde_json::json!({
                    "asin": group.entity.asin,
                    "search_query": query.search_query,
                    "impression_share": impression_share,
                    "click_share": click_share,
                    "cart_add_share": cart_add_share,
                    "purchase_share": purchase_share,
                });
                checks.push(check);
            }
        }
        checks
    }

    /// impressions >= clicks >= cart adds >= purchases per (asin, query).
    /// A violation is a failed check: it indicates a warehouse data
    /// integrity problem, not a tolerable drift.
    fn funnel_consistency_checks(
        &self,
        sync_run_id: &str,
        groups: &[EntityGroup],
    ) -> Vec<DataQualityCheck> {
        let mut checks = Vec::new();
        for group in groups {
            for query in &group.queries {
                if query.funnel_is_monotonic() {
                    continue;
                }

                let mut check = DataQualityCheck::new(
                    sync_run_id,
                    CheckType::SumValidation,
                    CheckStatus::Failed,
                );
                check.table_name = Some("query_performance".to_string());
                check.column_name = Some("funnel_counts".to_string());
                check.message = Some(format!(
                    "funnel counts are not monotonic for asin {} query '{}'",
                    group.entity.asin, query.search_query
                ));
                check.metadata = serde_json::json!({
                    "asin": group.entity.asin,
                    "search_query": query.search_query,
                    "impressions": query.impressions.asin_count,
                    "clicks": query.clicks.asin_count,
                    "cart_adds": query.cart_adds.asin_count,
                    "purchases": query.purchases.asin_count,
                });
                checks.push(check);
            }
        }
        checks
    }
}
