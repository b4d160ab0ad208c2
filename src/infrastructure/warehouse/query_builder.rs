//! Aggregation query construction for the analytical warehouse.
//!
//! One statement per period type, grouping by (query, asin[, year,
//! month|quarter]) with summed funnel counts, null-safe rate calculations,
//! share calculations, and impression dispersion stats. Identical inputs
//! always produce textually identical SQL so the builder is testable
//! without a live warehouse.

use crate::domain::{PeriodType, SyncWindow};

use super::asin_filter::AsinFilterStrategy;

#[derive(Debug, Clone)]
pub struct AggregationQueryBuilder {
    source_table: String,
}

impl AggregationQueryBuilder {
    pub fn new(source_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
        }
    }

    /// The full aggregation statement for one sync window.
    pub fn build(
        &self,
        period_type: PeriodType,
        window: &SyncWindow,
        filter: &AsinFilterStrategy,
    ) -> String {
        let period_select = match period_type {
            PeriodType::Weekly => "start_date,\n  end_date",
            PeriodType::Monthly => {
                "EXTRACT(YEAR FROM start_date) AS year,\n  \
                 EXTRACT(MONTH FROM start_date) AS month,\n  \
                 MIN(start_date) AS start_date,\n  \
                 MAX(end_date) AS end_date"
            }
            PeriodType::Quarterly => {
                "EXTRACT(YEAR FROM start_date) AS year,\n  \
                 EXTRACT(QUARTER FROM start_date) AS quarter,\n  \
                 MIN(start_date) AS start_date,\n  \
                 MAX(end_date) AS end_date"
            }
            PeriodType::Yearly => {
                "EXTRACT(YEAR FROM start_date) AS year,\n  \
                 MIN(start_date) AS start_date,\n  \
                 MAX(end_date) AS end_date"
            }
        };
        let group_by = match period_type {
            PeriodType::Weekly => "start_date, end_date, asin, search_query",
            PeriodType::Monthly => "year, month, asin, search_query",
            PeriodType::Quarterly => "year, quarter, asin, search_query",
            PeriodType::Yearly => "year, asin, search_query",
        };
        let order_by = match period_type {
            PeriodType::Weekly => "search_query, asin, start_date",
            _ => "search_query, asin",
        };
        let filter_clause = filter.clause(&self.source_table, window);

        format!(
            "SELECT\n  \
             {period_select},\n  \
             asin,\n  \
             search_query,\n  \
             MAX(search_query_score) AS search_query_score,\n  \
             MAX(search_query_volume) AS search_query_volume,\n  \
             STRUCT(\n    \
             SUM(total_query_impression_count) AS total_count,\n    \
             SUM(asin_impression_count) AS asin_count,\n    \
             SAFE_DIVIDE(SUM(asin_impression_count), SUM(total_query_impression_count)) AS asin_share\n  \
             ) AS impressions,\n  \
             STRUCT(\n    \
             SUM(total_click_count) AS total_count,\n    \
             SAFE_DIVIDE(SUM(total_click_count), SUM(total_query_impression_count)) AS total_rate,\n    \
             SUM(asin_click_count) AS asin_count,\n    \
             SAFE_DIVIDE(SUM(asin_click_count), SUM(total_click_count)) AS asin_share,\n    \
             AVG(total_median_click_price) AS total_median_price,\n    \
             AVG(asin_median_click_price) AS asin_median_price,\n    \
             SUM(total_same_day_shipping_click_count) AS same_day_shipping_count,\n    \
             SUM(total_one_day_shipping_click_count) AS one_day_shipping_count,\n    \
             SUM(total_two_day_shipping_click_count) AS two_day_shipping_count\n  \
             ) AS clicks,\n  \
             STRUCT(\n    \
             SUM(total_cart_add_count) AS total_count,\n    \
             SAFE_DIVIDE(SUM(total_cart_add_count), SUM(total_click_count)) AS total_rate,\n    \
             SUM(asin_cart_add_count) AS asin_count,\n    \
             SAFE_DIVIDE(SUM(asin_cart_add_count), SUM(total_cart_add_count)) AS asin_share,\n    \
             AVG(total_median_cart_add_price) AS total_median_price,\n    \
             AVG(asin_median_cart_add_price) AS asin_median_price,\n    \
             SUM(total_same_day_shipping_cart_add_count) AS same_day_shipping_count,\n    \
             SUM(total_one_day_shipping_cart_add_count) AS one_day_shipping_count,\n    \
             SUM(total_two_day_shipping_cart_add_count) AS two_day_shipping_count\n  \
             ) AS cart_adds,\n  \
             STRUCT(\n    \
             SUM(total_purchase_count) AS total_count,\n    \
             SAFE_DIVIDE(SUM(total_purchase_count), SUM(total_click_count)) AS total_rate,\n    \
             SUM(asin_purchase_count) AS asin_count,\n    \
             SAFE_DIVIDE(SUM(asin_purchase_count), SUM(total_purchase_count)) AS asin_share,\n    \
             AVG(total_median_purchase_price) AS total_median_price,\n    \
             AVG(asin_median_purchase_price) AS asin_median_price,\n    \
             SUM(total_same_day_shipping_purchase_count) AS same_day_shipping_count,\n    \
             SUM(total_one_day_shipping_purchase_count) AS one_day_shipping_count,\n    \
             SUM(total_two_day_shipping_purchase_count) AS two_day_shipping_count\n  \
             ) AS purchases,\n  \
             SAFE_DIVIDE(SUM(total_purchase_count), SUM(total_query_impression_count)) AS purchase_per_impression,\n  \
             STRUCT(\n    \
             MIN(asin_impression_count) AS min_impressions,\n    \
             MAX(asin_impression_count) AS max_impressions,\n    \
             AVG(asin_impression_count) AS avg_impressions,\n    \
             STDDEV(asin_impression_count) AS stddev_impressions\n  \
             ) AS impression_stats,\n  \
             COUNT(DISTINCT start_date) AS active_weeks\n\
             FROM `{table}`\n\
             WHERE start_date >= DATE '{start}' AND end_date <= DATE '{end}'{filter_clause}\n\
             GROUP BY {group_by}\n\
             ORDER BY {order_by}",
            table = self.source_table,
            start = window.start,
            end = window.end,
        )
    }

    /// Probe for the most recent period end available in the source table,
    /// used by the scheduler's new-data check.
    pub fn boundary_probe(&self) -> String {
        format!(
            "SELECT MAX(end_date) AS boundary FROM `{}`",
            self.source_table
        )
    }
}
