//! Performance record types: flat warehouse rows and the normalized
//! hierarchy written to the operational store.
//!
//! `SourceRow` mirrors the warehouse wire format, where the four funnel
//! sections can be absent on malformed exports; validation in the
//! transformer promotes rows into the strict `EntityGroup` hierarchy.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::period::PeriodKey;

/// Null-safe ratio; a zero denominator yields 0 instead of an error value.
pub fn safe_ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Impression funnel stage: query-wide total and this ASIN's slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpressionData {
    pub total_count: i64,
    pub asin_count: i64,
    pub asin_share: f64,
}

/// Click funnel stage, with optional price and shipping-speed breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickData {
    pub total_count: i64,
    pub total_rate: f64,
    pub asin_count: i64,
    pub asin_share: f64,
    #[serde(default)]
    pub total_median_price: Option<f64>,
    #[serde(default)]
    pub asin_median_price: Option<f64>,
    #[serde(default)]
    pub same_day_shipping_count: Option<i64>,
    #[serde(default)]
    pub one_day_shipping_count: Option<i64>,
    #[serde(default)]
    pub two_day_shipping_count: Option<i64>,
}

/// Cart-add funnel stage; same shape as clicks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CartAddData {
    pub total_count: i64,
    pub total_rate: f64,
    pub asin_count: i64,
    pub asin_share: f64,
    #[serde(default)]
    pub total_median_price: Option<f64>,
    #[serde(default)]
    pub asin_median_price: Option<f64>,
    #[serde(default)]
    pub same_day_shipping_count: Option<i64>,
    #[serde(default)]
    pub one_day_shipping_count: Option<i64>,
    #[serde(default)]
    pub two_day_shipping_count: Option<i64>,
}

/// Purchase funnel stage; same shape as clicks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PurchaseData {
    pub total_count: i64,
    pub total_rate: f64,
    pub asin_count: i64,
    pub asin_share: f64,
    #[serde(default)]
    pub total_median_price: Option<f64>,
    #[serde(default)]
    pub asin_median_price: Option<f64>,
    #[serde(default)]
    pub same_day_shipping_count: Option<i64>,
    #[serde(default)]
    pub one_day_shipping_count: Option<i64>,
    #[serde(default)]
    pub two_day_shipping_count: Option<i64>,
}

/// Impression dispersion over the aggregated window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispersionStats {
    pub min_impressions: i64,
    pub max_impressions: i64,
    pub avg_impressions: f64,
    pub stddev_impressions: f64,
}

impl DispersionStats {
    /// Degenerate stats for a single observation.
    pub fn single(impressions: i64) -> Self {
        Self {
            min_impressions: impressions,
            max_impressions: impressions,
            avg_impressions: impressions as f64,
            stddev_impressions: 0.0,
        }
    }
}

/// Funnel metrics derived from the ASIN's own counts. All divisions are
/// null-safe: a zero denominator yields 0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub click_through_rate: f64,
    pub conversion_rate: f64,
    pub cart_to_click_rate: f64,
    pub purchase_to_cart_rate: f64,
    pub funnel_completion_rate: f64,
}

impl DerivedMetrics {
    pub fn from_counts(impressions: i64, clicks: i64, cart_adds: i64, purchases: i64) -> Self {
        Self {
            click_through_rate: safe_ratio(clicks, impressions),
            conversion_rate: safe_ratio(purchases, clicks),
            cart_to_click_rate: safe_ratio(cart_adds, clicks),
            purchase_to_cart_rate: safe_ratio(purchases, cart_adds),
            funnel_completion_rate: safe_ratio(purchases, impressions),
        }
    }
}

/// One flat row as returned by the warehouse aggregation query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRow {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub asin: String,
    pub search_query: String,
    #[serde(default)]
    pub search_query_score: Option<i64>,
    #[serde(default)]
    pub search_query_volume: Option<i64>,
    #[serde(default)]
    pub impressions: Option<ImpressionData>,
    #[serde(default)]
    pub clicks: Option<ClickData>,
    #[serde(default)]
    pub cart_adds: Option<CartAddData>,
    #[serde(default)]
    pub purchases: Option<PurchaseData>,
    #[serde(default)]
    pub impression_stats: Option<DispersionStats>,
    #[serde(default)]
    pub active_weeks: Option<i64>,
}

/// Parent record: one tracked ASIN's performance window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPerformanceRecord {
    /// Store-assigned surrogate id, present after Phase A has run.
    pub id: Option<i64>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub asin: String,
}

/// Child record: funnel performance of one search query against the parent
/// ASIN window. Carries the dispersion stats and active-week count from the
/// source row so Phase C can roll summaries up without re-querying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPerformanceRecord {
    pub search_query: String,
    pub search_query_score: Option<i64>,
    pub search_query_volume: Option<i64>,
    pub impressions: ImpressionData,
    pub clicks: ClickData,
    pub cart_adds: CartAddData,
    pub purchases: PurchaseData,
    pub derived: DerivedMetrics,
    pub impression_stats: DispersionStats,
    pub active_weeks: i64,
}

impl QueryPerformanceRecord {
    /// Funnel monotonicity over the ASIN's own counts:
    /// impressions >= clicks >= cart adds >= purchases.
    pub fn funnel_is_monotonic(&self) -> bool {
        self.impressions.asin_count >= self.clicks.asin_count
            && self.clicks.asin_count >= self.cart_adds.asin_count
            && self.cart_adds.asin_count >= self.purchases.asin_count
    }

    /// The four share fields in funnel order.
    pub fn shares(&self) -> [f64; 4] {
        [
            self.impressions.asin_share,
            self.clicks.asin_share,
            self.cart_adds.asin_share,
            self.purchases.asin_share,
        ]
    }
}

/// One ASIN window with all of its query records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityGroup {
    pub entity: EntityPerformanceRecord,
    pub queries: Vec<QueryPerformanceRecord>,
}

/// Aggregated summary row destined for one of the period summary tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummaryRecord {
    pub period: PeriodKey,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub search_query: String,
    pub asin: String,
    pub total_impressions: i64,
    pub asin_impressions: i64,
    pub total_clicks: i64,
    pub asin_clicks: i64,
    pub total_cart_adds: i64,
    pub asin_cart_adds: i64,
    pub total_purchases: i64,
    pub asin_purchases: i64,
    /// Recomputed from summed counts, never averaged across finer records.
    pub avg_ctr: f64,
    pub avg_cvr: f64,
    pub purchase_per_impression: f64,
    pub impression_share: f64,
    pub click_share: f64,
    pub cart_add_share: f64,
    pub purchase_share: f64,
    pub dispersion: DispersionStats,
    pub active_weeks: i64,
    pub sync_run_id: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_ratio_handles_zero_denominator() {
        assert_eq!(safe_ratio(5, 0), 0.0);
        assert_eq!(safe_ratio(0, 0), 0.0);
        assert!((safe_ratio(1, 4) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn derived_metrics_from_counts() {
        let m = DerivedMetrics::from_counts(1000, 100, 40, 20);
        assert!((m.click_through_rate - 0.1).abs() < 1e-12);
        assert!((m.conversion_rate - 0.2).abs() < 1e-12);
        assert!((m.cart_to_click_rate - 0.4).abs() < 1e-12);
        assert!((m.purchase_to_cart_rate - 0.5).abs() < 1e-12);
        assert!((m.funnel_completion_rate - 0.02).abs() < 1e-12);
    }

    #[test]
    fn derived_metrics_zero_funnel_is_all_zero() {
        assert_eq!(DerivedMetrics::from_counts(0, 0, 0, 0), DerivedMetrics::default());
    }

    #[test]
    fn source_row_decodes_with_missing_sections() {
        let row: SourceRow = serde_json::from_value(serde_json::json!({
            "start_date": "2025-03-02",
            "end_date": "2025-03-08",
            "asin": "B00TEST001",
            "search_query": "usb hub"
        }))
        .unwrap();
        assert!(row.impressions.is_none());
        assert!(row.purchases.is_none());
        assert_eq!(row.asin, "B00TEST001");
    }
}
