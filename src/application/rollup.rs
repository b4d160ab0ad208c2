//! Pure rollup of query-level records into period summaries.
//!
//! Totals are summed across the finer-grained records of a period and every
//! rate is recomputed from the summed numerator and denominator. Averaging
//! the finer records' rates would weight a 100-impression week the same as
//! a 10,000-impression week, so it never happens here.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::domain::{
    DispersionStats, EntityGroup, PeriodKey, PeriodSummaryRecord, PeriodType, safe_ratio,
};

#[derive(Debug, Default)]
struct SummaryAccumulator {
    period_start: Option<NaiveDate>,
    period_end: Option<NaiveDate>,
    total_impressions: i64,
    asin_impressions: i64,
    total_clicks: i64,
    asin_clicks: i64,
    total_cart_adds: i64,
    asin_cart_adds: i64,
    total_purchases: i64,
    asin_purchases: i64,
    active_weeks: i64,
    /// One entry per source record: its ASIN impression count, plus the
    /// dispersion the warehouse already computed for that record.
    samples: Vec<(i64, DispersionStats)>,
}

impl SummaryAccumulator {
    fn absorb(
        &mut self,
        group_start: NaiveDate,
        group_end: NaiveDate,
        q: &crate::domain::QueryPerformanceRecord,
    ) {
        self.period_start = Some(match self.period_start {
            Some(start) => start.min(group_start),
            None => group_start,
        });
        self.period_end = Some(match self.period_end {
            Some(end) => end.max(group_end),
            None => group_end,
        });
        self.total_impressions += q.impressions.total_count;
        self.asin_impressions += q.impressions.asin_count;
        self.total_clicks += q.clicks.total_count;
        self.asin_clicks += q.clicks.asin_count;
        self.total_cart_adds += q.cart_adds.total_count;
        self.asin_cart_adds += q.cart_adds.asin_count;
        self.total_purchases += q.purchases.total_count;
        self.asin_purchases += q.purchases.asin_count;
        self.active_weeks += q.active_weeks;
        self.samples.push((q.impressions.asin_count, q.impression_stats));
    }

    fn dispersion(&self) -> DispersionStats {
        match self.samples.as_slice() {
            [] => DispersionStats::single(0),
            // A single source record keeps the dispersion the warehouse
            // computed within that record's own window.
            [(_, stats)] => *stats,
            samples => {
                let counts: Vec<i64> = samples.iter().map(|(count, _)| *count).collect();
                let min = counts.iter().copied().min().unwrap_or(0);
                let max = counts.iter().copied().max().unwrap_or(0);
                let avg = counts.iter().sum::<i64>() as f64 / counts.len() as f64;
                let variance = counts
                    .iter()
                    .map(|&count| {
                        let diff = count as f64 - avg;
                        diff * diff
                    })
                    .sum::<f64>()
                    / counts.len() as f64;
                DispersionStats {
                    min_impressions: min,
                    max_impressions: max,
                    avg_impressions: avg,
                    stddev_impressions: variance.sqrt(),
                }
            }
        }
    }
}

/// Fold entity groups into summary records at the target granularity.
/// Output is sorted by (period, query, asin) and carries no provenance;
/// the transformer stamps `sync_run_id`/`last_synced_at` before writing.
pub fn fold_into_summaries(
    period_type: PeriodType,
    groups: &[EntityGroup],
) -> Vec<PeriodSummaryRecord> {
    let mut accumulators: BTreeMap<(PeriodKey, String, String), SummaryAccumulator> =
        BTreeMap::new();

    for group in groups {
        let period = PeriodKey::for_date(period_type, group.entity.start_date);
        for query in &group.queries {
            accumulators
                .entry((period, query.search_query.clone(), group.entity.asin.clone()))
                .or_default()
                .absorb(group.entity.start_date, group.entity.end_date, query);
        }
    }

    accumulators
        .into_iter()
        .map(|((period, search_query, asin), acc)| {
            let dispersion = acc.dispersion();
            PeriodSummaryRecord {
                period,
                // absorb() always ran at least once per accumulator.
                period_start: acc.period_start.unwrap_or_default(),
                period_end: acc.period_end.unwrap_or_default(),
                search_query,
                asin,
                total_impressions: acc.total_impressions,
                asin_impressions: acc.asin_impressions,
                total_clicks: acc.total_clicks,
                asin_clicks: acc.asin_clicks,
                total_cart_adds: acc.total_cart_adds,
                asin_cart_adds: acc.asin_cart_adds,
                total_purchases: acc.total_purchases,
                asin_purchases: acc.asin_purchases,
                avg_ctr: safe_ratio(acc.total_clicks, acc.total_impressions),
                avg_cvr: safe_ratio(acc.total_purchases, acc.total_clicks),
                purchase_per_impression: safe_ratio(acc.total_purchases, acc.total_impressions),
                impression_share: safe_ratio(acc.asin_impressions, acc.total_impressions),
                click_share: safe_ratio(acc.asin_clicks, acc.total_clicks),
                cart_add_share: safe_ratio(acc.asin_cart_adds, acc.total_cart_adds),
                purchase_share: safe_ratio(acc.asin_purchases, acc.total_purchases),
                dispersion,
                active_weeks: acc.active_weeks,
                sync_run_id: None,
                last_synced_at: None,
            }
        })
        .collect()
}
