//! Nested data transformer: grouping, structural validation, derived
//! metrics, and the three-phase batched write.
//!
//! Validation failures abort before any write. Batch write failures do
//! not: each failed batch is recorded and excluded from the success tally
//! while the remaining batches and phases proceed.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::domain::{
    DerivedMetrics, DispersionStats, EntityGroup, EntityPerformanceRecord, PeriodType,
    QueryPerformanceRecord, SourceRow, SyncError, SyncRunCounts, WritePhase,
};
use crate::infrastructure::store::PerformanceRepository;

use super::rollup;

/// Result of the write phases. Counts track query-level records, the unit
/// the run record reports in; entity and summary writes are tallied
/// separately.
#[derive(Debug, Default)]
pub struct WriteOutcome {
    pub counts: SyncRunCounts,
    pub entities_written: i64,
    pub queries_written: i64,
    pub summaries_written: i64,
    pub errors: Vec<SyncError>,
}

pub struct NestedDataTransformer {
    repo: PerformanceRepository,
    query_batch_size: usize,
    summary_batch_size: usize,
}

impl NestedDataTransformer {
    pub fn new(
        repo: PerformanceRepository,
        query_batch_size: usize,
        summary_batch_size: usize,
    ) -> Self {
        Self {
            repo,
            query_batch_size: query_batch_size.max(1),
            summary_batch_size: summary_batch_size.max(1),
        }
    }

    /// Group flat rows into the per-entity hierarchy and validate it.
    /// Any structural violation is fatal and happens before any write.
    pub fn prepare(rows: Vec<SourceRow>) -> Result<Vec<EntityGroup>, SyncError> {
        // Group by (start_date, end_date, asin), appending so every query
        // of an entity window is preserved.
        let mut grouped: BTreeMap<(NaiveDate, NaiveDate, String), Vec<SourceRow>> =
            BTreeMap::new();
        for row in rows {
            grouped
                .entry((row.start_date, row.end_date, row.asin.clone()))
                .or_default()
                .push(row);
        }

        let mut groups = Vec::with_capacity(grouped.len());
        for ((start_date, end_date, asin), rows) in grouped {
            if asin.trim().is_empty() {
                return Err(SyncError::Validation(format!(
                    "entity group {start_date}..{end_date} has an empty asin"
                )));
            }
            let mut queries = Vec::with_capacity(rows.len());
            for row in rows {
                queries.push(Self::promote(row)?);
            }
            groups.push(EntityGroup {
                entity: EntityPerformanceRecord {
                    id: None,
                    start_date,
                    end_date,
                    asin,
                },
                queries,
            });
        }
        Ok(groups)
    }

    /// Promote one wire row into a strict query record, computing the
    /// derived funnel metrics. Missing identifiers or funnel sections are
    /// structural violations.
    fn promote(row: SourceRow) -> Result<QueryPerformanceRecord, SyncError> {
        if row.search_query.trim().is_empty() {
            return Err(SyncError::Validation(format!(
                "asin {} has a query record with an empty search query",
                row.asin
            )));
        }
        let context = |section: &str| {
            SyncError::Validation(format!(
                "asin {} query '{}' is missing {section} data",
                row.asin, row.search_query
            ))
        };
        let impressions = row.impressions.ok_or_else(|| context("impression"))?;
        let clicks = row.clicks.ok_or_else(|| context("click"))?;
        let cart_adds = row.cart_adds.ok_or_else(|| context("cart-add"))?;
        let purchases = row.purchases.ok_or_else(|| context("purchase"))?;

        let derived = DerivedMetrics::from_counts(
            impressions.asin_count,
            clicks.asin_count,
            cart_adds.asin_count,
            purchases.asin_count,
        );
        let impression_stats = row
            .impression_stats
            .unwrap_or_else(|| DispersionStats::single(impressions.asin_count));

        Ok(QueryPerformanceRecord {
            search_query: row.search_query,
            search_query_score: row.search_query_score,
            search_query_volume: row.search_query_volume,
            impressions,
            clicks,
            cart_adds,
            purchases,
            derived,
            impression_stats,
            active_weeks: row.active_weeks.unwrap_or(1),
        })
    }

    /// Run the three write phases over validated groups. Phase A parents
    /// happen-before Phase B children happen-before Phase C summaries.
    pub async fn write(
        &self,
        groups: &[EntityGroup],
        period_type: PeriodType,
        sync_run_id: &str,
        now: DateTime<Utc>,
    ) -> WriteOutcome {
        let mut outcome = WriteOutcome::default();
        outcome.counts.processed = groups.iter().map(|g| g.queries.len() as i64).sum();

        // Phase A: parent upserts, one row each.
        let mut entity_ids: Vec<Option<i64>> = Vec::with_capacity(groups.len());
        for (index, group) in groups.iter().enumerate() {
            match self.repo.upsert_entity(&group.entity).await {
                Ok((id, _created)) => {
                    outcome.entities_written += 1;
                    entity_ids.push(Some(id));
                }
                Err(e) => {
                    warn!(asin = %group.entity.asin, error = %e, "entity upsert failed");
                    outcome.counts.failed += group.queries.len() as i64;
                    outcome.errors.push(SyncError::BatchWrite {
                        phase: WritePhase::EntityPerformance,
                        batch_index: index,
                        rows: 1,
                        message: e.to_string(),
                    });
                    entity_ids.push(None);
                }
            }
        }

        // Phase B: query records in batches, per parent.
        for (group, entity_id) in groups.iter().zip(&entity_ids) {
            let Some(entity_id) = *entity_id else {
                // Parent failed; its children were already counted failed.
                continue;
            };
            for (batch_index, batch) in group.queries.chunks(self.query_batch_size).enumerate() {
                match self.repo.upsert_query_batch(entity_id, batch).await {
                    Ok(stats) => {
                        outcome.counts.inserted += stats.inserted;
                        outcome.counts.updated += stats.updated;
                        outcome.queries_written += stats.written();
                    }
                    Err(e) => {
                        warn!(
                            asin = %group.entity.asin,
                            batch_index,
                            error = %e,
                            "query batch upsert failed"
                        );
                        outcome.counts.failed += batch.len() as i64;
                        outcome.errors.push(SyncError::BatchWrite {
                            phase: WritePhase::QueryPerformance,
                            batch_index,
                            rows: batch.len(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        // Phase C: period summaries, stamped with provenance.
        let mut summaries = rollup::fold_into_summaries(period_type, groups);
        for summary in &mut summaries {
            summary.sync_run_id = Some(sync_run_id.to_string());
            summary.last_synced_at = Some(now);
        }
        for (batch_index, batch) in summaries.chunks(self.summary_batch_size).enumerate() {
            match self.repo.upsert_summary_batch(batch).await {
                Ok(stats) => {
                    outcome.summaries_written += stats.written();
                }
                Err(e) => {
                    warn!(batch_index, error = %e, "summary batch upsert failed");
                    outcome.errors.push(SyncError::BatchWrite {
                        phase: WritePhase::PeriodSummary,
                        batch_index,
                        rows: batch.len(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if outcome.errors.is_empty() {
            info!(
                entities = outcome.entities_written,
                queries = outcome.queries_written,
                summaries = outcome.summaries_written,
                "write phases completed"
            );
        } else {
            warn!(
                failed_batches = outcome.errors.len(),
                failed_records = outcome.counts.failed,
                "write phases completed with isolated batch failures"
            );
        }
        debug!(counts = ?outcome.counts, "write outcome");
        outcome
    }
}
