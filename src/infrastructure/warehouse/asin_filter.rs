//! ASIN filter strategies for warehouse-side row selection.
//!
//! The chosen strategy only shapes the aggregation query; no post-fetch
//! filtering happens anywhere in the pipeline.

use serde::{Deserialize, Serialize};

use crate::domain::SyncWindow;

/// Which ASINs a sync includes, fixed once per sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AsinFilterStrategy {
    /// Every ASIN present in the source window.
    All,
    /// An explicit identifier list.
    Specific { asins: Vec<String> },
    /// The N ASINs with the highest summed impressions over the window.
    Top { limit: u32 },
    /// The top decile of ASINs by percentile of summed impressions.
    Representative,
}

impl Default for AsinFilterStrategy {
    fn default() -> Self {
        AsinFilterStrategy::All
    }
}

impl AsinFilterStrategy {
    /// SQL fragment appended to the aggregation query's WHERE clause.
    /// Empty for `All` (and for an empty explicit list).
    pub fn clause(&self, source_table: &str, window: &SyncWindow) -> String {
        match self {
            AsinFilterStrategy::All => String::new(),
            AsinFilterStrategy::Specific { asins } if asins.is_empty() => String::new(),
            AsinFilterStrategy::Specific { asins } => {
                let list = asins
                    .iter()
                    .map(|asin| quote_literal(asin))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" AND asin IN ({list})")
            }
            AsinFilterStrategy::Top { limit } => format!(
                " AND asin IN (SELECT asin FROM `{source_table}` \
                 WHERE start_date >= DATE '{}' AND end_date <= DATE '{}' \
                 GROUP BY asin ORDER BY SUM(asin_impression_count) DESC, asin LIMIT {limit})",
                window.start, window.end
            ),
            AsinFilterStrategy::Representative => format!(
                " AND asin IN (SELECT asin FROM (\
                 SELECT asin, PERCENT_RANK() OVER (ORDER BY SUM(asin_impression_count)) AS impression_pct \
                 FROM `{source_table}` \
                 WHERE start_date >= DATE '{}' AND end_date <= DATE '{}' \
                 GROUP BY asin) WHERE impression_pct >= 0.9)",
                window.start, window.end
            ),
        }
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> SyncWindow {
        SyncWindow::new("2025-03-02".parse().unwrap(), "2025-03-29".parse().unwrap()).unwrap()
    }

    #[test]
    fn all_renders_empty_clause() {
        assert_eq!(AsinFilterStrategy::All.clause("ds.sqp", &window()), "");
    }

    #[test]
    fn specific_renders_in_list() {
        let filter = AsinFilterStrategy::Specific {
            asins: vec!["B00AAA".into(), "B00BBB".into()],
        };
        assert_eq!(
            filter.clause("ds.sqp", &window()),
            " AND asin IN ('B00AAA', 'B00BBB')"
        );
    }

    #[test]
    fn specific_empty_list_renders_nothing() {
        let filter = AsinFilterStrategy::Specific { asins: vec![] };
        assert_eq!(filter.clause("ds.sqp", &window()), "");
    }

    #[test]
    fn specific_escapes_quotes() {
        let filter = AsinFilterStrategy::Specific {
            asins: vec!["B00'X".into()],
        };
        assert!(filter.clause("ds.sqp", &window()).contains("'B00''X'"));
    }

    #[test]
    fn top_ranks_by_summed_impressions() {
        let clause = AsinFilterStrategy::Top { limit: 25 }.clause("ds.sqp", &window());
        assert!(clause.contains("ORDER BY SUM(asin_impression_count) DESC"));
        assert!(clause.contains("LIMIT 25"));
        assert!(clause.contains("start_date >= DATE '2025-03-02'"));
    }

    #[test]
    fn representative_keeps_top_decile() {
        let clause = AsinFilterStrategy::Representative.clause("ds.sqp", &window());
        assert!(clause.contains("PERCENT_RANK() OVER (ORDER BY SUM(asin_impression_count))"));
        assert!(clause.contains(">= 0.9"));
    }

    #[test]
    fn serde_mode_tagging() {
        let parsed: AsinFilterStrategy =
            serde_json::from_str(r#"{"mode": "top", "limit": 10}"#).unwrap();
        assert_eq!(parsed, AsinFilterStrategy::Top { limit: 10 });
        let parsed: AsinFilterStrategy = serde_json::from_str(r#"{"mode": "all"}"#).unwrap();
        assert_eq!(parsed, AsinFilterStrategy::All);
    }
}
