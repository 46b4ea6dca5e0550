use log::info;
use polars::prelude::*;

use crate::checks::{assert_join_cardinality, require_columns};
use crate::config::RankSpec;
use crate::error::EpipanelResult;
use crate::COL;

/// Adds `spec.column`: for each group, the ordinal position of the row's date among the dates on
/// which the group's running total was at least `spec.threshold`. Rank 1 is the first qualifying
/// date; earlier dates and groups that never qualify stay null.
///
/// Qualifying rows are reduced to one per (group, date) before ranking, so a country rank can be
/// computed from state-level rows.
pub fn add_threshold_rank(panel: DataFrame, spec: &RankSpec) -> EpipanelResult<DataFrame> {
    let running = COL::running_total(&spec.metric);
    let group = spec.group.column();
    require_columns(&panel, &[group, COL::DATE, &running])?;

    let before = panel.height();
    let ranks = panel
        .clone()
        .lazy()
        .filter(col(&running).gt_eq(lit(spec.threshold)))
        .select([col(group), col(COL::DATE)])
        .unique_stable(None, UniqueKeepStrategy::First)
        .with_column(
            col(COL::DATE)
                .rank(
                    RankOptions {
                        method: RankMethod::Dense,
                        descending: false,
                    },
                    None,
                )
                .over([col(group)])
                .cast(DataType::Int64)
                .alias(&spec.column),
        );
    let panel = panel
        .lazy()
        .join(
            ranks,
            [col(group), col(COL::DATE)],
            [col(group), col(COL::DATE)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;
    assert_join_cardinality(&spec.column, before, panel.height())?;

    info!(
        "{}: {} rows at or above {} {}",
        spec.column,
        panel.height() - panel.column(&spec.column)?.null_count(),
        spec.threshold,
        spec.metric
    );
    Ok(panel)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use polars::df;

    use super::*;
    use crate::config::RankGroup;

    fn march(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, day).unwrap()
    }

    fn spec(group: RankGroup, threshold: i64) -> RankSpec {
        RankSpec {
            column: "rank".into(),
            metric: "cases".into(),
            group,
            threshold,
        }
    }

    fn ranks(df: &DataFrame) -> Vec<Option<i64>> {
        df.sort(
            [COL::STATE_AND_COUNTRY, COL::DATE],
            SortMultipleOptions::default(),
        )
        .unwrap()
        .column("rank")
        .unwrap()
        .i64()
        .unwrap()
        .into_iter()
        .collect()
    }

    fn us_panel() -> DataFrame {
        df!(
            COL::STATE_AND_COUNTRY => &["Not Provided-US"; 3],
            COL::COUNTRY_OR_REGION => &["US"; 3],
            COL::DATE => &[march(8), march(9), march(10)],
            "running_total_cases" => &[5i64, 5, 8]
        )
        .unwrap()
    }

    #[test]
    fn rank_counts_qualifying_days_from_one() {
        let ranked = add_threshold_rank(us_panel(), &spec(RankGroup::Entity, 5)).unwrap();
        assert_eq!(ranks(&ranked), vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn rank_is_null_before_the_threshold_is_reached() {
        let panel = df!(
            COL::STATE_AND_COUNTRY => &["a-X", "a-X", "a-X", "a-X"],
            COL::COUNTRY_OR_REGION => &["X"; 4],
            COL::DATE => &[march(8), march(9), march(10), march(11)],
            "running_total_cases" => &[1i64, 4, 6, 9]
        )
        .unwrap();
        let ranked = add_threshold_rank(panel, &spec(RankGroup::Entity, 5)).unwrap();
        assert_eq!(ranks(&ranked), vec![None, None, Some(1), Some(2)]);
    }

    #[test]
    fn unreached_threshold_leaves_every_row_null() {
        let ranked = add_threshold_rank(us_panel(), &spec(RankGroup::Entity, 100)).unwrap();
        assert_eq!(ranks(&ranked), vec![None, None, None]);
    }

    #[test]
    fn country_rank_is_shared_across_states() {
        let panel = df!(
            COL::STATE_AND_COUNTRY => &["CA-US", "CA-US", "NY-US", "NY-US"],
            COL::COUNTRY_OR_REGION => &["US"; 4],
            COL::DATE => &[march(9), march(10), march(9), march(10)],
            "running_total_cases" => &[2i64, 6, 7, 9]
        )
        .unwrap();
        let ranked = add_threshold_rank(panel, &spec(RankGroup::Country, 5)).unwrap();
        assert_eq!(ranked.height(), 4);
        assert_eq!(ranks(&ranked), vec![Some(1), Some(2), Some(1), Some(2)]);
    }
}
