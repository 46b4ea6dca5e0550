use log::info;
use polars::prelude::*;

use crate::checks::{assert_join_cardinality, require_columns};
use crate::error::EpipanelResult;
use crate::COL;

/// Adds `running_total_<metric>_prev_day` and `daily_new_<metric>` to a long panel keyed by
/// (`key`, date).
///
/// The previous value comes from a copy of the panel with every date moved one calendar day
/// forward, joined back on (`key`, date). A missing previous day counts as zero, so a gap in the
/// feed yields the whole cumulative value on the day after the gap rather than a difference
/// against an older row. Negative daily values are kept.
pub fn add_daily_fields(panel: DataFrame, key: &str, metric: &str) -> EpipanelResult<DataFrame> {
    let running = COL::running_total(metric);
    let prev = COL::prev_day(metric);
    let daily = COL::daily_new(metric);
    require_columns(&panel, &[key, COL::DATE, &running])?;

    let before = panel.height();
    let next_day = panel.clone().lazy().select([
        col(key),
        (col(COL::DATE).cast(DataType::Int32) + lit(1i32))
            .cast(DataType::Date)
            .alias(COL::DATE),
        col(&running).alias(&prev),
    ]);
    let panel = panel
        .lazy()
        .join(
            next_day,
            [col(key), col(COL::DATE)],
            [col(key), col(COL::DATE)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(col(&prev).fill_null(lit(0i64)))
        .with_column((col(&running) - col(&prev)).alias(&daily))
        .collect()?;
    assert_join_cardinality(&format!("previous day {metric}"), before, panel.height())?;

    info!("Computed {daily} for {} rows", panel.height());
    Ok(panel)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use polars::df;

    use super::*;
    use crate::error::EpipanelError;

    fn march(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, day).unwrap()
    }

    fn daily(keys: &[&str], days: &[u32], totals: &[i64]) -> Vec<(i64, i64)> {
        let dates: Vec<_> = days.iter().map(|d| march(*d)).collect();
        let panel = df!(
            COL::STATE_AND_COUNTRY => keys,
            COL::DATE => dates,
            "running_total_cases" => totals
        )
        .unwrap();
        let out = add_daily_fields(panel, COL::STATE_AND_COUNTRY, "cases")
            .unwrap()
            .sort(
                [COL::STATE_AND_COUNTRY, COL::DATE],
                SortMultipleOptions::default(),
            )
            .unwrap();
        out.column("running_total_cases_prev_day")
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .zip(
                out.column("daily_new_cases")
                    .unwrap()
                    .i64()
                    .unwrap()
                    .into_no_null_iter(),
            )
            .collect()
    }

    #[test]
    fn daily_new_is_difference_to_the_previous_calendar_day() {
        let key = "Not Provided-US";
        assert_eq!(
            daily(&[key, key, key], &[8, 9, 10], &[5, 5, 8]),
            vec![(0, 5), (5, 0), (5, 3)]
        );
    }

    #[test]
    fn flat_then_rising_total_after_an_earlier_report() {
        let key = "Not Provided-US";
        let out = daily(&[key, key, key, key], &[7, 8, 9, 10], &[5, 5, 5, 8]);
        let new: Vec<i64> = out[1..].iter().map(|(_, daily)| *daily).collect();
        assert_eq!(new, vec![0, 0, 3]);
    }

    #[test]
    fn missing_day_counts_as_zero_not_the_previous_row() {
        let key = "a-X";
        // 11 March is absent; 12 March must not be compared with 10 March
        assert_eq!(
            daily(&[key, key, key], &[9, 10, 12], &[1, 4, 10]),
            vec![(0, 1), (1, 3), (0, 10)]
        );
    }

    #[test]
    fn entities_do_not_leak_into_each_other() {
        assert_eq!(
            daily(&["a-X", "b-X"], &[9, 10], &[4, 7]),
            vec![(0, 4), (0, 7)]
        );
    }

    #[test]
    fn negative_corrections_pass_through() {
        let key = "a-X";
        assert_eq!(
            daily(&[key, key], &[9, 10], &[10, 8]),
            vec![(0, 10), (10, -2)]
        );
    }

    #[test]
    fn duplicate_entity_dates_are_caught_by_the_join_guard() {
        let panel = df!(
            COL::STATE_AND_COUNTRY => &["a-X", "a-X", "a-X"],
            COL::DATE => &[march(9), march(9), march(10)],
            "running_total_cases" => &[1i64, 1, 2]
        )
        .unwrap();
        assert!(matches!(
            add_daily_fields(panel, COL::STATE_AND_COUNTRY, "cases"),
            Err(EpipanelError::JoinCardinality { .. })
        ));
    }
}
