use log::info;
use polars::prelude::*;

use crate::checks::require_columns;
use crate::error::EpipanelResult;
use crate::COL;

/// Country-day totals: per (country, date) sums of every running total and daily new column of
/// `metrics`, sorted by country and date.
pub fn country_totals(panel: &DataFrame, metrics: &[&str]) -> EpipanelResult<DataFrame> {
    let mut summed = vec![];
    for metric in metrics {
        summed.push(COL::running_total(metric));
        summed.push(COL::daily_new(metric));
    }
    let mut required: Vec<&str> = vec![COL::COUNTRY_OR_REGION, COL::DATE];
    required.extend(summed.iter().map(String::as_str));
    require_columns(panel, &required)?;

    let totals = panel
        .clone()
        .lazy()
        .group_by([col(COL::COUNTRY_OR_REGION), col(COL::DATE)])
        .agg(summed.iter().map(|c| col(c).sum()).collect::<Vec<_>>())
        .sort_by_exprs(
            [col(COL::COUNTRY_OR_REGION), col(COL::DATE)],
            SortMultipleOptions::default(),
        )
        .collect()?;
    info!("{} country-day totals", totals.height());
    Ok(totals)
}
