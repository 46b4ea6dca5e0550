use log::info;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::checks::{assert_join_cardinality, assert_unique_entity_dates, require_columns};
use crate::error::EpipanelResult;
use crate::COL;

/// Upstream feed that produced a row.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString,
)]
pub enum DataSource {
    /// Global per-region cumulative matrices
    #[strum(serialize = "JHU")]
    #[serde(rename = "JHU")]
    Jhu,
    /// Long per-US-state feed
    #[strum(serialize = "NYT")]
    #[serde(rename = "NYT")]
    Nyt,
}

pub fn tag_source(panel: DataFrame, source: DataSource) -> EpipanelResult<DataFrame> {
    Ok(panel
        .lazy()
        .with_column(lit(source.as_ref()).alias(COL::DATA_SOURCE))
        .collect()?)
}

/// Selects the columns of `template` from `df` in the same order and with the same types.
/// Columns `df` lacks are added as nulls.
pub(crate) fn align_to(df: DataFrame, template: &DataFrame) -> LazyFrame {
    let present = df
        .get_column_names()
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>();
    let columns = template
        .get_columns()
        .iter()
        .map(|s| {
            let name = s.name();
            if present.iter().any(|c| c == name) {
                col(name).cast(s.dtype().clone())
            } else {
                lit(Null {}).cast(s.dtype().clone()).alias(name)
            }
        })
        .collect::<Vec<_>>();
    df.lazy().select(columns)
}

/// Stacks two independently sourced panels partitioned by entity: every value of `partition`
/// present in `secondary` is taken from `secondary` only. Rows are tagged with their source and
/// keep the columns of `primary`.
pub fn stack_by_entity(
    primary: DataFrame,
    primary_source: DataSource,
    secondary: DataFrame,
    secondary_source: DataSource,
    partition: &str,
) -> EpipanelResult<DataFrame> {
    require_columns(&primary, &[partition])?;
    require_columns(&secondary, &[partition])?;
    let replaced = secondary.column(partition)?.unique()?;

    let primary = tag_source(
        primary
            .lazy()
            .filter(col(partition).is_in(lit(replaced)).not())
            .collect()?,
        primary_source,
    )?;
    let secondary = tag_source(secondary, secondary_source)?;
    let stacked = concat(
        [primary.clone().lazy(), align_to(secondary, &primary)],
        UnionArgs::default(),
    )?
    .collect()?;
    info!(
        "Stacked {} {primary_source} rows with {} {secondary_source} rows",
        primary.height(),
        stacked.height() - primary.height()
    );
    Ok(stacked)
}

/// Left joins the metric columns of each `(metric, panel)` onto `driving` by (`key`, date).
///
/// The driving panel decides which entity-dates exist; a metric panel without a matching row
/// contributes nulls.
pub fn merge_metrics(
    driving: DataFrame,
    others: Vec<(String, DataFrame)>,
    key: &str,
) -> EpipanelResult<DataFrame> {
    let before = driving.height();
    let mut merged = driving;
    for (metric, panel) in others {
        let mut columns = vec![col(key), col(COL::DATE)];
        columns.extend(COL::metric_columns(&metric).iter().map(|c| col(c)));
        merged = merged
            .lazy()
            .join(
                panel.lazy().select(columns),
                [col(key), col(COL::DATE)],
                [col(key), col(COL::DATE)],
                JoinArgs::new(JoinType::Left),
            )
            .collect()?;
        assert_join_cardinality(&format!("merge {metric}"), before, merged.height())?;
    }
    assert_unique_entity_dates(&merged, key)?;
    Ok(merged)
}
