//! Guards that keep the panel internally consistent: schema presence, join cardinality, one row
//! per (entity, date), and agreement between daily new counts and cumulative totals.

use itertools::izip;
use log::{debug, warn};
use polars::prelude::*;
use serde::Serialize;

use crate::error::{EpipanelError, EpipanelResult};
use crate::COL;

/// Fails with a schema error naming the first absent column.
pub fn require_columns(df: &DataFrame, columns: &[&str]) -> EpipanelResult<()> {
    let present = df.get_column_names();
    match columns.iter().find(|c| !present.contains(c)) {
        Some(missing) => Err(EpipanelError::MissingColumn(missing.to_string())),
        None => Ok(()),
    }
}

/// A left join must never change the number of driving rows.
pub fn assert_join_cardinality(join: &str, before: usize, after: usize) -> EpipanelResult<()> {
    if before != after {
        return Err(EpipanelError::JoinCardinality {
            join: join.to_string(),
            before,
            after,
        });
    }
    debug!("Join '{join}' kept {after} rows");
    Ok(())
}

/// Number of rows beyond the first for each repeated (`key`, date) pair.
pub fn count_duplicate_entity_dates(df: &DataFrame, key: &str) -> EpipanelResult<usize> {
    require_columns(df, &[key, COL::DATE])?;
    let distinct = df
        .clone()
        .lazy()
        .select([col(key), col(COL::DATE)])
        .unique(None, UniqueKeepStrategy::Any)
        .collect()?
        .height();
    Ok(df.height() - distinct)
}

pub fn assert_unique_entity_dates(df: &DataFrame, key: &str) -> EpipanelResult<()> {
    match count_duplicate_entity_dates(df, key)? {
        0 => Ok(()),
        duplicates => Err(EpipanelError::DuplicateEntityDate {
            key: key.to_string(),
            duplicates,
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TotalMismatch {
    pub entity: String,
    pub daily_new_sum: i64,
    pub latest_running_total: i64,
}

/// Outcome of comparing summed daily new counts against the latest running total per entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub metric: String,
    pub entities_checked: usize,
    pub mismatches: Vec<TotalMismatch>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Converts a failed report into an error.
    pub fn ensure(&self) -> EpipanelResult<()> {
        if self.is_consistent() {
            Ok(())
        } else {
            Err(EpipanelError::InconsistentTotals {
                metric: self.metric.clone(),
                entities: self.mismatches.len(),
            })
        }
    }
}

/// For every entity, the sum of `daily_new_<metric>` must equal the running total on the
/// entity's latest date. Rows without a running total are ignored.
pub fn consistency_report(
    df: &DataFrame,
    key: &str,
    metric: &str,
) -> EpipanelResult<ConsistencyReport> {
    let running = COL::running_total(metric);
    let daily = COL::daily_new(metric);
    require_columns(df, &[key, COL::DATE, &running, &daily])?;

    let totals = df
        .clone()
        .lazy()
        .filter(col(&running).is_not_null())
        .group_by([col(key)])
        .agg([
            col(&daily).sum().alias("daily_new_sum"),
            col(&running)
                .sort_by([col(COL::DATE)], SortMultipleOptions::default())
                .last()
                .alias("latest_running_total"),
        ])
        .collect()?
        .sort([key], SortMultipleOptions::default())?;

    let mut mismatches = vec![];
    for (entity, daily_new_sum, latest_running_total) in izip!(
        totals.column(key)?.str()?,
        totals.column("daily_new_sum")?.i64()?,
        totals.column("latest_running_total")?.i64()?,
    ) {
        let daily_new_sum = daily_new_sum.unwrap_or_default();
        let latest_running_total = latest_running_total.unwrap_or_default();
        if daily_new_sum != latest_running_total {
            let entity = entity.unwrap_or_default().to_string();
            warn!(
                "{daily} for '{entity}' sums to {daily_new_sum} but the latest {running} is \
                 {latest_running_total}"
            );
            mismatches.push(TotalMismatch {
                entity,
                daily_new_sum,
                latest_running_total,
            });
        }
    }

    Ok(ConsistencyReport {
        metric: metric.to_string(),
        entities_checked: totals.height(),
        mismatches,
    })
}
