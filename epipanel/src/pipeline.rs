//! Run orchestration. Each stage fully materialises its output before the next starts, and the
//! configuration, reference tables and run log travel through an explicit [`RunContext`].

use std::fmt::Display;

use anyhow::anyhow;
use log::info;
use polars::prelude::*;
use serde::Serialize;
use strum_macros::{Display as StrumDisplay, EnumIter};

use crate::checks::{consistency_report, count_duplicate_entity_dates, ConsistencyReport};
use crate::config::{Config, UsFeed};
use crate::delta::add_daily_fields;
use crate::enrich::{CountryCodeLookup, Enricher};
use crate::entity::{apply_aliases, normalise, STATE_ALIASES};
use crate::error::{EpipanelError, EpipanelResult};
use crate::legacy::{LegacyReconciler, StateResolution};
use crate::merge::{merge_metrics, stack_by_entity, tag_source, DataSource};
use crate::rank::add_threshold_rank;
use crate::reference::ReferenceTables;
use crate::reshape::{parse_date_column, wide_to_long};
use crate::source::{prepare_global, us_locality_long, GLOBAL_IDENTIFIERS};
use crate::COL;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Fetch,
    Reshape,
    Normalise,
    Reconcile,
    Delta,
    Merge,
    Rank,
    Enrich,
    Output,
    Verify,
}

/// Tags the error of a failed stage with the stage name.
pub trait InStage<T> {
    fn in_stage(self, stage: Stage) -> EpipanelResult<T>;
}

impl<T> InStage<T> for EpipanelResult<T> {
    fn in_stage(self, stage: Stage) -> EpipanelResult<T> {
        self.map_err(|err| err.in_stage(stage))
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StageEvent {
    pub stage: Stage,
    pub rows: usize,
    pub detail: String,
}

/// Structured record of what each stage did during a run.
#[derive(Serialize, Debug, Default, Clone)]
pub struct RunLog {
    events: Vec<StageEvent>,
}

impl RunLog {
    pub fn emit(&mut self, stage: Stage, rows: usize, detail: impl Display) {
        let detail = detail.to_string();
        info!("[{stage}] {detail} ({rows} rows)");
        self.events.push(StageEvent {
            stage,
            rows,
            detail,
        });
    }

    pub fn events(&self) -> &[StageEvent] {
        &self.events
    }
}

/// Everything a run reads, plus the log it writes to.
pub struct RunContext<'a> {
    pub config: &'a Config,
    pub reference: &'a ReferenceTables,
    pub lookup: &'a dyn CountryCodeLookup,
    pub log: RunLog,
}

impl<'a> RunContext<'a> {
    pub fn new(
        config: &'a Config,
        reference: &'a ReferenceTables,
        lookup: &'a dyn CountryCodeLookup,
    ) -> Self {
        Self {
            config,
            reference,
            lookup,
            log: RunLog::default(),
        }
    }
}

/// Upstream frames as fetched.
#[derive(Debug, Clone)]
pub struct RawFeeds {
    /// One wide cumulative matrix per metric, in config order
    pub global: Vec<(String, DataFrame)>,
    /// Long per-US-state feed, present when it replaces the US rows
    pub us: Option<DataFrame>,
}

/// A finished panel with the checks it passed and the run log.
#[derive(Debug)]
pub struct Panel {
    pub data: DataFrame,
    pub consistency: Vec<ConsistencyReport>,
    pub log: RunLog,
}

/// Output columns in their published order.
pub fn output_columns(config: &Config) -> Vec<String> {
    let mut columns: Vec<String> = [
        COL::COUNTRY_OR_REGION,
        COL::PROVINCE_OR_STATE,
        COL::STATE_AND_COUNTRY,
        COL::DATE,
    ]
    .map(String::from)
    .into();
    for metric in config.metrics() {
        columns.extend(COL::metric_columns(metric));
    }
    columns.extend([COL::DATA_SOURCE, COL::LATITUDE, COL::LONGITUDE].map(String::from));
    columns.extend(config.ranks.iter().map(|rank| rank.column.clone()));
    columns.extend(
        [
            COL::COUNTRY_CODE_2,
            COL::COUNTRY_CODE_3,
            COL::COUNTRY_POPULATION,
            COL::COUNTRY_MEDIAN_AGE,
            COL::US_STATE_POPULATION,
            COL::COUNTRY_RUNNING_AGG,
        ]
        .map(String::from),
    );
    columns
}

/// Reshaped, normalised and delta-enriched long panel of one metric, tagged with its source.
fn metric_panel(
    ctx: &mut RunContext,
    resolution: &StateResolution,
    metric: &str,
    wide: DataFrame,
    us: Option<&DataFrame>,
) -> EpipanelResult<DataFrame> {
    let config = ctx.config;
    let running = COL::running_total(metric);

    let wide = prepare_global(wide).in_stage(Stage::Reshape)?;
    let long = wide_to_long(&wide, &GLOBAL_IDENTIFIERS, &running).in_stage(Stage::Reshape)?;
    ctx.log
        .emit(Stage::Reshape, long.height(), format!("{metric} matrix to long rows"));

    let long = normalise(long).in_stage(Stage::Normalise)?;
    ctx.log
        .emit(Stage::Normalise, long.height(), format!("{metric} entity keys"));

    let long = match config.us_feed {
        UsFeed::Reconciled => {
            let reconciler = LegacyReconciler {
                resolution,
                cutover: config.cutover_date,
                country: &config.us_country_label,
            };
            let reconciled = reconciler
                .reconcile(long, &[running.as_str()])
                .in_stage(Stage::Reconcile)?;
            ctx.log.emit(
                Stage::Reconcile,
                reconciled.height(),
                format!("{metric} {} rows split at {}", config.us_country_label, config.cutover_date),
            );
            reconciled
        }
        UsFeed::Nyt => long,
    };

    let long = add_daily_fields(long, COL::STATE_AND_COUNTRY, metric).in_stage(Stage::Delta)?;
    ctx.log
        .emit(Stage::Delta, long.height(), format!("{metric} previous day join"));

    match (config.us_feed, us) {
        (UsFeed::Nyt, Some(us)) => {
            let mut us_long = us_locality_long(us.clone(), metric, &config.us_country_label)
                .in_stage(Stage::Normalise)?;
            apply_aliases(&mut us_long, COL::PROVINCE_OR_STATE, STATE_ALIASES)
                .in_stage(Stage::Normalise)?;
            let us_long = normalise(us_long).in_stage(Stage::Normalise)?;
            let us_long =
                add_daily_fields(us_long, COL::STATE_AND_COUNTRY, metric).in_stage(Stage::Delta)?;
            let stacked = stack_by_entity(
                long,
                DataSource::Jhu,
                us_long,
                DataSource::Nyt,
                COL::COUNTRY_OR_REGION,
            )
            .in_stage(Stage::Merge)?;
            ctx.log.emit(
                Stage::Merge,
                stacked.height(),
                format!("{metric} {} rows from {}", config.us_country_label, DataSource::Nyt),
            );
            Ok(stacked)
        }
        (UsFeed::Nyt, None) => Err(EpipanelError::from(anyhow!(
            "The per-state US feed was selected but not fetched"
        ))
        .in_stage(Stage::Merge)),
        (UsFeed::Reconciled, _) => tag_source(long, DataSource::Jhu).in_stage(Stage::Merge),
    }
}

/// Builds the panel from fetched feeds: reshape, normalise, reconcile, delta and stacking per
/// metric, then the metric merge, threshold ranks, enrichment, output ordering and the
/// post-run checks.
pub fn assemble(raw: RawFeeds, mut ctx: RunContext) -> EpipanelResult<Panel> {
    let config = ctx.config;
    let driving_metric = config
        .metrics()
        .first()
        .map(|m| m.to_string())
        .ok_or_else(|| EpipanelError::from(anyhow!("No global feeds configured")))?;
    let resolution =
        StateResolution::standard(ctx.reference.state_codes_by_name().in_stage(Stage::Reconcile)?);

    let mut panels = vec![];
    for (metric, wide) in raw.global {
        let panel = metric_panel(&mut ctx, &resolution, &metric, wide, raw.us.as_ref())?;
        panels.push((metric, panel));
    }
    let mut panels = panels.into_iter();
    let (_, driving) = panels
        .next()
        .ok_or_else(|| EpipanelError::from(anyhow!("No global feeds fetched")))
        .in_stage(Stage::Merge)?;
    let panel = merge_metrics(driving, panels.collect(), COL::STATE_AND_COUNTRY)
        .in_stage(Stage::Merge)?;
    ctx.log
        .emit(Stage::Merge, panel.height(), "metrics merged on entity and date");

    let mut panel = panel;
    for spec in &config.ranks {
        panel = add_threshold_rank(panel, spec).in_stage(Stage::Rank)?;
        ctx.log.emit(
            Stage::Rank,
            panel.height() - panel.column(&spec.column)?.null_count(),
            format!("{} ({} >= {})", spec.column, spec.metric, spec.threshold),
        );
    }

    let enricher = Enricher {
        reference: ctx.reference,
        lookup: ctx.lookup,
        us_country_label: &config.us_country_label,
        driving_metric: &driving_metric,
    };
    let panel = enricher.apply(panel).in_stage(Stage::Enrich)?;
    ctx.log
        .emit(Stage::Enrich, panel.height(), "reference attributes joined");

    let columns = output_columns(config);
    let panel = panel
        .select(columns.iter().map(String::as_str))
        .and_then(|panel| {
            panel.sort(
                [COL::STATE_AND_COUNTRY, COL::DATE],
                SortMultipleOptions::default(),
            )
        })
        .map_err(EpipanelError::from)
        .in_stage(Stage::Output)?;
    ctx.log.emit(
        Stage::Output,
        panel.height(),
        format!("{} columns in output order", columns.len()),
    );

    let consistency = check_panel(&panel, &config.metrics(), config.strict_consistency)
        .in_stage(Stage::Verify)?;
    ctx.log.emit(
        Stage::Verify,
        panel.height(),
        format!(
            "{} of {} metrics consistent",
            consistency.iter().filter(|r| r.is_consistent()).count(),
            consistency.len()
        ),
    );

    Ok(Panel {
        data: panel,
        consistency,
        log: ctx.log,
    })
}

/// Uniqueness and total consistency of a finished panel. Inconsistent totals are an error only
/// when `strict`.
pub fn check_panel(
    panel: &DataFrame,
    metrics: &[&str],
    strict: bool,
) -> EpipanelResult<Vec<ConsistencyReport>> {
    let duplicates = count_duplicate_entity_dates(panel, COL::STATE_AND_COUNTRY)?;
    if duplicates > 0 {
        return Err(EpipanelError::DuplicateEntityDate {
            key: COL::STATE_AND_COUNTRY.to_string(),
            duplicates,
        });
    }
    let reports = metrics
        .iter()
        .map(|metric| consistency_report(panel, COL::STATE_AND_COUNTRY, metric))
        .collect::<EpipanelResult<Vec<_>>>()?;
    if strict {
        reports.iter().try_for_each(ConsistencyReport::ensure)?;
    }
    Ok(reports)
}

/// Result of re-checking a previously written panel.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub rows: usize,
    pub duplicate_entity_dates: usize,
    pub consistency: Vec<ConsistencyReport>,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.duplicate_entity_dates == 0 && self.consistency.iter().all(|r| r.is_consistent())
    }
}

/// Re-checks a panel read back as text: metrics are discovered from the `daily_new_` columns.
pub fn verify(mut panel: DataFrame) -> EpipanelResult<Verification> {
    let dates = parse_date_column(&panel, COL::DATE).in_stage(Stage::Verify)?;
    panel.with_column(dates)?;

    let metrics = panel
        .get_column_names()
        .iter()
        .filter_map(|c| c.strip_prefix("daily_new_"))
        .map(str::to_string)
        .collect::<Vec<_>>();
    if metrics.is_empty() {
        return Err(EpipanelError::MissingColumn("daily_new_<metric>".into()).in_stage(Stage::Verify));
    }
    let casts = metrics
        .iter()
        .flat_map(|m| [COL::running_total(m), COL::daily_new(m)])
        .map(|c| col(&c).cast(DataType::Int64))
        .collect::<Vec<_>>();
    let panel = panel.lazy().with_columns(casts).collect()?;

    let duplicate_entity_dates =
        count_duplicate_entity_dates(&panel, COL::STATE_AND_COUNTRY).in_stage(Stage::Verify)?;
    let consistency = metrics
        .iter()
        .map(|m| consistency_report(&panel, COL::STATE_AND_COUNTRY, m))
        .collect::<EpipanelResult<Vec<_>>>()
        .in_stage(Stage::Verify)?;
    Ok(Verification {
        rows: panel.height(),
        duplicate_entity_dates,
        consistency,
    })
}
