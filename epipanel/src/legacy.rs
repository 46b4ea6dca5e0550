//! Reconciliation of the US locality format change.
//!
//! Before the cutover the US rows carry free text localities ("New York City, NY"); afterwards
//! they carry state names. Both segments are resolved to a canonical state label, aggregated to
//! (state, date) independently and spliced back in place of the original US rows.

use std::collections::HashMap;

use chrono::NaiveDate;
use log::{debug, info};
use nonempty::NonEmpty;
use polars::prelude::*;

use crate::checks::require_columns;
use crate::entity::with_composite_key;
use crate::error::EpipanelResult;
use crate::merge::align_to;
use crate::COL;

/// Spellings of the national capital that all map to one label.
const CAPITAL_SPELLINGS: &[&str] = &["District of Columbia", "Washington DC"];
const CAPITAL: &str = "DC";

/// One way of turning a locality into a state label.
pub trait StateResolver {
    fn name(&self) -> &'static str;
    fn resolve(&self, locality: &str) -> Option<String>;
}

/// Exact match of the whole locality against the reference state names.
pub struct ReferenceStateName {
    codes_by_name: HashMap<String, String>,
}

impl ReferenceStateName {
    pub fn new(codes_by_name: HashMap<String, String>) -> Self {
        Self { codes_by_name }
    }
}

impl StateResolver for ReferenceStateName {
    fn name(&self) -> &'static str {
        "reference state name"
    }

    fn resolve(&self, locality: &str) -> Option<String> {
        self.codes_by_name.get(locality.trim()).cloned()
    }
}

/// The trimmed text after the first comma, e.g. "NY" in "New York City, NY".
pub struct StateFragment;

impl StateResolver for StateFragment {
    fn name(&self) -> &'static str {
        "state fragment"
    }

    fn resolve(&self, locality: &str) -> Option<String> {
        locality
            .split_once(',')
            .map(|(_, fragment)| fragment.trim())
            .filter(|fragment| !fragment.is_empty())
            .map(str::to_string)
    }
}

/// The locality itself. Keeps pseudo-states such as cruise ships as their own entities.
pub struct Verbatim;

impl StateResolver for Verbatim {
    fn name(&self) -> &'static str {
        "verbatim"
    }

    fn resolve(&self, locality: &str) -> Option<String> {
        Some(locality.trim().to_string())
    }
}

/// Ordered list of resolvers; the first one returning a value wins.
pub struct StateResolution {
    strategies: NonEmpty<Box<dyn StateResolver + Send + Sync>>,
}

impl StateResolution {
    pub fn new(strategies: NonEmpty<Box<dyn StateResolver + Send + Sync>>) -> Self {
        Self { strategies }
    }

    /// Reference name, then state fragment, then the locality verbatim.
    pub fn standard(codes_by_name: HashMap<String, String>) -> Self {
        Self::new(NonEmpty {
            head: Box::new(ReferenceStateName::new(codes_by_name)),
            tail: vec![Box::new(StateFragment), Box::new(Verbatim)],
        })
    }

    pub fn resolve(&self, locality: &str) -> Option<String> {
        self.strategies.iter().find_map(|strategy| {
            let resolved = strategy.resolve(locality);
            if let Some(state) = &resolved {
                debug!("'{locality}' resolved to '{state}' by {}", strategy.name());
            }
            resolved
        })
    }

    /// Resolved and canonicalised state label. Falls back to the locality when no strategy
    /// applies.
    pub fn canonical_state(&self, locality: &str) -> String {
        let state = self
            .resolve(locality)
            .unwrap_or_else(|| locality.to_string())
            .replace('.', "");
        if CAPITAL_SPELLINGS.contains(&state.as_str()) {
            CAPITAL.to_string()
        } else {
            state
        }
    }
}

pub struct LegacyReconciler<'a> {
    pub resolution: &'a StateResolution,
    /// Last day of the legacy segment (inclusive)
    pub cutover: NaiveDate,
    pub country: &'a str,
}

impl LegacyReconciler<'_> {
    /// Replaces the rows of `country` in a normalised long panel with their reconciled,
    /// state-level series. `running_totals` are summed per (state, date). Other rows and the
    /// column layout are unchanged; coordinates of reconciled rows are left null.
    pub fn reconcile(
        &self,
        panel: DataFrame,
        running_totals: &[&str],
    ) -> EpipanelResult<DataFrame> {
        let mut required = vec![COL::PROVINCE_OR_STATE, COL::COUNTRY_OR_REGION, COL::DATE];
        required.extend_from_slice(running_totals);
        require_columns(&panel, &required)?;

        let in_country = col(COL::COUNTRY_OR_REGION).eq(lit(self.country));
        let mut country_rows = panel.clone().lazy().filter(in_country.clone()).collect()?;
        if country_rows.height() == 0 {
            debug!("No rows for '{}', nothing to reconcile", self.country);
            return Ok(panel);
        }
        let others = panel.clone().lazy().filter(in_country.not());

        let states: Vec<String> = country_rows
            .column(COL::PROVINCE_OR_STATE)?
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|locality| self.resolution.canonical_state(locality.unwrap_or_default()))
            .collect();
        country_rows.with_column(Series::new(COL::PROVINCE_OR_STATE, states))?;

        let sums: Vec<Expr> = running_totals.iter().map(|c| col(c).sum()).collect();
        let segment = |in_segment: Expr| {
            country_rows
                .clone()
                .lazy()
                .filter(in_segment)
                .group_by([col(COL::PROVINCE_OR_STATE), col(COL::DATE)])
                .agg(sums.clone())
        };
        let cutover = lit(self.cutover).cast(DataType::Date);
        let legacy = segment(col(COL::DATE).lt_eq(cutover.clone()));
        let current = segment(col(COL::DATE).gt(cutover));

        let mut columns = vec![
            col(COL::PROVINCE_OR_STATE),
            lit(self.country).alias(COL::COUNTRY_OR_REGION),
            lit(Null {}).cast(DataType::Float64).alias(COL::LATITUDE),
            lit(Null {}).cast(DataType::Float64).alias(COL::LONGITUDE),
            col(COL::DATE),
        ];
        columns.extend(running_totals.iter().map(|c| col(c)));
        let mut reconciled = concat([legacy, current], UnionArgs::default())?
            .select(columns)
            .collect()?;
        with_composite_key(
            &mut reconciled,
            &[COL::PROVINCE_OR_STATE, COL::COUNTRY_OR_REGION],
            COL::STATE_AND_COUNTRY,
        )?;
        info!(
            "Reconciled {} '{}' rows into {} state-level rows",
            country_rows.height(),
            self.country,
            reconciled.height()
        );

        Ok(concat([others, align_to(reconciled, &panel)], UnionArgs::default())?.collect()?)
    }
}
