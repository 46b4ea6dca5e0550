use std::collections::HashMap;
use std::path::Path;

use itertools::izip;
use log::info;
use polars::prelude::*;

use crate::checks::require_columns;
use crate::error::{EpipanelError, EpipanelResult};
use crate::source::{normalise_headers, read_csv_bytes, CsvSchema};
use crate::COL;

/// This module contains the names of the files that hold the reference tables.
pub mod paths {
    pub const US_STATES: &str = "ref_table_us_states.csv";
    pub const COUNTRY_POPULATION: &str = "ref_country_population.csv";
    pub const MEDIAN_AGE: &str = "ref_median_age_country.csv";
    pub const COUNTRY_CODES: &str = "ref_country_codes.csv";
    pub const US_STATE_POPULATION: &str = "ref_us_state_population.csv";
}
use paths as PATHS;

/// Static per-entity attributes, loaded once per run and only read afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTables {
    /// `state_code, state_name, latitude, longitude`
    pub us_states: DataFrame,
    /// `country_code_3, country_population_2018`
    pub country_population: DataFrame,
    /// `country_code_3, median_years`
    pub median_age: DataFrame,
    /// `name, alpha_2, alpha_3`
    pub country_codes: DataFrame,
    /// `state, us_state_pop_2019_estimate`
    pub us_state_population: DataFrame,
}

fn load_table(dir: &Path, file_name: &str, required: &[&str]) -> EpipanelResult<DataFrame> {
    let path = dir.join(file_name);
    info!("Attempting to load dataframe from {}", path.display());
    let bytes = std::fs::read(&path).map_err(|_| EpipanelError::MissingReferenceTable(path))?;
    let mut df = read_csv_bytes(bytes, CsvSchema::Inferred)?;
    normalise_headers(&mut df)?;
    require_columns(&df, required)?;
    Ok(df)
}

impl ReferenceTables {
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> EpipanelResult<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            us_states: load_table(
                dir,
                PATHS::US_STATES,
                &[COL::STATE_CODE, COL::STATE_NAME, COL::LATITUDE, COL::LONGITUDE],
            )?,
            country_population: load_table(
                dir,
                PATHS::COUNTRY_POPULATION,
                &[COL::COUNTRY_CODE_3, COL::COUNTRY_POPULATION],
            )?,
            median_age: load_table(
                dir,
                PATHS::MEDIAN_AGE,
                &[COL::COUNTRY_CODE_3, COL::MEDIAN_YEARS],
            )?,
            country_codes: load_table(
                dir,
                PATHS::COUNTRY_CODES,
                &[COL::COUNTRY_NAME, COL::ALPHA_2, COL::ALPHA_3],
            )?,
            us_state_population: load_table(
                dir,
                PATHS::US_STATE_POPULATION,
                &[COL::US_STATE, COL::US_STATE_POPULATION],
            )?,
        })
    }

    /// State name to state code, e.g. "New York" to "NY".
    pub fn state_codes_by_name(&self) -> EpipanelResult<HashMap<String, String>> {
        let names = self.us_states.column(COL::STATE_NAME)?.cast(&DataType::String)?;
        let codes = self.us_states.column(COL::STATE_CODE)?.cast(&DataType::String)?;
        Ok(izip!(names.str()?, codes.str()?)
            .filter_map(|(name, code)| Some((name?.trim().to_string(), code?.trim().to_string())))
            .collect())
    }
}
