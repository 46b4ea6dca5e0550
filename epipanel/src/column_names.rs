//! This module stores the column names of the panel and of the reference tables it is joined
//! against. The output file is written with these names, so they double as the published schema.

pub const PROVINCE_OR_STATE: &str = "province_or_state";
pub const COUNTRY_OR_REGION: &str = "country_or_region";
pub const STATE_AND_COUNTRY: &str = "state_and_country";
pub const DATE: &str = "date";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const DATA_SOURCE: &str = "data_source";

pub const COUNTRY_CODE_2: &str = "country_code_2";
pub const COUNTRY_CODE_3: &str = "country_code_3";
pub const COUNTRY_POPULATION: &str = "country_population_2018";
pub const COUNTRY_MEDIAN_AGE: &str = "country_median_age";
pub const COUNTRY_RUNNING_AGG: &str = "country_running_agg";
pub const US_STATE_POPULATION: &str = "us_state_pop_2019_estimate";

// Reference table columns
pub const STATE_CODE: &str = "state_code";
pub const STATE_NAME: &str = "state_name";
pub const MEDIAN_YEARS: &str = "median_years";
pub const US_STATE: &str = "state";
pub const COUNTRY_NAME: &str = "name";
pub const ALPHA_2: &str = "alpha_2";
pub const ALPHA_3: &str = "alpha_3";

/// Cumulative value of `metric` as of the row's date.
pub fn running_total(metric: &str) -> String {
    format!("running_total_{metric}")
}

/// Cumulative value of `metric` recorded one calendar day earlier (zero when absent).
pub fn prev_day(metric: &str) -> String {
    format!("running_total_{metric}_prev_day")
}

pub fn daily_new(metric: &str) -> String {
    format!("daily_new_{metric}")
}

/// The three columns the delta engine leaves behind for a metric, in output order.
pub fn metric_columns(metric: &str) -> [String; 3] {
    [daily_new(metric), running_total(metric), prev_day(metric)]
}
