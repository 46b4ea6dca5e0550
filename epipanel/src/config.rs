use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::COL;

const JHU_TIME_SERIES: &str = "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub us_feed: UsFeed,
    /// Long per-US-state feed with one column per metric
    pub us_states_url: String,
    pub reference_dir: PathBuf,
    pub us_country_label: String,
    /// Last day of the legacy US locality format (inclusive)
    pub cutover_date: NaiveDate,
    pub strict_consistency: bool,
    // Tables last so the config serialises to TOML
    /// Wide cumulative matrices, one per metric. The first metric drives the merged panel.
    pub global_feeds: Vec<MetricFeed>,
    pub ranks: Vec<RankSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            us_feed: UsFeed::Reconciled,
            us_states_url:
                "https://raw.githubusercontent.com/nytimes/covid-19-data/master/us-states.csv"
                    .into(),
            reference_dir: PathBuf::from("ref_data"),
            us_country_label: "US".into(),
            // Unwrap: constant date is valid
            cutover_date: NaiveDate::from_ymd_opt(2020, 3, 9).unwrap(),
            strict_consistency: true,
            global_feeds: vec![
                MetricFeed {
                    metric: "cases".into(),
                    url: format!("{JHU_TIME_SERIES}/time_series_covid19_confirmed_global.csv"),
                },
                MetricFeed {
                    metric: "deaths".into(),
                    url: format!("{JHU_TIME_SERIES}/time_series_covid19_deaths_global.csv"),
                },
            ],
            ranks: RankSpec::defaults("cases"),
        }
    }
}

impl Config {
    /// Metric names in feed order
    pub fn metrics(&self) -> Vec<&str> {
        self.global_feeds.iter().map(|f| f.metric.as_str()).collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricFeed {
    pub metric: String,
    pub url: String,
}

/// Where the US sub-population of the panel comes from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum UsFeed {
    /// US rows of the global feed, reconciled across the locality format change
    Reconciled,
    /// US rows replaced by the per-state long feed
    Nyt,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RankGroup {
    /// Rank per composite entity key
    Entity,
    /// Rank per country, computed across all of its entities
    Country,
}

impl RankGroup {
    pub fn column(&self) -> &'static str {
        match self {
            RankGroup::Entity => COL::STATE_AND_COUNTRY,
            RankGroup::Country => COL::COUNTRY_OR_REGION,
        }
    }
}

/// "Days since `threshold` cumulative `metric`" for each `group`, written to `column`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RankSpec {
    pub column: String,
    pub metric: String,
    pub group: RankGroup,
    pub threshold: i64,
}

impl RankSpec {
    pub fn defaults(metric: &str) -> Vec<Self> {
        let spec = |column: &str, group, threshold| RankSpec {
            column: column.into(),
            metric: metric.into(),
            group,
            threshold,
        };
        vec![
            spec("first_case_state_rank", RankGroup::Entity, 5),
            spec("first_case_country_rank", RankGroup::Country, 5),
            spec("hundred_case_state_rank", RankGroup::Entity, 100),
            spec("hundred_case_country_rank", RankGroup::Country, 100),
        ]
    }
}
