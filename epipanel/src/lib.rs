use log::debug;

use crate::config::{Config, UsFeed};
use crate::enrich::{CountryCodeLookup, ReferenceCountryCodes};
use crate::error::EpipanelResult;
use crate::pipeline::{assemble, InStage, Panel, RawFeeds, RunContext, Stage};
use crate::reference::ReferenceTables;
use crate::source::{fetch_csv, CsvSchema};

// Re-exports
pub use column_names as COL;

// Modules
pub mod aggregate;
pub mod checks;
pub mod column_names;
pub mod config;
pub mod delta;
pub mod enrich;
pub mod entity;
pub mod error;
#[cfg(feature = "formatters")]
pub mod formatters;
pub mod legacy;
pub mod merge;
pub mod pipeline;
pub mod rank;
pub mod reference;
pub mod reshape;
pub mod source;

/// Type for the panel builder: configuration plus the reference tables a run reads
pub struct Epipanel {
    pub reference: ReferenceTables,
    pub config: Config,
    pub lookup: Box<dyn CountryCodeLookup + Send + Sync>,
}

impl Epipanel {
    /// Setup the Epipanel object with default configuration
    pub fn new() -> EpipanelResult<Self> {
        Self::new_with_config(Config::default())
    }

    /// Setup the Epipanel object with custom configuration, loading the reference tables from
    /// `config.reference_dir`
    pub fn new_with_config(config: Config) -> EpipanelResult<Self> {
        debug!("config: {config:?}");
        let reference = ReferenceTables::from_dir(&config.reference_dir)?;
        let lookup = Box::new(ReferenceCountryCodes::from_table(&reference.country_codes)?);
        Ok(Self {
            reference,
            config,
            lookup,
        })
    }

    /// Fetches every feed the configuration needs. The first failure aborts.
    pub async fn fetch_feeds(&self) -> EpipanelResult<RawFeeds> {
        let mut global = vec![];
        for feed in &self.config.global_feeds {
            let wide = fetch_csv(&feed.url, CsvSchema::AllText)
                .await
                .in_stage(Stage::Fetch)?;
            global.push((feed.metric.clone(), wide));
        }
        let us = match self.config.us_feed {
            UsFeed::Nyt => Some(
                fetch_csv(&self.config.us_states_url, CsvSchema::AllText)
                    .await
                    .in_stage(Stage::Fetch)?,
            ),
            UsFeed::Reconciled => None,
        };
        Ok(RawFeeds { global, us })
    }

    /// Builds the panel from already fetched feeds
    pub fn build_panel(&self, raw: RawFeeds) -> EpipanelResult<Panel> {
        let ctx = RunContext::new(&self.config, &self.reference, self.lookup.as_ref());
        assemble(raw, ctx)
    }

    /// Fetches the feeds and builds the panel
    pub async fn run(&self) -> EpipanelResult<Panel> {
        let raw = self.fetch_feeds().await?;
        self.build_panel(raw)
    }
}
