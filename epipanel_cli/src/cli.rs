use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{command, Args, Parser, Subcommand};
use enum_dispatch::enum_dispatch;
use epipanel::{
    aggregate::country_totals,
    config::{Config, UsFeed},
    formatters::{CSVFormatter, JsonLinesFormatter, OutputFormatter, OutputGenerator},
    pipeline::verify,
    source::{fetch_csv, CsvSchema},
    Epipanel,
};
use log::{debug, info};
use polars::frame::DataFrame;
use serde::{Deserialize, Serialize};
use spinners::{Spinner, Spinners, Stream};
use strum_macros::EnumString;

use crate::display::{consistency_table, display_verification, run_log_table};
use crate::error::{EpipanelCliError, EpipanelCliResult};

const DEFAULT_PROGRESS_SPINNER: Spinners = Spinners::Dots;
const COMPLETE_PROGRESS_STRING: &str = "✔";
const RUNNING_TAIL_STRING: &str = "...";

/// Defines the output formats we are able to produce the panel in.
#[derive(Clone, Debug, Deserialize, Serialize, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum OutputFormat {
    Csv,
    #[strum(serialize = "jsonl", serialize = "jsonlines")]
    JsonLines,
}

impl From<&OutputFormat> for OutputFormatter {
    fn from(value: &OutputFormat) -> Self {
        match value {
            OutputFormat::Csv => OutputFormatter::Csv(CSVFormatter),
            OutputFormat::JsonLines => OutputFormatter::JsonLines(JsonLinesFormatter),
        }
    }
}

fn write_output<T, U>(
    output_generator: T,
    mut data: DataFrame,
    output_file: Option<U>,
) -> EpipanelCliResult<()>
where
    T: OutputGenerator,
    U: AsRef<Path>,
{
    if let Some(output_file) = output_file {
        let mut f = File::create(output_file).context("Failed to write output")?;
        output_generator.save(&mut f, &mut data)?;
    } else {
        let mut stdout_lock = std::io::stdout().lock();
        output_generator.save(&mut stdout_lock, &mut data)?;
    };
    Ok(())
}

/// Progress goes to stderr so that a panel written to stdout stays clean.
fn start_spinner(quiet: bool, message: &str) -> Option<Spinner> {
    (!quiet).then(|| {
        Spinner::with_timer_and_stream(
            DEFAULT_PROGRESS_SPINNER,
            message.to_string() + RUNNING_TAIL_STRING,
            Stream::Stderr,
        )
    })
}

fn stop_spinner(spinner: Option<Spinner>) {
    if let Some(mut s) = spinner {
        s.stop_with_symbol(COMPLETE_PROGRESS_STRING);
    }
}

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    async fn run(&self, config: Config) -> EpipanelCliResult<()>;
}

/// The `panel` command fetches the feeds, builds the panel and writes it out.
#[derive(Args, Debug)]
pub struct PanelCommand {
    #[arg(
        short = 'f',
        long,
        value_name = "csv|jsonl",
        default_value = "csv",
        help = "Output format for the panel"
    )]
    output_format: OutputFormat,
    #[arg(short = 'o', long, help = "Output file to place the panel (stdout when absent)")]
    output_file: Option<String>,
    #[arg(
        long,
        value_name = "reconciled|nyt",
        help = "Source of the US rows: the reconciled global feed or the per-state feed"
    )]
    us_feed: Option<UsFeed>,
    #[arg(long, help = "Directory holding the reference tables")]
    reference_dir: Option<PathBuf>,
    #[arg(long, help = "Also write country-day totals as CSV to this file")]
    country_totals: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = false,
        help = "Report inconsistent totals instead of aborting"
    )]
    lenient: bool,
    #[arg(long, default_value_t = false, help = "Print the run log and checks to stderr")]
    summary: bool,
    #[arg(from_global)]
    quiet: bool,
}

impl PanelCommand {
    fn apply_overrides(&self, mut config: Config) -> Config {
        if let Some(us_feed) = self.us_feed {
            config.us_feed = us_feed;
        }
        if let Some(reference_dir) = &self.reference_dir {
            config.reference_dir = reference_dir.clone();
        }
        if self.lenient {
            config.strict_consistency = false;
        }
        config
    }
}

impl RunCommand for PanelCommand {
    async fn run(&self, config: Config) -> EpipanelCliResult<()> {
        info!("Running `panel` subcommand");
        let config = self.apply_overrides(config);
        let epipanel = Epipanel::new_with_config(config)?;

        let sp = start_spinner(self.quiet, "Fetching feeds");
        let raw = epipanel.fetch_feeds().await?;
        stop_spinner(sp);

        let sp = start_spinner(self.quiet, "Building panel");
        let panel = epipanel.build_panel(raw)?;
        stop_spinner(sp);
        debug!("{:#?}", panel.data);

        if let Some(totals_file) = &self.country_totals {
            let totals = country_totals(&panel.data, &epipanel.config.metrics())?;
            write_output(CSVFormatter, totals, Some(totals_file))?;
        }
        if self.summary {
            eprintln!("{}", run_log_table(&panel.log));
            eprintln!("{}", consistency_table(&panel.consistency));
        }
        let formatter: OutputFormatter = (&self.output_format).into();
        write_output(formatter, panel.data, self.output_file.as_deref())?;
        Ok(())
    }
}

/// The `verify` command re-checks a panel file for duplicate (entity, date) rows and for
/// daily new counts that do not add up to the running totals.
#[derive(Args, Debug)]
pub struct VerifyCommand {
    #[arg(index = 1, help = "Panel CSV to check")]
    panel_file: String,
    #[arg(long, default_value_t = false, help = "Print the result as JSON")]
    json: bool,
}

impl RunCommand for VerifyCommand {
    async fn run(&self, _config: Config) -> EpipanelCliResult<()> {
        info!("Running `verify` subcommand");
        let panel = fetch_csv(&self.panel_file, CsvSchema::AllText).await?;
        let verification = verify(panel)?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&verification)?);
        } else {
            display_verification(&verification);
        }
        if verification.passed() {
            Ok(())
        } else {
            Err(EpipanelCliError::CheckFailed(format!(
                "{} does not pass the panel checks",
                self.panel_file
            )))
        }
    }
}

/// The `config` command prints the effective configuration.
#[derive(Args, Debug)]
pub struct ConfigCommand;

impl RunCommand for ConfigCommand {
    async fn run(&self, config: Config) -> EpipanelCliResult<()> {
        println!("{}", toml::to_string(&config)?);
        Ok(())
    }
}

/// The entrypoint for the CLI.
#[derive(Parser, Debug)]
#[command(version, about="Epipanel builds a daily per-entity case and death panel from upstream feeds", long_about = None, name="epipanel")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    #[arg(
        short = 'q',
        long = "quiet",
        help = "\
            Do not print progress spinners. Results and logs (when `RUST_LOG`\n\
            is set) will still be printed.",
        global = true
    )]
    quiet: bool,
}

/// Commands contains the list of subcommands avaliable for use in the CLI.
/// Each command implements the RunCommand trait.
#[derive(Subcommand, Debug)]
#[enum_dispatch(RunCommand)]
pub enum Commands {
    /// Fetch the feeds, build the panel and write it out
    Panel(PanelCommand),
    /// Check an existing panel file
    Verify(VerifyCommand),
    /// Print the effective configuration as TOML
    Config(ConfigCommand),
}
