//! Enrichment joiner: static per-entity attributes attached by key joins.

use log::{debug, info};
use polars::prelude::*;

use crate::checks::{assert_join_cardinality, require_columns};
use crate::entity::{apply_aliases, STATE_ALIASES};
use crate::error::EpipanelResult;
use crate::reference::ReferenceTables;
use crate::COL;

/// A country name that no code could be found for.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("No country code found for '{0}'")]
pub struct LookupError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryCodes {
    pub alpha_2: String,
    pub alpha_3: String,
}

/// Name to ISO 3166 code resolution.
pub trait CountryCodeLookup {
    fn lookup(&self, name: &str) -> Result<CountryCodes, LookupError>;
}

fn normalise_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lookup backed by the country code reference table. Known upstream spellings resolve through
/// [`COUNTRY_CODE_ALIASES`]; otherwise exact (case and whitespace insensitive) matches on name or
/// code win, then a reference name that contains, or is contained in, the query. A containment
/// match must be unique.
#[derive(Debug, Clone)]
pub struct ReferenceCountryCodes {
    entries: Vec<(String, CountryCodes)>,
}

/// Names shorter than this never take part in containment matches.
const MIN_PARTIAL_MATCH: usize = 4;

/// Upstream country labels that name no reference entry directly, with their alpha-3 code.
pub const COUNTRY_CODE_ALIASES: &[(&str, &str)] = &[
    ("Congo (Kinshasa)", "COD"),
    ("Congo (Brazzaville)", "COG"),
    ("South Korea", "KOR"),
    ("Taiwan*", "TWN"),
    ("Burma", "MMR"),
    ("Cote d'Ivoire", "CIV"),
    ("Holy See", "VAT"),
    ("Laos", "LAO"),
    ("Russia", "RUS"),
    ("Syria", "SYR"),
    ("Iran", "IRN"),
    ("Vietnam", "VNM"),
    ("Bolivia", "BOL"),
    ("Venezuela", "VEN"),
    ("Tanzania", "TZA"),
    ("Moldova", "MDA"),
    ("Brunei", "BRN"),
    ("West Bank and Gaza", "PSE"),
];

impl ReferenceCountryCodes {
    pub fn from_table(country_codes: &DataFrame) -> EpipanelResult<Self> {
        require_columns(country_codes, &[COL::COUNTRY_NAME, COL::ALPHA_2, COL::ALPHA_3])?;
        let text = |c: &str| country_codes.column(c)?.cast(&DataType::String);
        let (names, alpha_2, alpha_3) = (
            text(COL::COUNTRY_NAME)?,
            text(COL::ALPHA_2)?,
            text(COL::ALPHA_3)?,
        );
        let entries = itertools::izip!(names.str()?, alpha_2.str()?, alpha_3.str()?)
            .filter_map(|(name, alpha_2, alpha_3)| {
                Some((
                    normalise_name(name?),
                    CountryCodes {
                        alpha_2: alpha_2?.trim().to_string(),
                        alpha_3: alpha_3?.trim().to_string(),
                    },
                ))
            })
            .collect();
        Ok(Self { entries })
    }
}

impl CountryCodeLookup for ReferenceCountryCodes {
    fn lookup(&self, name: &str) -> Result<CountryCodes, LookupError> {
        let query = normalise_name(name);
        let by_code = |code: &str| {
            self.entries
                .iter()
                .find(|(_, codes)| codes.alpha_3.eq_ignore_ascii_case(code))
        };
        if let Some((_, code)) = COUNTRY_CODE_ALIASES
            .iter()
            .find(|(alias, _)| normalise_name(alias) == query)
        {
            return by_code(code)
                .map(|(_, codes)| codes.clone())
                .ok_or_else(|| LookupError(name.to_string()));
        }

        let exact = self.entries.iter().find(|(entry, codes)| {
            *entry == query
                || codes.alpha_2.eq_ignore_ascii_case(&query)
                || codes.alpha_3.eq_ignore_ascii_case(&query)
        });
        if let Some((_, codes)) = exact {
            return Ok(codes.clone());
        }

        let mut partial = self.entries.iter().filter(|(entry, _)| {
            entry.len() >= MIN_PARTIAL_MATCH
                && query.len() >= MIN_PARTIAL_MATCH
                && (entry.contains(&query) || query.contains(entry.as_str()))
        });
        match (partial.next(), partial.next()) {
            (Some((_, codes)), None) => Ok(codes.clone()),
            (Some(_), Some(_)) => {
                debug!("'{name}' matches several reference countries");
                Err(LookupError(name.to_string()))
            }
            _ => Err(LookupError(name.to_string())),
        }
    }
}

/// Attaches `country_code_2` and `country_code_3`. Countries the lookup cannot resolve keep null
/// codes.
pub fn add_country_codes(
    panel: DataFrame,
    lookup: &dyn CountryCodeLookup,
) -> EpipanelResult<DataFrame> {
    require_columns(&panel, &[COL::COUNTRY_OR_REGION])?;
    let countries = panel
        .column(COL::COUNTRY_OR_REGION)?
        .cast(&DataType::String)?
        .unique_stable()?;

    let (mut names, mut alpha_2, mut alpha_3) = (vec![], vec![], vec![]);
    let mut unresolved = 0;
    for country in countries.str()?.into_iter().flatten() {
        let codes = lookup
            .lookup(country)
            .map_err(|err| {
                debug!("{err}");
                unresolved += 1;
            })
            .ok();
        names.push(country.to_string());
        alpha_2.push(codes.as_ref().map(|c| c.alpha_2.clone()));
        alpha_3.push(codes.map(|c| c.alpha_3));
    }
    info!(
        "Resolved country codes for {} of {} countries",
        names.len() - unresolved,
        names.len()
    );

    let codes = DataFrame::new(vec![
        Series::new(COL::COUNTRY_OR_REGION, names),
        Series::new(COL::COUNTRY_CODE_2, alpha_2),
        Series::new(COL::COUNTRY_CODE_3, alpha_3),
    ])?;
    left_join(panel, codes.lazy(), &[COL::COUNTRY_OR_REGION], "country codes")
}

/// Left join with the driving row count checked afterwards.
fn left_join(
    panel: DataFrame,
    other: LazyFrame,
    on: &[&str],
    join: &str,
) -> EpipanelResult<DataFrame> {
    let before = panel.height();
    let on: Vec<Expr> = on.iter().map(|c| col(c)).collect();
    let joined = panel
        .lazy()
        .join(other, &on, &on, JoinArgs::new(JoinType::Left))
        .collect()?;
    assert_join_cardinality(join, before, joined.height())?;
    Ok(joined)
}

/// Reference rows with one row per key value.
fn unique_by(table: &DataFrame, key: &str, columns: Vec<Expr>) -> LazyFrame {
    table
        .clone()
        .lazy()
        .select(columns)
        .filter(col(key).is_not_null())
        .unique_stable(Some(vec![key.to_string()]), UniqueKeepStrategy::First)
}

pub fn add_country_population(
    panel: DataFrame,
    reference: &ReferenceTables,
) -> EpipanelResult<DataFrame> {
    let population = unique_by(
        &reference.country_population,
        COL::COUNTRY_CODE_3,
        vec![
            col(COL::COUNTRY_CODE_3).cast(DataType::String),
            col(COL::COUNTRY_POPULATION).cast(DataType::Int64),
        ],
    );
    left_join(panel, population, &[COL::COUNTRY_CODE_3], "country population")
}

pub fn add_country_median_age(
    panel: DataFrame,
    reference: &ReferenceTables,
) -> EpipanelResult<DataFrame> {
    let median_age = unique_by(
        &reference.median_age,
        COL::COUNTRY_CODE_3,
        vec![
            col(COL::COUNTRY_CODE_3).cast(DataType::String),
            col(COL::MEDIAN_YEARS)
                .cast(DataType::Float64)
                .alias(COL::COUNTRY_MEDIAN_AGE),
        ],
    );
    left_join(panel, median_age, &[COL::COUNTRY_CODE_3], "country median age")
}

/// Keys a per-state table by state code and by state name (with the state alias table applied),
/// so that it joins onto the province of either US feed. `name_column` holds the state name in
/// `table`.
fn keyed_by_state(
    reference: &ReferenceTables,
    table: &DataFrame,
    name_column: &str,
    values: &[&str],
) -> EpipanelResult<DataFrame> {
    let value_columns = || values.iter().map(|c| col(c)).collect::<Vec<_>>();
    let codes = reference
        .us_states
        .clone()
        .lazy()
        .select([
            col(COL::STATE_NAME).cast(DataType::String).alias("__state_name"),
            col(COL::STATE_CODE).cast(DataType::String).alias("__state_code"),
        ])
        .unique_stable(
            Some(vec!["__state_name".to_string()]),
            UniqueKeepStrategy::First,
        );

    let mut by_code_columns = vec![col("__state_code").alias(COL::PROVINCE_OR_STATE)];
    by_code_columns.extend(value_columns());
    let by_code = table
        .clone()
        .lazy()
        .with_column(col(name_column).cast(DataType::String))
        .join(
            codes,
            [col(name_column)],
            [col("__state_name")],
            JoinArgs::new(JoinType::Inner),
        )
        .select(by_code_columns);

    let mut by_name_columns = vec![col(name_column)
        .cast(DataType::String)
        .alias(COL::PROVINCE_OR_STATE)];
    by_name_columns.extend(value_columns());
    let mut by_name = table.clone().lazy().select(by_name_columns).collect()?;
    apply_aliases(&mut by_name, COL::PROVINCE_OR_STATE, STATE_ALIASES)?;

    Ok(concat([by_code, by_name.lazy()], UnionArgs::default())?
        .filter(col(COL::PROVINCE_OR_STATE).is_not_null())
        .unique_stable(
            Some(vec![COL::PROVINCE_OR_STATE.to_string()]),
            UniqueKeepStrategy::First,
        )
        .collect()?)
}

/// Fills null coordinates of `country` rows from the state reference table.
pub fn fill_us_state_coordinates(
    panel: DataFrame,
    reference: &ReferenceTables,
    country: &str,
) -> EpipanelResult<DataFrame> {
    require_columns(&panel, &[COL::COUNTRY_OR_REGION, COL::LATITUDE, COL::LONGITUDE])?;
    let columns = panel
        .get_column_names()
        .iter()
        .map(|c| col(c))
        .collect::<Vec<_>>();
    let states = reference
        .us_states
        .clone()
        .lazy()
        .with_columns([
            col(COL::LATITUDE).cast(DataType::Float64).alias("__state_latitude"),
            col(COL::LONGITUDE).cast(DataType::Float64).alias("__state_longitude"),
        ])
        .collect()?;
    let coordinates = keyed_by_state(
        reference,
        &states,
        COL::STATE_NAME,
        &["__state_latitude", "__state_longitude"],
    )?;

    let fill = |column: &str, state_column: &str| {
        when(
            col(COL::COUNTRY_OR_REGION)
                .eq(lit(country))
                .and(col(column).is_null()),
        )
        .then(col(state_column))
        .otherwise(col(column))
        .alias(column)
    };
    let joined = left_join(
        panel,
        coordinates.lazy(),
        &[COL::PROVINCE_OR_STATE],
        "state coordinates",
    )?;
    Ok(joined
        .lazy()
        .with_columns([
            fill(COL::LATITUDE, "__state_latitude"),
            fill(COL::LONGITUDE, "__state_longitude"),
        ])
        .select(columns)
        .collect()?)
}

/// Attaches the state population to `country` rows; null elsewhere.
pub fn add_us_state_population(
    panel: DataFrame,
    reference: &ReferenceTables,
    country: &str,
) -> EpipanelResult<DataFrame> {
    let population = reference
        .us_state_population
        .clone()
        .lazy()
        .with_column(col(COL::US_STATE_POPULATION).cast(DataType::Int64))
        .collect()?;
    let population = keyed_by_state(
        reference,
        &population,
        COL::US_STATE,
        &[COL::US_STATE_POPULATION],
    )?;
    Ok(left_join(
        panel,
        population.lazy(),
        &[COL::PROVINCE_OR_STATE],
        "state population",
    )?
    .lazy()
    .with_column(
        when(col(COL::COUNTRY_OR_REGION).eq(lit(country)))
            .then(col(COL::US_STATE_POPULATION))
            .otherwise(lit(Null {}).cast(DataType::Int64))
            .alias(COL::US_STATE_POPULATION),
    )
    .collect()?)
}

/// Per (country, date) sum of `metric`'s running total, repeated on every row of the country.
pub fn add_country_running_agg(panel: DataFrame, metric: &str) -> EpipanelResult<DataFrame> {
    let running = COL::running_total(metric);
    require_columns(&panel, &[COL::COUNTRY_OR_REGION, COL::DATE, &running])?;
    Ok(panel
        .lazy()
        .with_column(
            col(&running)
                .sum()
                .over([col(COL::COUNTRY_OR_REGION), col(COL::DATE)])
                .alias(COL::COUNTRY_RUNNING_AGG),
        )
        .collect()?)
}

/// Runs every enrichment step in order.
pub struct Enricher<'a> {
    pub reference: &'a ReferenceTables,
    pub lookup: &'a dyn CountryCodeLookup,
    pub us_country_label: &'a str,
    /// Metric summed into `country_running_agg`
    pub driving_metric: &'a str,
}

impl Enricher<'_> {
    pub fn apply(&self, panel: DataFrame) -> EpipanelResult<DataFrame> {
        let panel = add_country_codes(panel, self.lookup)?;
        let panel = add_country_population(panel, self.reference)?;
        let panel = add_country_median_age(panel, self.reference)?;
        let panel = fill_us_state_coordinates(panel, self.reference, self.us_country_label)?;
        let panel = add_us_state_population(panel, self.reference, self.us_country_label)?;
        add_country_running_agg(panel, self.driving_metric)
    }
}
