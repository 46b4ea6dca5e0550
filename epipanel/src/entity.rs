//! Entity key normalisation. Identifying fields never reach key construction as null or blank,
//! and a small fixed table maps historical name variants onto one spelling. Downstream joins rely
//! on exact key equality, so there is no fuzzy matching here.

use log::debug;
use polars::prelude::*;

use crate::checks::require_columns;
use crate::error::EpipanelResult;
use crate::COL;

/// Replacement for a missing or blank identifying field.
pub const NOT_PROVIDED: &str = "Not Provided";

/// Literal joining the components of a composite key.
pub const KEY_SEPARATOR: &str = "-";

/// Country name variants mapped onto the canonical spelling.
pub const COUNTRY_ALIASES: &[(&str, &str)] = &[("Korea, South", "South Korea")];

/// US state name variants mapped onto the spelling used by the per-state feed.
pub const STATE_ALIASES: &[(&str, &str)] = &[("District of Columbia", "Washington DC")];

/// Rewrites every value of `column` through `f`, treating the column as text.
fn map_text_column<F>(df: &mut DataFrame, column: &str, f: F) -> EpipanelResult<()>
where
    F: Fn(Option<&str>) -> String,
{
    let text = df.column(column)?.cast(&DataType::String)?;
    let values: Vec<String> = text.str()?.into_iter().map(f).collect();
    df.with_column(Series::new(column, values))?;
    Ok(())
}

pub fn fill_not_provided(df: &mut DataFrame, column: &str) -> EpipanelResult<()> {
    map_text_column(df, column, |value| match value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => NOT_PROVIDED.to_string(),
    })
}

/// Replaces exact matches of an alias with its canonical spelling. Null values stay null.
pub fn apply_aliases(
    df: &mut DataFrame,
    column: &str,
    aliases: &[(&str, &str)],
) -> EpipanelResult<()> {
    let text = df.column(column)?.cast(&DataType::String)?;
    let values: Vec<Option<String>> = text
        .str()?
        .into_iter()
        .map(|value| {
            value.map(|value| {
                aliases
                    .iter()
                    .find(|(alias, _)| *alias == value)
                    .map_or(value, |&(_, canonical)| canonical)
                    .to_string()
            })
        })
        .collect();
    df.with_column(Series::new(column, values))?;
    Ok(())
}

/// Builds the composite key `key` by joining `components` with [`KEY_SEPARATOR`].
///
/// Components should be filled first; a null component is written as [`NOT_PROVIDED`].
pub fn with_composite_key(
    df: &mut DataFrame,
    components: &[&str],
    key: &str,
) -> EpipanelResult<()> {
    require_columns(df, components)?;
    let columns = components
        .iter()
        .map(|c| df.column(c)?.cast(&DataType::String))
        .collect::<PolarsResult<Vec<Series>>>()?;
    let columns = columns
        .iter()
        .map(|s| s.str())
        .collect::<PolarsResult<Vec<_>>>()?;

    let keys: Vec<String> = (0..df.height())
        .map(|idx| {
            columns
                .iter()
                .map(|c| c.get(idx).unwrap_or(NOT_PROVIDED))
                .collect::<Vec<_>>()
                .join(KEY_SEPARATOR)
        })
        .collect();
    df.with_column(Series::new(key, keys))?;
    Ok(())
}

/// Fills the province and country fields, applies the country alias table and adds the
/// `state_and_country` key.
pub fn normalise(mut df: DataFrame) -> EpipanelResult<DataFrame> {
    require_columns(&df, &[COL::PROVINCE_OR_STATE, COL::COUNTRY_OR_REGION])?;
    fill_not_provided(&mut df, COL::PROVINCE_OR_STATE)?;
    fill_not_provided(&mut df, COL::COUNTRY_OR_REGION)?;
    apply_aliases(&mut df, COL::COUNTRY_OR_REGION, COUNTRY_ALIASES)?;
    with_composite_key(
        &mut df,
        &[COL::PROVINCE_OR_STATE, COL::COUNTRY_OR_REGION],
        COL::STATE_AND_COUNTRY,
    )?;
    debug!("Normalised entity keys for {} rows", df.height());
    Ok(df)
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;

    fn strings(df: &DataFrame, column: &str) -> Vec<String> {
        df.column(column)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap_or("<null>").to_string())
            .collect()
    }

    #[test]
    fn blank_and_null_fields_become_not_provided() {
        let df = df!(
            COL::PROVINCE_OR_STATE => &[Some(""), None, Some("  "), Some("Ontario")],
            COL::COUNTRY_OR_REGION => &["US", "France", "Korea, South", "Canada"]
        )
        .unwrap();
        let df = normalise(df).unwrap();
        assert_eq!(
            strings(&df, COL::STATE_AND_COUNTRY),
            vec![
                "Not Provided-US",
                "Not Provided-France",
                "Not Provided-South Korea",
                "Ontario-Canada"
            ]
        );
        assert!(!strings(&df, COL::PROVINCE_OR_STATE).contains(&"<null>".to_string()));
    }

    #[test]
    fn aliases_match_exactly() {
        let mut df = df!(
            COL::PROVINCE_OR_STATE => &[Some("District of Columbia"), Some("district of columbia"), None]
        )
        .unwrap();
        apply_aliases(&mut df, COL::PROVINCE_OR_STATE, STATE_ALIASES).unwrap();
        assert_eq!(
            strings(&df, COL::PROVINCE_OR_STATE),
            vec!["Washington DC", "district of columbia", "<null>"]
        );
    }

    #[test]
    fn keys_take_any_number_of_components() {
        let mut df = df!(
            "county" => &["Kings"],
            COL::PROVINCE_OR_STATE => &["New York"],
            COL::COUNTRY_OR_REGION => &["US"]
        )
        .unwrap();
        with_composite_key(
            &mut df,
            &["county", COL::PROVINCE_OR_STATE, COL::COUNTRY_OR_REGION],
            "county_key",
        )
        .unwrap();
        assert_eq!(strings(&df, "county_key"), vec!["Kings-New York-US"]);
    }
}
