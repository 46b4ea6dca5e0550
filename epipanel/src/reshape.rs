use chrono::NaiveDate;
use log::{debug, info};
use polars::prelude::*;

use crate::checks::require_columns;
use crate::error::{EpipanelError, EpipanelResult};
use crate::COL;

/// Accepted date header formats of the wide matrix, tried in order. Two digit years go first so
/// that "3/8/20" is never read as the year 20.
pub const DATE_HEADER_FORMATS: [&str; 3] = ["%m/%d/%y", "%m/%d/%Y", "%Y-%m-%d"];

pub fn parse_date_header(header: &str) -> Option<NaiveDate> {
    let header = header.trim();
    DATE_HEADER_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(header, format).ok())
}

/// Parses every value of `column` as a calendar day, failing on the first value that is not one.
pub fn parse_date_column(df: &DataFrame, column: &str) -> EpipanelResult<Series> {
    let values = df.column(column)?.cast(&DataType::String)?;
    let dates = values
        .str()?
        .into_iter()
        .map(|value| {
            let value = value.unwrap_or_default();
            parse_date_header(value).ok_or_else(|| EpipanelError::UnparseableDate {
                column: column.to_string(),
                value: value.to_string(),
            })
        })
        .collect::<EpipanelResult<Vec<NaiveDate>>>()?;
    Ok(Series::new(column, dates))
}

/// Converts a wide cumulative matrix (one row per entity, one column per date) into long rows of
/// `identifiers`, `date` and `value_column`.
///
/// Every header that is not one of `identifiers` must parse as a date. Duplicate entity rows in
/// the matrix are kept and surface as duplicate long rows.
pub fn wide_to_long(
    wide: &DataFrame,
    identifiers: &[&str],
    value_column: &str,
) -> EpipanelResult<DataFrame> {
    require_columns(wide, identifiers)?;

    let mut date_columns = vec![];
    for header in wide.get_column_names() {
        if identifiers.contains(&header) {
            continue;
        }
        let date = parse_date_header(header)
            .ok_or_else(|| EpipanelError::UnparseableHeader(header.to_string()))?;
        date_columns.push((header, date));
    }
    if date_columns.is_empty() {
        return Err(EpipanelError::NoDateColumns);
    }
    debug!(
        "Reshaping {} entities over {} dates",
        wide.height(),
        date_columns.len()
    );

    let frames = date_columns
        .iter()
        .map(|(header, date)| {
            let mut columns: Vec<Expr> = identifiers.iter().map(|c| col(c)).collect();
            // Date literals are datetimes until cast
            columns.push(lit(*date).cast(DataType::Date).alias(COL::DATE));
            columns.push(col(header).cast(DataType::Int64).alias(value_column));
            wide.clone().lazy().select(columns)
        })
        .collect::<Vec<_>>();
    let long = concat(frames, UnionArgs::default())?.collect()?;

    info!("Reshaped wide matrix into {} long rows", long.height());
    Ok(long)
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;

    fn d(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, month, day).unwrap()
    }

    #[test]
    fn date_headers_in_all_formats() {
        assert_eq!(parse_date_header("3/8/20"), Some(d(3, 8)));
        assert_eq!(parse_date_header("03/08/2020"), Some(d(3, 8)));
        assert_eq!(parse_date_header("2020-03-08"), Some(d(3, 8)));
        assert_eq!(parse_date_header("lat"), None);
    }

    #[test]
    fn single_entity_matrix_becomes_one_row_per_date() {
        let wide = df!(
            COL::PROVINCE_OR_STATE => &[""],
            COL::COUNTRY_OR_REGION => &["US"],
            "3/8/20" => &[5i64],
            "3/9/20" => &[5i64],
            "3/10/20" => &[8i64]
        )
        .unwrap();
        let long = wide_to_long(
            &wide,
            &[COL::PROVINCE_OR_STATE, COL::COUNTRY_OR_REGION],
            "running_total_cases",
        )
        .unwrap()
        .sort([COL::DATE], SortMultipleOptions::default())
        .unwrap();

        assert_eq!(long.height(), 3);
        assert_eq!(
            long.get_column_names(),
            vec![
                COL::PROVINCE_OR_STATE,
                COL::COUNTRY_OR_REGION,
                COL::DATE,
                "running_total_cases"
            ]
        );
        assert_eq!(long.column(COL::DATE).unwrap().dtype(), &DataType::Date);
        let dates: Vec<_> = long
            .column(COL::DATE)
            .unwrap()
            .date()
            .unwrap()
            .as_date_iter()
            .collect();
        assert_eq!(dates, vec![Some(d(3, 8)), Some(d(3, 9)), Some(d(3, 10))]);
        let values: Vec<_> = long
            .column("running_total_cases")
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(values, vec![5, 5, 8]);
    }

    #[test]
    fn long_rows_join_against_the_previous_day() {
        let wide = df!(
            COL::PROVINCE_OR_STATE => &[""],
            COL::COUNTRY_OR_REGION => &["US"],
            "3/8/20" => &[5i64],
            "3/9/20" => &[5i64],
            "3/10/20" => &[8i64]
        )
        .unwrap();
        let long = wide_to_long(
            &wide,
            &[COL::PROVINCE_OR_STATE, COL::COUNTRY_OR_REGION],
            "running_total_cases",
        )
        .unwrap();
        let long = crate::entity::normalise(long).unwrap();
        let with_daily = crate::delta::add_daily_fields(long, COL::STATE_AND_COUNTRY, "cases")
            .unwrap()
            .sort([COL::DATE], SortMultipleOptions::default())
            .unwrap();
        let daily: Vec<_> = with_daily
            .column("daily_new_cases")
            .unwrap()
            .i64()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(daily, vec![5, 0, 3]);
    }

    #[test]
    fn text_values_are_cast_to_integers() {
        let wide = df!(
            COL::COUNTRY_OR_REGION => &["France"],
            "2020-03-08" => &["12"]
        )
        .unwrap();
        let long = wide_to_long(&wide, &[COL::COUNTRY_OR_REGION], "running_total_cases").unwrap();
        assert_eq!(
            long.column("running_total_cases")
                .unwrap()
                .i64()
                .unwrap()
                .get(0),
            Some(12)
        );
    }

    #[test]
    fn undeclared_non_date_header_is_rejected() {
        let wide = df!(
            COL::COUNTRY_OR_REGION => &["France"],
            "admin2" => &["Paris"],
            "3/8/20" => &[1i64]
        )
        .unwrap();
        let err = wide_to_long(&wide, &[COL::COUNTRY_OR_REGION], "running_total_cases");
        assert!(matches!(err, Err(EpipanelError::UnparseableHeader(h)) if h == "admin2"));
    }

    #[test]
    fn missing_identifier_and_missing_dates_are_schema_errors() {
        let wide = df!(COL::COUNTRY_OR_REGION => &["France"]).unwrap();
        assert!(matches!(
            wide_to_long(&wide, &[COL::COUNTRY_OR_REGION], "running_total_cases"),
            Err(EpipanelError::NoDateColumns)
        ));
        assert!(matches!(
            wide_to_long(
                &wide,
                &[COL::PROVINCE_OR_STATE, COL::COUNTRY_OR_REGION],
                "running_total_cases"
            ),
            Err(EpipanelError::MissingColumn(_))
        ));
    }

    #[test]
    fn duplicate_entities_are_not_collapsed() {
        let wide = df!(
            COL::COUNTRY_OR_REGION => &["France", "France"],
            "3/8/20" => &[1i64, 2],
            "3/9/20" => &[3i64, 4]
        )
        .unwrap();
        let long = wide_to_long(&wide, &[COL::COUNTRY_OR_REGION], "running_total_cases").unwrap();
        assert_eq!(long.height(), 4);
    }

    #[test]
    fn date_column_parsing_reports_the_bad_value() {
        let df = df!(COL::DATE => &["2020-03-08", "yesterday"]).unwrap();
        let err = parse_date_column(&df, COL::DATE).unwrap_err();
        assert!(
            matches!(err, EpipanelError::UnparseableDate { value, .. } if value == "yesterday")
        );
    }
}
