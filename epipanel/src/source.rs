//! Fetching upstream CSV feeds and shaping them into the column layout the core expects.

use std::io::Cursor;

use log::{debug, info};
use polars::prelude::*;

use crate::checks::require_columns;
use crate::error::{EpipanelError, EpipanelResult};
use crate::reshape::parse_date_column;
use crate::COL;

/// How column types are decided when reading a CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvSchema {
    /// Every column is read as text and cast later
    AllText,
    /// Types are inferred from the whole file
    Inferred,
}

fn fetch_failed(location: &str, reason: impl ToString) -> EpipanelError {
    EpipanelError::FetchFailed {
        location: location.to_string(),
        reason: reason.to_string(),
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

async fn fetch_remote(url: &str) -> EpipanelResult<Vec<u8>> {
    let response = reqwest::get(url)
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|err| fetch_failed(url, err))?;
    let bytes = response.bytes().await.map_err(|err| fetch_failed(url, err))?;
    Ok(bytes.to_vec())
}

/// Loads a CSV from an HTTP(S) URL or a local path. A failed fetch is not retried.
pub async fn fetch_csv(location: &str, schema: CsvSchema) -> EpipanelResult<DataFrame> {
    info!("Attempting to load dataframe from {location}");
    let bytes = if is_remote(location) {
        fetch_remote(location).await?
    } else {
        std::fs::read(location).map_err(|err| fetch_failed(location, err))?
    };
    let df = read_csv_bytes(bytes, schema)?;
    debug!("{location}: {:?}", df.schema());
    Ok(df)
}

pub fn read_csv_bytes(bytes: Vec<u8>, schema: CsvSchema) -> EpipanelResult<DataFrame> {
    let infer_schema_length = match schema {
        CsvSchema::AllText => Some(0),
        CsvSchema::Inferred => None,
    };
    Ok(CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(infer_schema_length)
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?)
}

fn canonical_header(header: &str) -> String {
    let header = header.trim().to_lowercase().replace(' ', "_");
    match header.as_str() {
        "province/state" | "province_state" => COL::PROVINCE_OR_STATE.to_string(),
        "country/region" | "country_region" => COL::COUNTRY_OR_REGION.to_string(),
        "lat" => COL::LATITUDE.to_string(),
        "long" | "long_" => COL::LONGITUDE.to_string(),
        _ => header,
    }
}

/// Lower-cases headers, replaces spaces with `_` and renames the upstream identifier headers to
/// the panel's column names.
pub fn normalise_headers(df: &mut DataFrame) -> EpipanelResult<()> {
    let renames = df
        .get_column_names()
        .iter()
        .map(|header| (header.to_string(), canonical_header(header)))
        .filter(|(header, canonical)| header != canonical)
        .collect::<Vec<_>>();
    for (header, canonical) in renames {
        df.rename(&header, &canonical)?;
    }
    Ok(())
}

/// Prepares a wide global matrix for reshaping: canonical headers and numeric coordinates.
/// Coordinates absent from the feed are added as nulls.
pub fn prepare_global(mut wide: DataFrame) -> EpipanelResult<DataFrame> {
    normalise_headers(&mut wide)?;
    require_columns(&wide, &[COL::PROVINCE_OR_STATE, COL::COUNTRY_OR_REGION])?;
    let present = wide
        .get_column_names()
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>();
    let coordinates = [COL::LATITUDE, COL::LONGITUDE]
        .into_iter()
        .map(|c| {
            if present.iter().any(|p| p == c) {
                col(c).cast(DataType::Float64)
            } else {
                lit(Null {}).cast(DataType::Float64).alias(c)
            }
        })
        .collect::<Vec<_>>();
    Ok(wide.lazy().with_columns(coordinates).collect()?)
}

/// Identifying columns of a prepared wide matrix
pub const GLOBAL_IDENTIFIERS: [&str; 4] = [
    COL::PROVINCE_OR_STATE,
    COL::COUNTRY_OR_REGION,
    COL::LATITUDE,
    COL::LONGITUDE,
];

/// Shapes the long per-US-state feed (`date,state,fips,<metric>...`) into a long panel for
/// `metric`: the state becomes the province, the country is set to `country` and coordinates are
/// left null for enrichment.
pub fn us_locality_long(
    mut us: DataFrame,
    metric: &str,
    country: &str,
) -> EpipanelResult<DataFrame> {
    normalise_headers(&mut us)?;
    require_columns(&us, &[COL::DATE, COL::US_STATE, metric])?;
    let dates = parse_date_column(&us, COL::DATE)?;
    us.with_column(dates)?;
    Ok(us
        .lazy()
        .select([
            col(COL::US_STATE)
                .cast(DataType::String)
                .alias(COL::PROVINCE_OR_STATE),
            lit(country).alias(COL::COUNTRY_OR_REGION),
            lit(Null {}).cast(DataType::Float64).alias(COL::LATITUDE),
            lit(Null {}).cast(DataType::Float64).alias(COL::LONGITUDE),
            col(COL::DATE),
            col(metric)
                .cast(DataType::Int64)
                .alias(&COL::running_total(metric)),
        ])
        .collect()?)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::NaiveDate;
    use httpmock::prelude::*;

    use super::*;

    const WIDE: &str = "Province/State,Country/Region,Lat,Long,3/8/20,3/9/20\n\
                        ,France,46.2,2.2,10,12\n\
                        Ontario,Canada,51.2,-85.3,1,3\n";

    #[tokio::test]
    async fn fetches_csv_over_http() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/confirmed.csv");
                then.status(200).body(WIDE);
            })
            .await;
        let df = fetch_csv(&server.url("/confirmed.csv"), CsvSchema::AllText)
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(df.shape(), (2, 6));
        assert_eq!(df.column("3/8/20").unwrap().dtype(), &DataType::String);
    }

    #[tokio::test]
    async fn http_error_status_is_a_failed_fetch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.csv");
                then.status(404);
            })
            .await;
        let err = fetch_csv(&server.url("/missing.csv"), CsvSchema::AllText)
            .await
            .unwrap_err();
        assert!(matches!(err, EpipanelError::FetchFailed { .. }));
    }

    #[tokio::test]
    async fn fetches_csv_from_a_local_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(WIDE.as_bytes()).unwrap();
        let location = file.path().to_string_lossy().to_string();
        let df = fetch_csv(&location, CsvSchema::AllText).await.unwrap();
        assert_eq!(df.height(), 2);

        let err = fetch_csv("/does/not/exist.csv", CsvSchema::AllText)
            .await
            .unwrap_err();
        assert!(matches!(err, EpipanelError::FetchFailed { .. }));
    }

    #[test]
    fn global_headers_are_canonicalised() {
        let wide = read_csv_bytes(WIDE.as_bytes().to_vec(), CsvSchema::AllText).unwrap();
        let wide = prepare_global(wide).unwrap();
        assert_eq!(
            wide.get_column_names(),
            vec![
                COL::PROVINCE_OR_STATE,
                COL::COUNTRY_OR_REGION,
                COL::LATITUDE,
                COL::LONGITUDE,
                "3/8/20",
                "3/9/20"
            ]
        );
        assert_eq!(
            wide.column(COL::LATITUDE).unwrap().f64().unwrap().get(1),
            Some(51.2)
        );
    }

    #[test]
    fn missing_coordinates_are_added_as_nulls() {
        let wide = read_csv_bytes(
            b"Province/State,Country/Region,3/8/20\n,France,10\n".to_vec(),
            CsvSchema::AllText,
        )
        .unwrap();
        let wide = prepare_global(wide).unwrap();
        assert_eq!(wide.column(COL::LONGITUDE).unwrap().null_count(), 1);
    }

    #[test]
    fn us_feed_becomes_a_long_panel_per_metric() {
        let us = read_csv_bytes(
            b"date,state,fips,cases,deaths\n2020-03-08,California,06,88,1\n2020-03-08,District of Columbia,11,1,0\n".to_vec(),
            CsvSchema::AllText,
        )
        .unwrap();
        let deaths = us_locality_long(us, "deaths", "US").unwrap();
        assert_eq!(
            deaths.get_column_names(),
            vec![
                COL::PROVINCE_OR_STATE,
                COL::COUNTRY_OR_REGION,
                COL::LATITUDE,
                COL::LONGITUDE,
                COL::DATE,
                "running_total_deaths"
            ]
        );
        assert_eq!(
            deaths.column(COL::DATE).unwrap().date().unwrap().as_date_iter().next(),
            Some(NaiveDate::from_ymd_opt(2020, 3, 8))
        );
        assert_eq!(
            deaths
                .column("running_total_deaths")
                .unwrap()
                .i64()
                .unwrap()
                .get(0),
            Some(1)
        );
    }
}
