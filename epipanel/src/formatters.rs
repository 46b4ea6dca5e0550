use std::io::{Cursor, Write};

use anyhow::{anyhow, Result};
use enum_dispatch::enum_dispatch;
use polars::export::arrow::temporal_conversions::date32_to_date;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Utility function to convert from polars `AnyValue` to `serde_json::Value`
/// Doesn't cover all types but those a panel holds.
fn any_value_to_json(value: &AnyValue) -> Result<Value> {
    match value {
        AnyValue::Null => Ok(Value::Null),
        AnyValue::Boolean(b) => Ok(Value::Bool(*b)),
        AnyValue::String(s) => Ok(Value::String((*s).to_string())),
        AnyValue::StringOwned(s) => Ok(Value::String(s.to_string())),
        AnyValue::Int32(n) => Ok(json!(*n)),
        AnyValue::Int64(n) => Ok(json!(*n)),
        AnyValue::UInt32(n) => Ok(json!(*n)),
        AnyValue::UInt64(n) => Ok(json!(*n)),
        AnyValue::Float32(n) => Ok(json!(*n)),
        AnyValue::Float64(n) => Ok(json!(*n)),
        AnyValue::Date(d) => Ok(json!(date32_to_date(*d).to_string())),
        _ => Err(anyhow!("Failed to convert type")),
    }
}

/// Trait to define different output generators. `save` writes the serialized `DataFrame` to a
/// writer and `format` returns it as a string.
#[enum_dispatch]
pub trait OutputGenerator {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()>;
    fn format(&self, df: &mut DataFrame) -> Result<String> {
        let mut data: Vec<u8> = vec![];
        let mut buff = Cursor::new(&mut data);
        self.save(&mut buff, df)?;

        Ok(String::from_utf8(data)?)
    }
}

/// Enum of OutputFormatters one for each potential output type
#[enum_dispatch(OutputGenerator)]
#[derive(Serialize, Deserialize, Debug)]
pub enum OutputFormatter {
    Csv(CSVFormatter),
    JsonLines(JsonLinesFormatter),
}

/// Format the panel as CSV with dates written as `YYYY-MM-DD`
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct CSVFormatter;

impl OutputGenerator for CSVFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        CsvWriter::new(writer)
            .with_date_format(Some("%Y-%m-%d".into()))
            .finish(df)?;
        Ok(())
    }
}

/// Format the panel as one JSON object per row, keys in column order
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct JsonLinesFormatter;

impl OutputGenerator for JsonLinesFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        for idx in 0..df.height() {
            let mut row = serde_json::Map::new();
            for column in df.get_columns() {
                row.insert(
                    column.name().to_string(),
                    any_value_to_json(&column.get(idx)?)?,
                );
            }
            writeln!(writer, "{}", Value::Object(row))?;
        }
        Ok(())
    }
}
