use epipanel::error::EpipanelError;
use polars::error::PolarsError;

#[derive(thiserror::Error, Debug)]
pub enum EpipanelCliError {
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("serde JSON error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("TOML serialisation error: {0}")]
    TomlSerError(#[from] toml::ser::Error),
    #[error("TOML config error: {0}")]
    TomlDeError(#[from] toml::de::Error),
    #[error("polars error: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("{0}")]
    EpipanelError(#[from] EpipanelError),
    #[error("std IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Panel check failed: {0}")]
    CheckFailed(String),
}

pub type EpipanelCliResult<T> = Result<T, EpipanelCliError>;
