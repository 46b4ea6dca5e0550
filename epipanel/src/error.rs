//! Error types.

use crate::pipeline::Stage;

#[derive(thiserror::Error, Debug)]
pub enum EpipanelError {
    #[error("Wrapped anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    #[error("Wrapped IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Wrapped HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Failed to fetch '{location}': {reason}")]
    FetchFailed { location: String, reason: String },
    #[error("Expected column is absent: {0}")]
    MissingColumn(String),
    #[error("Header is neither a date nor a declared identifying column: {0}")]
    UnparseableHeader(String),
    #[error("Value '{value}' in column '{column}' is not a date")]
    UnparseableDate { column: String, value: String },
    #[error("Reference table not found: {0}")]
    MissingReferenceTable(std::path::PathBuf),
    #[error("Wide matrix has no date columns")]
    NoDateColumns,
    #[error("Join '{join}' changed the row count from {before} to {after}")]
    JoinCardinality {
        join: String,
        before: usize,
        after: usize,
    },
    #[error("{duplicates} duplicate ({key}, date) rows in panel")]
    DuplicateEntityDate { key: String, duplicates: usize },
    #[error("Daily new {metric} does not sum to the latest running total for {entities} entities")]
    InconsistentTotals { metric: String, entities: usize },
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        source: Box<EpipanelError>,
    },
}

impl EpipanelError {
    /// Tag the error with the pipeline stage it escaped from. Already tagged errors keep their
    /// innermost stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            tagged @ EpipanelError::Stage { .. } => tagged,
            other => EpipanelError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }
}

pub type EpipanelResult<T> = Result<T, EpipanelError>;

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_anyhow() {
        let anyhow_error = anyhow!("An anyhow error");
        let error: EpipanelError = anyhow_error.into();
        assert_eq!(error.to_string(), "Wrapped anyhow error: An anyhow error");
    }

    #[test]
    fn stage_tag_names_the_failing_stage() {
        let error = EpipanelError::MissingColumn("date".into()).in_stage(Stage::Delta);
        assert_eq!(
            error.to_string(),
            "Stage 'delta' failed: Expected column is absent: date"
        );
        // Re-tagging keeps the original stage
        let error = error.in_stage(Stage::Merge);
        assert!(matches!(
            error,
            EpipanelError::Stage {
                stage: Stage::Delta,
                ..
            }
        ));
    }
}
