use thiserror::Error;

/// Schema recovery failures that callers need to tell apart: a grid with no
/// recognizable header row yields nothing, and a grid whose header cannot be
/// keyed by facility id cannot be joined against the other sources.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("no header row found in grid `{grid}`")]
    NoHeaderRow { grid: String },

    #[error("no facility id column found in grid `{grid}`")]
    NoFacilityIdColumn { grid: String },
}
