//! Error types for the collaborator seams around the core.
//!
//! The simulation itself never fails; these cover data loading, strategy
//! conversion and request validation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing column '{0}' in CSV header")]
    MissingColumn(&'static str),

    #[error("Invalid value '{value}' in column '{column}' (row {row})")]
    InvalidValue {
        column: &'static str,
        value: String,
        row: usize,
    },

    #[error("Unparseable timestamp '{0}'")]
    Timestamp(String),

    #[error("No data available for symbol {0}")]
    UnknownSymbol(String),

    #[error("Unsupported timeframe '{0}'")]
    Timeframe(String),

    #[error("Dataset for {0} is empty")]
    Empty(String),
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Strategy service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Strategy service response had no content")]
    EmptyResponse,

    #[error("Malformed strategy JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Missing API key for strategy service")]
    MissingApiKey,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("Backtest task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type EngineResult<T> = Result<T, EngineError>;
