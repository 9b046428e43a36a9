use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration value: {0}")]
    InvalidSetting(String),

    #[error("unsupported spreadsheet format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to read spreadsheet: {0}")]
    Spreadsheet(String),

    #[error("spreadsheet has no data rows")]
    EmptySheet,

    #[error("column not found in spreadsheet: {0}")]
    UnknownColumn(String),

    #[error("no company name column selected")]
    NameColumnNotSelected,

    #[error("an enrichment run is already in progress")]
    AlreadyRunning,

    #[error("no spreadsheet loaded")]
    EmptyTable,

    #[error("enrichment run abandoned: the table was replaced or cleared")]
    RunAbandoned,

    #[error("enrichment worker stopped unexpectedly")]
    WorkerPanicked,

    #[error("failed to start enrichment worker: {0}")]
    WorkerSpawn(String),

    #[error("enrichment client panicked: {0}")]
    ClientPanicked(String),

    #[error("enrichment endpoint request failed: {0}")]
    EndpointHttp(String),

    #[error("enrichment endpoint returned status {status}: {message}")]
    EndpointStatus { status: u16, message: String },

    #[error("unexpected enrichment endpoint response: {0}")]
    EndpointResponse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("server error: {0}")]
    Server(String),
}
