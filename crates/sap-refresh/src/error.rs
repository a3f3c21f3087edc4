//! Error types for report refresh sessions.

use std::path::PathBuf;

use thiserror::Error;

use crate::host::HostError;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Couldn't connect to {host}:{port} after {attempts} attempts: {source}")]
    Connectivity {
        host: String,
        port: u16,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't start the spreadsheet application: {0}")]
    AutomationUnavailable(#[source] HostError),

    #[error("Couldn't open workbook {path}: {source}")]
    WorkbookOpen {
        path: PathBuf,
        #[source]
        source: HostError,
    },

    #[error("SAP add-in {0} is not connected")]
    PluginNotConnected(String),

    #[error("SAP AfO functions are not available (stray Excel process?): {0}")]
    DataSourceDiscovery(#[source] HostError),

    #[error("Couldn't login in SAP AfO for data source {0}")]
    LogonFailed(String),

    #[error("Couldn't refresh the SAP AfO workbook")]
    RefreshFailed,

    #[error("Couldn't refresh the data source {0}")]
    RefreshDataFailed(String),

    #[error("{command} failed for field {field}")]
    RestrictionFailed { command: String, field: String },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("{operation} requires {required}")]
    Precondition {
        operation: &'static str,
        required: &'static str,
    },

    #[error("Automation call {call} failed: {source}")]
    Automation {
        call: String,
        #[source]
        source: HostError,
    },

    #[error("Unexpected result from {call}: {detail}")]
    UnexpectedResult { call: String, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Couldn't write {path}: {message}")]
    Export { path: PathBuf, message: String },

    #[error("Couldn't send notification: {0}")]
    Notify(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RefreshError {
    pub(crate) fn automation(call: impl Into<String>) -> impl FnOnce(HostError) -> Self {
        let call = call.into();
        move |source| RefreshError::Automation { call, source }
    }

    pub(crate) fn precondition(operation: &'static str, required: &'static str) -> Self {
        RefreshError::Precondition {
            operation,
            required,
        }
    }
}

pub type Result<T> = std::result::Result<T, RefreshError>;
