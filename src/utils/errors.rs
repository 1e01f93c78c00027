#![forbid(unsafe_code)]

use poem_openapi::Object;
use thiserror::Error;

/// Error enumerates the errors returned by this application.
#[derive(Error, Debug)]
pub enum Errors {
    /// Input parameter logging.
    #[error("hello_server input parameters:\n{}", .0)]
    InputParms(String),

    /// Inaccessible logger configuration file.
    #[error("Unable to access the Log4rs configuration file: {}", .0)]
    Log4rsInitialization(String),

    #[error("Reading application configuration file: {}", .0)]
    ReadingConfigFile(String),

    #[error("Unable to parse TOML file: {}", .0)]
    TOMLParseError(String),

    #[error("Invalid configuration: {}", .0)]
    InvalidConfig(String),

    /// Path names are restricted to ASCII below DEL.
    #[error("Invalid name, only ASCII characters are allowed: {:?}", .0)]
    InvalidName(String),

    #[error("Telemetry initialization failed: {}", .0)]
    TelemetryInit(String),

    #[error("Database error: {}", .0)]
    DBError(String),
}

// ***************************************************************************
//                               HttpResult
// ***************************************************************************
/// Body of every non-200 response.
#[derive(Object, Debug)]
pub struct HttpResult {
    pub result_code: String,
    pub result_msg: String,
}

impl HttpResult {
    pub fn new(result_code: String, result_msg: String) -> Self {
        Self { result_code, result_msg }
    }
}
