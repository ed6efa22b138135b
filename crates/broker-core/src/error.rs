//! Error types for the swing trading agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad symbol, quantity, or order shape. Rejected before any gateway call.
    #[error("validation error: {0}")]
    Validation(String),

    /// An external brokerage or data call failed, or reported failure.
    /// The operation that hit it is abandoned for the current tick.
    #[error("gateway error: {message}")]
    Gateway { message: String },

    /// Not enough market history to compute an indicator. Callers fall back
    /// to fixed-percentage behavior; never fatal.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// Invalid or unsafe configuration. Fatal at startup.
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors the control loop absorbs at the tick boundary
    /// rather than propagating.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Gateway { .. } | Error::InsufficientData(_) | Error::Validation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
