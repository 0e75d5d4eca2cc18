use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The price feed could not be established or was lost. Fatal to the run.
    #[error("Price feed error: {0}")]
    Feed(String),

    /// Balance lookup failed. The event that needed it is abandoned.
    #[error("Balance fetch failed: {0}")]
    BalanceFetch(String),

    /// Order submission failed. Position changes made before it stand.
    #[error("Order execution failed: {0}")]
    Execution(String),

    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Only a lost feed ends the run; everything else is reported per event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Feed(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
