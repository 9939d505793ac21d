use thiserror::Error;

#[derive(Debug, Error)]
pub enum RustPoolError {
    #[error("dial to {address} failed: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("maximum retry exceeded for {address} ({retries} failed attempts)")]
    RetryExhausted { address: String, retries: u32 },

    #[error("timed out waiting for a connection to {address}")]
    AcquireTimeout { address: String },

    #[error("acquire cancelled by caller")]
    Cancelled,

    #[error("connection to {address} does not belong to this pool")]
    UnknownAddress { address: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RustPoolError>;
