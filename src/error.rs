use thiserror::Error;

#[derive(Error, Debug)]
pub enum StockWatchError {
    #[error("Quote fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures of a single quote request. All of them are transient from the
/// poller's point of view.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request for {symbol} failed: {source}")]
    Network {
        symbol: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("quote request for {symbol} returned HTTP {status}: {body}")]
    Status {
        symbol: String,
        status: u16,
        body: String,
    },

    #[error("empty or unsupported-symbol response for {symbol}: {body}")]
    Unsupported { symbol: String, body: String },

    #[error("malformed quote payload for {symbol}: {source}")]
    Malformed {
        symbol: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no usable price ('c' and 'pc' missing or zero) for {symbol}")]
    MissingPrice { symbol: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdParseError {
    #[error("threshold '{0}' is missing the '@' separator")]
    MissingSeparator(String),

    #[error("unknown threshold condition '{0}'")]
    UnknownCondition(String),

    #[error("threshold value '{0}' is not a finite number")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, StockWatchError>;
