use uuid::Uuid;

/// Errors raised by the market data feed and its upstream sources
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    /// Credentials rejected. Fatal, never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("connection error: {0}")]
    Connection(String),

    /// A single malformed quote. The tick is dropped and the loop continues.
    #[error("malformed tick: {0}")]
    DataFormat(String),

    #[error("streaming not supported by this source")]
    StreamingUnsupported,

    #[error("upstream session expired")]
    SessionExpired,

    /// Scripted sources ran out of ticks
    #[error("end of tick stream")]
    EndOfStream,

    #[error("feed is not connected")]
    NotConnected,
}

impl FeedError {
    /// Errors that must stop the session instead of being recovered locally
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FeedError::Authentication(_) | FeedError::EndOfStream | FeedError::NotConnected
        )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FeedError::DataFormat(err.to_string())
        } else {
            FeedError::Connection(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Connection(err.to_string())
    }
}

/// Position lifecycle violations. The rejected operation leaves state unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositionError {
    #[error("position {id} is already open")]
    AlreadyOpen { id: Uuid },

    #[error("no open position")]
    NoOpenPosition,

    #[error("invalid quantity {quantity} (remaining {remaining})")]
    InvalidQuantity { quantity: u64, remaining: u64 },

    #[error("invalid price {0}")]
    InvalidPrice(f64),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration value {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures of the best-effort snapshot store. Logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("redis connection timeout after {0} seconds")]
    Timeout(u64),
}

/// Top-level error type for the trading engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid tick: {0}")]
    InvalidTick(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
