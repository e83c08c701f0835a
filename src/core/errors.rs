use thiserror::Error;

/// Errors surfaced by the client. Every variant maps to a stable machine
/// code via [`DxtradeError::code`]; distinguished errors cross layer
/// boundaries unchanged.
#[derive(Error, Debug)]
pub enum DxtradeError {
    #[error("No active session. Call login() and fetch_csrf() or connect() first.")]
    NoSession,

    #[error("Login failed: {status}")]
    LoginFailed { status: u16 },

    #[error("Login error: {0}")]
    LoginError(String),

    #[error("CSRF token not found")]
    CsrfNotFound,

    #[error("CSRF fetch error: {0}")]
    CsrfError(String),

    #[error("Error switching account: {0}")]
    AccountSwitchError(String),

    #[error("Stream handshake timed out")]
    HandshakeTimeout,

    #[error("Rate limited by the gateway (HTTP 429)")]
    RateLimited,

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Error submitting order: {0}")]
    OrderError(String),

    #[error("Order update timed out")]
    OrderTimeout,

    #[error("Position close error: {0}")]
    PositionCloseError(String),

    #[error("Position close confirmation timed out")]
    PositionCloseTimeout,

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Streaming requires a persistent session. Call connect() first.")]
    StreamRequiresConnect,

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Stream transport error: {0}")]
    Transport(String),

    #[error("No symbol suggestions found")]
    NoSuggestions,

    #[error("No symbol info returned")]
    NoSymbolInfo,

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("{0}")]
    Other(String),
}

impl DxtradeError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSession => "NO_SESSION",
            Self::LoginFailed { .. } => "LOGIN_FAILED",
            Self::LoginError(_) => "LOGIN_ERROR",
            Self::CsrfNotFound => "CSRF_NOT_FOUND",
            Self::CsrfError(_) => "CSRF_ERROR",
            Self::AccountSwitchError(_) => "ACCOUNT_SWITCH_ERROR",
            Self::HandshakeTimeout => "HANDSHAKE_TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::OrderRejected(_) => "ORDER_REJECTED",
            Self::OrderError(_) => "ORDER_ERROR",
            Self::OrderTimeout => "ORDER_TIMEOUT",
            Self::PositionCloseError(_) => "POSITION_CLOSE_ERROR",
            Self::PositionCloseTimeout => "POSITION_CLOSE_TIMEOUT",
            Self::PositionNotFound(_) => "POSITION_NOT_FOUND",
            Self::StreamRequiresConnect => "STREAM_REQUIRES_CONNECT",
            Self::Timeout(_) => "TIMEOUT",
            Self::HttpStatus { .. } => "HTTP_STATUS",
            Self::HttpError(_) => "HTTP_ERROR",
            Self::JsonError(_) => "JSON_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::NoSuggestions => "NO_SUGGESTIONS",
            Self::NoSymbolInfo => "NO_SYMBOL_INFO",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Other(_) => "OTHER",
        }
    }

    /// Whether this variant is one of the distinguished errors that must
    /// pass through domain boundaries without re-wrapping.
    pub fn is_distinguished(&self) -> bool {
        !matches!(
            self,
            Self::HttpStatus { .. } | Self::HttpError(_) | Self::JsonError(_) | Self::Transport(_)
        )
    }
}
