use std::fmt;

#[derive(Debug)]
pub enum LimiterError {
    InvalidCredential,
    Blocked,
    LimitExceeded,
    StoreUnavailable(String),
    Config(String),
    Internal(String),
}

impl fmt::Display for LimiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterError::InvalidCredential => write!(f, "invalid credential"),
            LimiterError::Blocked => write!(f, "source address blocked"),
            LimiterError::LimitExceeded => write!(f, "rate limit exceeded"),
            LimiterError::StoreUnavailable(msg) => write!(f, "store unavailable: {}", msg),
            LimiterError::Config(msg) => write!(f, "config error: {}", msg),
            LimiterError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for LimiterError {}

impl LimiterError {
    /// Machine-readable code emitted in rejection bodies.
    pub fn code(&self) -> &'static str {
        match self {
            LimiterError::InvalidCredential => "invalid_credential",
            LimiterError::Blocked => "blocked",
            LimiterError::LimitExceeded => "rate_limited",
            LimiterError::StoreUnavailable(_) => "store_unavailable",
            LimiterError::Config(_) => "config_invalid",
            LimiterError::Internal(_) => "internal",
        }
    }
}
