use std::fmt;

/// Category recorded in an extraction's `error_type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Attempt exceeded its deadline
    Timeout,
    /// Peer reset the connection mid-request
    ConnectionReset,
    /// Connection could not be established (refused, DNS, TLS)
    ConnectionFailed,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    ServerError,
    /// HTTP 4xx other than 429
    ClientError,
    /// A status outside the 2xx/4xx/5xx ranges
    InvalidResponse,
    /// The process stopped while the attempt was in flight
    Interrupted,
    /// The session failed before the row could finish
    Aborted,
    Unknown,
}

impl ErrorType {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection_reset",
            Self::ConnectionFailed => "connection_failed",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::InvalidResponse => "invalid_response",
            Self::Interrupted => "interrupted",
            Self::Aborted => "aborted",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(Self::Timeout),
            "connection_reset" => Some(Self::ConnectionReset),
            "connection_failed" => Some(Self::ConnectionFailed),
            "rate_limited" => Some(Self::RateLimited),
            "server_error" => Some(Self::ServerError),
            "client_error" => Some(Self::ClientError),
            "invalid_response" => Some(Self::InvalidResponse),
            "interrupted" => Some(Self::Interrupted),
            "aborted" => Some(Self::Aborted),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
