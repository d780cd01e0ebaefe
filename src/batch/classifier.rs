//! Maps fetch outcomes to success, retryable failure or terminal failure
//!
//! | Outcome | Classification |
//! |---------|----------------|
//! | HTTP 2xx | Success |
//! | HTTP 429 | Retryable (`rate_limited`) |
//! | HTTP 5xx | Retryable (`server_error`) |
//! | HTTP 4xx other than 429 | Terminal (`client_error`) |
//! | Any other status | Terminal (`invalid_response`) |
//! | Timeout | Retryable (`timeout`) |
//! | Connection reset | Retryable (`connection_reset`) |
//! | Connect failure (refused, DNS, TLS) | Terminal (`connection_failed`) |
//! | Anything else | Terminal (`unknown`) |

use crate::fetch::{FetchOutcome, TransportErrorKind};
use crate::state::ErrorType;

/// Result of classifying one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Transient failure eligible for another attempt
    Retryable(ErrorType),
    /// Failure that must not consume retry budget
    Terminal(ErrorType),
}

impl Classification {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn error_type(&self) -> Option<ErrorType> {
        match self {
            Self::Success => None,
            Self::Retryable(kind) | Self::Terminal(kind) => Some(*kind),
        }
    }
}

/// Classifies an HTTP status code
pub fn classify_status(status: u16) -> Classification {
    match status {
        200..=299 => Classification::Success,
        429 => Classification::Retryable(ErrorType::RateLimited),
        500..=599 => Classification::Retryable(ErrorType::ServerError),
        400..=499 => Classification::Terminal(ErrorType::ClientError),
        _ => Classification::Terminal(ErrorType::InvalidResponse),
    }
}

/// Classifies the outcome of a page fetch
pub fn classify(outcome: &FetchOutcome) -> Classification {
    match outcome {
        FetchOutcome::Page(page) => classify_status(page.status),
        FetchOutcome::Rejected { status, .. } => classify_status(*status),
        FetchOutcome::Transport { kind, .. } => match kind {
            TransportErrorKind::Timeout => Classification::Retryable(ErrorType::Timeout),
            TransportErrorKind::ConnectionReset => {
                Classification::Retryable(ErrorType::ConnectionReset)
            }
            TransportErrorKind::ConnectionFailed => {
                Classification::Terminal(ErrorType::ConnectionFailed)
            }
            TransportErrorKind::Other => Classification::Terminal(ErrorType::Unknown),
        },
    }
}
