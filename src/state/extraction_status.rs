/// Status definitions for per-URL extraction rows
///
/// An extraction moves `pending -> processing -> {success | failed | retrying}`
/// and a retrying row goes back to `processing` when its backoff elapses.
use std::fmt;

/// Represents the current status of one URL's extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionStatus {
    // ===== Active States =====
    /// Row created, no attempt made yet
    Pending,

    /// An attempt is in flight
    Processing,

    /// Last attempt failed transiently; another attempt is scheduled
    Retrying,

    // ===== Terminal States =====
    /// Content was retrieved
    Success,

    /// Failed terminally (client error, unclassified error or exhausted retries)
    Failed,

    /// Excluded from processing
    Skipped,
}

impl ExtractionStatus {
    /// Returns true if no further attempt will be made for this row
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// Returns true if the row still has work outstanding
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if a worker may claim this row for a new attempt
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }

    /// Checks whether moving from `self` to `next` is a legal transition
    ///
    /// `Failed -> Retrying` is only legal through an explicit reopen of the
    /// owning session.
    pub fn can_transition_to(&self, next: ExtractionStatus) -> bool {
        use ExtractionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Retrying, Processing)
                | (Processing, Success)
                | (Processing, Failed)
                | (Processing, Retrying)
                | (Failed, Retrying)
                | (Pending, Skipped)
        )
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "retrying" => Some(Self::Retrying),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Returns all possible extraction statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Processing,
            Self::Retrying,
            Self::Success,
            Self::Failed,
            Self::Skipped,
        ]
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
