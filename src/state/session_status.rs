use serde::Serialize;
use std::fmt;

/// Lifecycle status of an extraction session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Work is outstanding or running
    InProgress,

    /// Every extraction reached a terminal status (failures included)
    Completed,

    /// The batch could not be dispatched at all
    Failed,

    /// Stopped by an explicit cancel; pending rows are left untouched
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// Checks whether moving from `self` to `next` is a legal transition
    ///
    /// Terminal sessions only return to `InProgress` through an explicit
    /// reopen, which callers request with `reopen = true`.
    pub fn can_transition_to(&self, next: SessionStatus, reopen: bool) -> bool {
        match (self, next) {
            (Self::InProgress, next) => next.is_terminal(),
            (Self::Completed | Self::Cancelled, Self::InProgress) => reopen,
            _ => false,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
