//! Queue entry status definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a queue entry.
///
/// Rows move `New -> Processing -> Done | Failed`; `Failed` rows with
/// remaining attempts re-enter `Processing` through the claim path. Stored as
/// snake_case text in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Freshly published, never claimed
    New,
    /// Claimed and owned by a worker
    Processing,
    /// Delivered to every registered handler
    Done,
    /// Last attempt failed; eligible again once `next_attempt_at` passes
    Failed,
}

impl EntryStatus {
    /// Terminal for retention purposes (claimable FAILED rows are not
    /// terminal until attempts are exhausted, which the claim predicate
    /// decides, not the status)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Entry is owned by a worker right now
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Entry may be selected by a claim call
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::New | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid entry status: {s}")),
        }
    }
}
