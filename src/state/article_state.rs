/// Article state definitions for tracking crawl progress
///
/// This module defines all possible states an article can be in within a
/// single store.
use std::fmt;

/// Represents the current state of an article in the crawl process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleState {
    // ===== Active States =====
    /// Article is known (usually as a link target) but not queued here,
    /// either because another shard owns it or it has not been promoted yet
    Discovered,

    /// Article is owned by this shard and waiting to be fetched
    Queued,

    /// Article has been claimed by the crawl loop and is being fetched
    InProgress,

    // ===== Terminal States =====
    /// Outbound links were fetched and persisted
    Processed,

    /// Fetch failed permanently (or retries were exhausted); never retried
    Failed,
}

impl ArticleState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }

    /// Value of the stored `processed` flag for this state
    ///
    /// Failed articles count as processed-but-empty.
    pub fn processed_flag(&self) -> bool {
        self.is_terminal()
    }

    /// Ordering used when two stores disagree about the same title
    ///
    /// Higher rank wins a merge. `InProgress` is never trusted outside the
    /// worker that set it, so it ranks the same as `Queued`.
    pub fn merge_rank(&self) -> u8 {
        match self {
            Self::Discovered => 1,
            Self::Queued | Self::InProgress => 2,
            Self::Failed => 3,
            Self::Processed => 4,
        }
    }

    /// The state a merged store records for an input row in this state
    pub fn for_merge(&self) -> Self {
        match self {
            Self::InProgress => Self::Queued,
            other => *other,
        }
    }

    /// Converts the article state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Parses an article state from its database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "queued" => Some(Self::Queued),
            "in_progress" => Some(Self::InProgress),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible article states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Discovered,
            Self::Queued,
            Self::InProgress,
            Self::Processed,
            Self::Failed,
        ]
    }
}

impl fmt::Display for ArticleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
