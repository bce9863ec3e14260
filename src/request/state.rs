//! Request Lifecycle States
//!
//! State IDs are stored in PostgreSQL as SMALLINT.

use std::fmt;

/// Transfer request lifecycle states
///
/// ```text
/// PREPARING ─┬─▶ QUEUED ──▶ SUBMITTING ──▶ SUBMITTED ──▶ DONE | FAILED | LOST
///            ├─▶ WAITING ─▶ (released by the throttler) ─▶ QUEUED
///            └─▶ NO_SOURCES
/// ```
///
/// The preparer only ever moves requests out of PREPARING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum RequestState {
    /// Awaiting source selection and admission
    Preparing = 0,

    /// Admitted, waiting for submission to a transfertool
    Queued = 10,

    /// Source selected but the throttling limit for its key is exhausted
    Waiting = 15,

    /// Being handed to the transfertool
    Submitting = 20,

    /// Running on the transfertool
    Submitted = 30,

    /// Terminal: transfer finished successfully
    Done = 40,

    /// No reachable replica with a common transfertool
    NoSources = -5,

    /// Terminal: transfer failed
    Failed = -10,

    /// Terminal: transfertool lost track of the transfer
    Lost = -20,

    /// Terminal: submission was rejected
    SubmissionFailed = -30,
}

impl RequestState {
    pub const ALL: [RequestState; 10] = [
        RequestState::Preparing,
        RequestState::Queued,
        RequestState::Waiting,
        RequestState::Submitting,
        RequestState::Submitted,
        RequestState::Done,
        RequestState::NoSources,
        RequestState::Failed,
        RequestState::Lost,
        RequestState::SubmissionFailed,
    ];

    /// States that occupy a slot against a transfer limit
    pub const ADMITTED: [RequestState; 3] = [
        RequestState::Queued,
        RequestState::Submitting,
        RequestState::Submitted,
    ];

    /// Check if the request counts against a throttling limit
    #[inline]
    pub fn is_admitted(&self) -> bool {
        Self::ADMITTED.contains(self)
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Preparing => "PREPARING",
            RequestState::Queued => "QUEUED",
            RequestState::Waiting => "WAITING",
            RequestState::Submitting => "SUBMITTING",
            RequestState::Submitted => "SUBMITTED",
            RequestState::Done => "DONE",
            RequestState::NoSources => "NO_SOURCES",
            RequestState::Failed => "FAILED",
            RequestState::Lost => "LOST",
            RequestState::SubmissionFailed => "SUBMISSION_FAILED",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for RequestState {
    type Error = crate::error::PreparerError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        RequestState::from_id(value).ok_or(crate::error::PreparerError::InvalidState(value))
    }
}
