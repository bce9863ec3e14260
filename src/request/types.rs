//! Request records as read from and written to the catalog

use chrono::{DateTime, Utc};

use super::state::RequestState;
use crate::core_types::{Did, RequestId, RseId};

/// Activity label used when a request does not name one
pub const DEFAULT_ACTIVITY: &str = "default";

/// A transfer request row
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub id: RequestId,
    pub did: Did,
    pub dest_rse_id: RseId,
    pub account: String,
    pub activity: String,
    pub state: RequestState,
    pub source_rse_id: Option<RseId>,
    pub transfertool: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl TransferRequest {
    /// New request in PREPARING state
    pub fn new(did: Did, dest_rse_id: RseId, account: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            did,
            dest_rse_id,
            account: account.into(),
            activity: DEFAULT_ACTIVITY.to_string(),
            state: RequestState::Preparing,
            source_rse_id: None,
            transfertool: None,
            requested_at: Utc::now(),
        }
    }

    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = activity.into();
        self
    }

    pub fn with_state(mut self, state: RequestState) -> Self {
        self.state = state;
        self
    }

    /// Apply a state transition decided by the preparer
    pub fn apply(&mut self, update: &RequestUpdate) {
        self.state = update.state;
        self.source_rse_id = update.source_rse_id;
        self.transfertool = update.transfertool.clone();
    }
}

/// State transition out of PREPARING
///
/// `source_rse_id` / `transfertool` are `None` either because the request has
/// no source (NO_SOURCES) or because the waiting-assignment policy keeps the
/// provisional choice out of the catalog. In both cases the columns are
/// cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUpdate {
    pub request_id: RequestId,
    pub state: RequestState,
    pub source_rse_id: Option<RseId>,
    pub transfertool: Option<String>,
}

impl RequestUpdate {
    pub fn queued(request_id: RequestId, source_rse_id: RseId, transfertool: String) -> Self {
        Self {
            request_id,
            state: RequestState::Queued,
            source_rse_id: Some(source_rse_id),
            transfertool: Some(transfertool),
        }
    }

    pub fn waiting(request_id: RequestId, assignment: Option<(RseId, String)>) -> Self {
        let (source_rse_id, transfertool) = match assignment {
            Some((rse, tool)) => (Some(rse), Some(tool)),
            None => (None, None),
        };
        Self {
            request_id,
            state: RequestState::Waiting,
            source_rse_id,
            transfertool,
        }
    }

    pub fn no_sources(request_id: RequestId) -> Self {
        Self {
            request_id,
            state: RequestState::NoSources,
            source_rse_id: None,
            transfertool: None,
        }
    }
}
