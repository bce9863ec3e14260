//! Assignment Reducer
//!
//! The first surviving row per request becomes its assignment; later rows for
//! an already decided request id are skipped.

use rustc_hash::FxHashSet;

use super::transfertool::CompatibleCandidate;
use crate::core_types::{RequestId, RseId};

/// Provisional source choice for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub request_id: RequestId,
    pub dest_rse_id: RseId,
    pub source_rse_id: RseId,
    pub account: String,
    pub activity: String,
    pub transfertools: String,
}

impl From<CompatibleCandidate> for Assignment {
    fn from(c: CompatibleCandidate) -> Self {
        Self {
            request_id: c.row.request_id,
            dest_rse_id: c.row.dest_rse_id,
            source_rse_id: c.row.source_rse_id,
            account: c.row.account,
            activity: c.row.activity,
            transfertools: c.transfertools,
        }
    }
}

/// Outcome of reducing one batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reduction {
    /// In the order the winning rows were seen (closest first)
    pub assigned: Vec<Assignment>,
    /// Batch requests for which no row survived, in batch order
    pub sourceless: Vec<RequestId>,
}

/// Pick the first row per request; everything else in `batch` is sourceless
///
/// Rows for request ids outside `batch` are ignored.
pub fn reduce_assignments<I>(batch: &[RequestId], candidates: I) -> Reduction
where
    I: IntoIterator<Item = CompatibleCandidate>,
{
    let pending: FxHashSet<RequestId> = batch.iter().copied().collect();
    let mut decided: FxHashSet<RequestId> = FxHashSet::default();
    let mut assigned = Vec::new();

    for candidate in candidates {
        let request_id = candidate.row.request_id;
        if !pending.contains(&request_id) || !decided.insert(request_id) {
            continue;
        }
        assigned.push(Assignment::from(candidate));
    }

    let sourceless = batch
        .iter()
        .copied()
        .filter(|id| !decided.contains(id))
        .collect();

    Reduction {
        assigned,
        sourceless,
    }
}
