//! Candidate Source Resolver
//!
//! Joins PREPARING requests with the replicas of their file and the distance
//! table into flat candidate rows, one per viable (request, source) pair.

use rustc_hash::FxHashMap;

use crate::catalog::{DistanceTable, Replica, ReplicaState, StorageEndpoint};
use crate::core_types::{Did, Ranking, RequestId, RseId};
use crate::request::{RequestState, TransferRequest};

/// One viable source for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRow {
    pub request_id: RequestId,
    pub did: Did,
    pub dest_rse_id: RseId,
    pub account: String,
    pub activity: String,
    pub source_rse_id: RseId,
    pub ranking: Ranking,
}

/// In-memory version of the candidate join
///
/// A replica yields a row when it is AVAILABLE, its endpoint is readable and
/// a distance exists from its endpoint to the request's destination.
/// Requests not in PREPARING are skipped. Rows are emitted in request order,
/// then replica order.
pub fn resolve_candidates(
    requests: &[TransferRequest],
    endpoints: &FxHashMap<RseId, StorageEndpoint>,
    replicas: &[Replica],
    distances: &DistanceTable,
) -> Vec<CandidateRow> {
    let mut by_did: FxHashMap<&Did, Vec<&Replica>> = FxHashMap::default();
    for replica in replicas {
        if replica.state == ReplicaState::Available {
            by_did.entry(&replica.did).or_default().push(replica);
        }
    }

    let mut rows = Vec::new();
    for request in requests {
        if request.state != RequestState::Preparing {
            continue;
        }
        let Some(sources) = by_did.get(&request.did) else {
            continue;
        };
        for replica in sources {
            let readable = endpoints
                .get(&replica.rse_id)
                .is_some_and(StorageEndpoint::is_readable);
            if !readable {
                continue;
            }
            if let Some(ranking) = distances.get(replica.rse_id, request.dest_rse_id) {
                rows.push(CandidateRow {
                    request_id: request.id,
                    did: request.did.clone(),
                    dest_rse_id: request.dest_rse_id,
                    account: request.account.clone(),
                    activity: request.activity.clone(),
                    source_rse_id: replica.rse_id,
                    ranking,
                });
            }
        }
    }
    rows
}
