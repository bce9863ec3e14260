//! Preparation pass
//!
//! One pass takes a bounded batch of PREPARING requests and moves each of them
//! to QUEUED, WAITING or NO_SOURCES:
//!
//! ```text
//! lock batch -> candidates -> rank -> transfertool filter -> reduce -> admit -> write
//! ```
//!
//! [`Preparer::run_once`] runs inside a transaction owned by the caller.
//! [`Preparer::run_pass`] owns the transaction itself and commits only when
//! every write of the pass succeeded.

pub mod candidate;
pub mod ranking;
pub mod reducer;
pub mod transfertool;

pub use candidate::{CandidateRow, resolve_candidates};
pub use ranking::sort_by_minimum_distance;
pub use reducer::{Assignment, Reduction, reduce_assignments};
pub use transfertool::{
    CompatibleCandidate, TransfertoolCache, TransfertoolFilter, TransfertoolResolver,
    TransfertoolSet,
};

use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::{PreparerConfig, WaitingAssignmentPolicy};
use crate::core_types::RequestId;
use crate::db::Database;
use crate::error::PreparerError;
use crate::logging::PASS_TARGET;
use crate::request::{RequestState, RequestUpdate};
use crate::store::{PgSession, PreparerStore};
use crate::throttler::{Admission, Throttler};

/// Counts of one pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// PREPARING requests locked for this pass
    pub requests: usize,
    /// Candidate rows before filtering
    pub candidates: usize,
    pub queued: usize,
    pub waiting: usize,
    pub no_sources: usize,
    /// Writes rejected because the request had already left PREPARING
    pub skipped: usize,
}

impl PassSummary {
    pub fn is_noop(&self) -> bool {
        self.requests == 0
    }

    fn record(&mut self, state: RequestState) {
        match state {
            RequestState::Queued => self.queued += 1,
            RequestState::Waiting => self.waiting += 1,
            RequestState::NoSources => self.no_sources += 1,
            _ => {}
        }
    }
}

/// Request preparer
pub struct Preparer {
    config: PreparerConfig,
    transfertools: TransfertoolResolver,
}

impl Preparer {
    pub fn new(config: PreparerConfig) -> Self {
        let transfertools = TransfertoolResolver::new(
            config.default_transfertools.iter().cloned(),
            config.attribute_cache_ttl_secs,
        );
        Self {
            config,
            transfertools,
        }
    }

    pub fn transfertools(&self) -> &TransfertoolResolver {
        &self.transfertools
    }

    /// Run one pass against an open session; the caller commits
    pub async fn run_once<S>(&self, store: &mut S) -> Result<PassSummary, PreparerError>
    where
        S: PreparerStore + ?Sized,
    {
        let span = info_span!(target: PASS_TARGET, "preparer", bulk = self.config.bulk);
        self.prepare(store).instrument(span).await
    }

    /// Run one pass in its own transaction
    ///
    /// Any error drops the transaction, so nothing of a failed pass is visible.
    pub async fn run_pass(&self, db: &Database) -> Result<PassSummary, PreparerError> {
        let mut tx = db.pool().begin().await?;
        let summary = {
            let mut session = PgSession::new(&mut tx);
            self.run_once(&mut session).await?
        };
        tx.commit().await?;
        Ok(summary)
    }

    async fn prepare<S>(&self, store: &mut S) -> Result<PassSummary, PreparerError>
    where
        S: PreparerStore + ?Sized,
    {
        let mut summary = PassSummary::default();

        let requests = store.lock_preparing_requests(self.config.bulk).await?;
        if requests.is_empty() {
            debug!("No PREPARING requests");
            return Ok(summary);
        }
        summary.requests = requests.len();
        let batch: Vec<RequestId> = requests.iter().map(|r| r.id).collect();

        let rows = store.list_candidates(&batch).await?;
        summary.candidates = rows.len();

        let tools = self.transfertools.prefetch(store, &rows).await?;
        let defaults = self.transfertools.defaults();
        let filter = TransfertoolFilter::new(|rse_id| {
            tools.get(&rse_id).cloned().unwrap_or_else(|| defaults.clone())
        });
        let reduction = reduce_assignments(&batch, filter.apply(sort_by_minimum_distance(rows)));

        let throttler = Throttler::load(store, self.config.throttler_mode.as_deref()).await?;

        for assignment in &reduction.assigned {
            let admission = throttler.decide(store, assignment).await?;
            let state = admission.state();
            let update = match state {
                RequestState::Queued => RequestUpdate::queued(
                    assignment.request_id,
                    assignment.source_rse_id,
                    assignment.transfertools.clone(),
                ),
                _ => match self.config.waiting_assignment {
                    WaitingAssignmentPolicy::Persist => RequestUpdate::waiting(
                        assignment.request_id,
                        Some((assignment.source_rse_id, assignment.transfertools.clone())),
                    ),
                    WaitingAssignmentPolicy::StateOnly => {
                        RequestUpdate::waiting(assignment.request_id, None)
                    }
                },
            };

            if !store.update_request(&update).await? {
                warn!(request_id = %assignment.request_id, "Request left PREPARING, skipping");
                summary.skipped += 1;
                continue;
            }
            summary.record(state);

            match &admission {
                Admission::Throttled { active, limit } => debug!(
                    request_id = %assignment.request_id,
                    source = %assignment.source_rse_id,
                    active,
                    max_transfers = limit.max_transfers,
                    "Request throttled"
                ),
                _ => debug!(
                    request_id = %assignment.request_id,
                    source = %assignment.source_rse_id,
                    transfertools = %assignment.transfertools,
                    "Request queued"
                ),
            }
        }

        for &request_id in &reduction.sourceless {
            if !store
                .update_request(&RequestUpdate::no_sources(request_id))
                .await?
            {
                warn!(request_id = %request_id, "Request left PREPARING, skipping");
                summary.skipped += 1;
                continue;
            }
            summary.record(RequestState::NoSources);
            debug!(request_id = %request_id, "No usable source");
        }

        info!(
            requests = summary.requests,
            candidates = summary.candidates,
            queued = summary.queued,
            waiting = summary.waiting,
            no_sources = summary.no_sources,
            skipped = summary.skipped,
            throttler_mode = throttler.mode().map(|m| m.as_str()).unwrap_or("none"),
            "Preparation pass finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Did;
    use crate::request::TransferRequest;
    use crate::store::MemoryStore;

    fn preparer() -> Preparer {
        Preparer::new(PreparerConfig::default())
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = PassSummary::default();
        assert!(summary.is_noop());

        summary.requests = 3;
        summary.record(RequestState::Queued);
        summary.record(RequestState::Waiting);
        summary.record(RequestState::NoSources);
        summary.record(RequestState::Done);

        assert!(!summary.is_noop());
        assert_eq!(
            (summary.queued, summary.waiting, summary.no_sources),
            (1, 1, 1)
        );
    }

    #[tokio::test]
    async fn test_empty_pass_is_noop() {
        let store = MemoryStore::new();
        let mut session = store.begin();

        let summary = preparer().run_once(&mut session).await.unwrap();

        assert!(summary.is_noop());
        assert_eq!(session.pending_updates(), 0);
    }

    #[tokio::test]
    async fn test_pass_writes_through_session() {
        let store = MemoryStore::new();
        let src = store.add_rse("SRC");
        let dst = store.add_rse("DST");
        let did = Did::new("mock", "file");
        store.add_replica(&did, src);
        store.add_distance(src, dst, 1);
        let req = store.add_request(TransferRequest::new(did, dst, "root"));

        let mut session = store.begin();
        let summary = preparer().run_once(&mut session).await.unwrap();
        assert_eq!(summary.queued, 1);
        assert_eq!(store.request(req).unwrap().state, RequestState::Preparing);

        session.commit().unwrap();
        let committed = store.request(req).unwrap();
        assert_eq!(committed.state, RequestState::Queued);
        assert_eq!(committed.source_rse_id, Some(src));
        assert_eq!(committed.transfertool.as_deref(), Some("fts3,globus"));
    }

    #[tokio::test]
    async fn test_bulk_bounds_batch() {
        let store = MemoryStore::new();
        let dst = store.add_rse("DST");
        for i in 0..3 {
            store.add_request(TransferRequest::new(
                Did::new("mock", format!("file-{}", i)),
                dst,
                "root",
            ));
        }

        let preparer = Preparer::new(PreparerConfig {
            bulk: 2,
            ..PreparerConfig::default()
        });
        let mut session = store.begin();
        let summary = preparer.run_once(&mut session).await.unwrap();

        assert_eq!(summary.requests, 2);
        assert_eq!(summary.no_sources, 2);
    }
}
