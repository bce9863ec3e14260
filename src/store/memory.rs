//! In-process catalog
//!
//! Backs dry runs and the test suite. A [`MemorySession`] behaves like a
//! PostgreSQL transaction for the operations the preparer uses:
//! - writes are journaled and only become visible on [`MemorySession::commit`];
//!   dropping a session discards them
//! - locked PREPARING requests are skipped by other open sessions
//! - locking a transfer limit held by another open session fails with
//!   [`PreparerError::Conflict`] instead of blocking
//!
//! The last point differs from PostgreSQL, where the second `FOR UPDATE`
//! waits for the first transaction and then counts its admissions. Scenario
//! tests of competing passes (`test_concurrent_sessions_serialize_on_limit`)
//! assert the `Conflict`; the blocking path is covered by
//! `test_racing_passes_respect_limit` in the PostgreSQL store.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::PreparerStore;
use crate::catalog::{DistanceTable, Replica, ReplicaState, StorageEndpoint};
use crate::core_types::{Did, Ranking, RequestId, RseId};
use crate::error::PreparerError;
use crate::preparer::candidate::{CandidateRow, resolve_candidates};
use crate::request::{RequestState, RequestUpdate, TransferRequest};
use crate::throttler::{LimitStrategy, ThrottleDirection, ThrottleKey, TransferLimit};

type LimitKey = (RseId, String);

/// Committed catalog contents
#[derive(Debug, Default, Clone)]
pub struct MemoryCatalog {
    pub endpoints: FxHashMap<RseId, StorageEndpoint>,
    pub replicas: Vec<Replica>,
    pub distances: DistanceTable,
    /// Insertion order
    pub requests: Vec<TransferRequest>,
    pub limits: FxHashMap<LimitKey, TransferLimit>,
    pub config: FxHashMap<(String, String), String>,
}

impl MemoryCatalog {
    pub fn request(&self, id: RequestId) -> Option<&TransferRequest> {
        self.requests.iter().find(|r| r.id == id)
    }

    fn request_mut(&mut self, id: RequestId) -> Option<&mut TransferRequest> {
        self.requests.iter_mut().find(|r| r.id == id)
    }
}

#[derive(Debug, Default)]
struct Shared {
    catalog: MemoryCatalog,
    request_locks: FxHashMap<RequestId, u64>,
    limit_locks: FxHashMap<LimitKey, u64>,
    /// Fail `update_request` once a session has journaled this many updates
    fail_after_updates: Option<usize>,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared in-memory catalog handle; clones point at the same catalog
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session (transaction)
    pub fn begin(&self) -> MemorySession {
        MemorySession {
            shared: Arc::clone(&self.shared),
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            journal: Vec::new(),
            overlay: FxHashMap::default(),
        }
    }

    /// Read the committed catalog
    pub fn with_catalog<T>(&self, f: impl FnOnce(&MemoryCatalog) -> T) -> T {
        f(&lock(&self.shared).catalog)
    }

    fn with_catalog_mut<T>(&self, f: impl FnOnce(&mut MemoryCatalog) -> T) -> T {
        f(&mut lock(&self.shared).catalog)
    }

    pub fn request(&self, id: RequestId) -> Option<TransferRequest> {
        self.with_catalog(|c| c.request(id).cloned())
    }

    pub fn add_rse(&self, name: &str) -> RseId {
        self.add_endpoint(StorageEndpoint::new(name))
    }

    pub fn add_endpoint(&self, endpoint: StorageEndpoint) -> RseId {
        let id = endpoint.id;
        self.with_catalog_mut(|c| c.endpoints.insert(id, endpoint));
        id
    }

    /// Mark an endpoint deleted; its replicas stop being candidates
    pub fn del_rse(&self, rse_id: RseId) {
        self.with_catalog_mut(|c| {
            if let Some(rse) = c.endpoints.get_mut(&rse_id) {
                rse.deleted = true;
            }
        });
    }

    pub fn add_rse_attribute(&self, rse_id: RseId, key: &str, value: &str) {
        self.with_catalog_mut(|c| {
            if let Some(rse) = c.endpoints.get_mut(&rse_id) {
                rse.attributes.insert(key.to_string(), value.to_string());
            }
        });
    }

    pub fn add_replica(&self, did: &Did, rse_id: RseId) {
        self.add_replica_with_state(did, rse_id, ReplicaState::Available);
    }

    pub fn add_replica_with_state(&self, did: &Did, rse_id: RseId, state: ReplicaState) {
        self.with_catalog_mut(|c| {
            c.replicas.push(Replica {
                did: did.clone(),
                rse_id,
                state,
            })
        });
    }

    pub fn delete_replicas(&self, did: &Did, rse_id: RseId) {
        self.with_catalog_mut(|c| {
            c.replicas
                .retain(|r| !(r.did == *did && r.rse_id == rse_id))
        });
    }

    pub fn add_distance(&self, src_rse_id: RseId, dest_rse_id: RseId, ranking: Ranking) {
        self.with_catalog_mut(|c| c.distances.insert(src_rse_id, dest_rse_id, ranking));
    }

    pub fn add_request(&self, request: TransferRequest) -> RequestId {
        let id = request.id;
        self.with_catalog_mut(|c| c.requests.push(request));
        id
    }

    pub fn set_rse_transfer_limits(
        &self,
        rse_id: RseId,
        activity: &str,
        max_transfers: u64,
        strategy: LimitStrategy,
    ) {
        let limit = TransferLimit {
            rse_id,
            activity: activity.to_string(),
            max_transfers,
            strategy,
        };
        self.with_catalog_mut(|c| c.limits.insert((rse_id, activity.to_string()), limit));
    }

    pub fn config_set(&self, section: &str, option: &str, value: &str) {
        self.with_catalog_mut(|c| {
            c.config
                .insert((section.to_string(), option.to_string()), value.to_string())
        });
    }

    pub fn config_remove(&self, section: &str, option: &str) {
        self.with_catalog_mut(|c| c.config.remove(&(section.to_string(), option.to_string())));
    }

    /// Make every session fail its `n+1`-th update with a database error
    pub fn fail_updates_after(&self, n: Option<usize>) {
        lock(&self.shared).fail_after_updates = n;
    }
}

/// One transaction against a [`MemoryStore`]
pub struct MemorySession {
    shared: Arc<Mutex<Shared>>,
    id: u64,
    journal: Vec<RequestUpdate>,
    overlay: FxHashMap<RequestId, RequestUpdate>,
}

impl MemorySession {
    /// Publish journaled updates and release locks
    ///
    /// Returns the number of requests changed.
    pub fn commit(mut self) -> Result<usize, PreparerError> {
        let journal = std::mem::take(&mut self.journal);
        let mut shared = lock(&self.shared);
        let mut applied = 0;
        for update in &journal {
            if let Some(request) = shared.catalog.request_mut(update.request_id)
                && request.state == RequestState::Preparing
            {
                request.apply(update);
                applied += 1;
            }
        }
        debug!(session = self.id, applied, "Memory session committed");
        Ok(applied)
    }

    /// Number of updates waiting for commit
    pub fn pending_updates(&self) -> usize {
        self.journal.len()
    }

    fn effective(&self, request: &TransferRequest) -> (RequestState, Option<RseId>) {
        match self.overlay.get(&request.id) {
            Some(update) => (update.state, update.source_rse_id),
            None => (request.state, request.source_rse_id),
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let id = self.id;
        let mut shared = lock(&self.shared);
        shared.request_locks.retain(|_, owner| *owner != id);
        shared.limit_locks.retain(|_, owner| *owner != id);
    }
}

#[async_trait]
impl PreparerStore for MemorySession {
    async fn lock_preparing_requests(
        &mut self,
        limit: usize,
    ) -> Result<Vec<TransferRequest>, PreparerError> {
        let mut shared = lock(&self.shared);

        let mut preparing: Vec<TransferRequest> = shared
            .catalog
            .requests
            .iter()
            .filter(|r| self.effective(r).0 == RequestState::Preparing)
            .filter(|r| {
                shared
                    .request_locks
                    .get(&r.id)
                    .is_none_or(|owner| *owner == self.id)
            })
            .cloned()
            .collect();
        preparing.sort_by_key(|r| r.requested_at);
        preparing.truncate(limit);

        for request in &preparing {
            shared.request_locks.insert(request.id, self.id);
        }
        Ok(preparing)
    }

    async fn list_candidates(
        &mut self,
        request_ids: &[RequestId],
    ) -> Result<Vec<CandidateRow>, PreparerError> {
        let shared = lock(&self.shared);
        let catalog = &shared.catalog;

        let requests: Vec<TransferRequest> = request_ids
            .iter()
            .filter_map(|id| catalog.request(*id))
            .filter(|r| self.effective(r).0 == RequestState::Preparing)
            .cloned()
            .collect();

        Ok(resolve_candidates(
            &requests,
            &catalog.endpoints,
            &catalog.replicas,
            &catalog.distances,
        ))
    }

    async fn rse_attribute(
        &mut self,
        rse_id: RseId,
        key: &str,
    ) -> Result<Option<String>, PreparerError> {
        let shared = lock(&self.shared);
        Ok(shared
            .catalog
            .endpoints
            .get(&rse_id)
            .and_then(|rse| rse.attributes.get(key).cloned()))
    }

    async fn config_value(
        &mut self,
        section: &str,
        option: &str,
    ) -> Result<Option<String>, PreparerError> {
        let shared = lock(&self.shared);
        Ok(shared
            .catalog
            .config
            .get(&(section.to_string(), option.to_string()))
            .cloned())
    }

    async fn lock_transfer_limit(
        &mut self,
        key: &ThrottleKey,
    ) -> Result<Option<TransferLimit>, PreparerError> {
        let limit_key = (key.rse_id, key.limit_activity().to_string());
        let mut shared = lock(&self.shared);

        let Some(limit) = shared.catalog.limits.get(&limit_key).cloned() else {
            return Ok(None);
        };
        match shared.limit_locks.get(&limit_key) {
            Some(owner) if *owner != self.id => Err(PreparerError::Conflict(format!(
                "transfer limit {} is locked by another transaction",
                key
            ))),
            _ => {
                shared.limit_locks.insert(limit_key, self.id);
                Ok(Some(limit))
            }
        }
    }

    async fn count_admitted(&mut self, key: &ThrottleKey) -> Result<u64, PreparerError> {
        let shared = lock(&self.shared);
        let count = shared
            .catalog
            .requests
            .iter()
            .filter(|r| {
                let (state, source) = self.effective(r);
                if !state.is_admitted() {
                    return false;
                }
                let on_key = match key.direction {
                    ThrottleDirection::Destination => r.dest_rse_id == key.rse_id,
                    ThrottleDirection::Source => source == Some(key.rse_id),
                };
                on_key && key.activity.as_ref().is_none_or(|a| *a == r.activity)
            })
            .count();
        Ok(count as u64)
    }

    async fn update_request(&mut self, update: &RequestUpdate) -> Result<bool, PreparerError> {
        let shared = lock(&self.shared);
        if let Some(n) = shared.fail_after_updates
            && self.journal.len() >= n
        {
            return Err(PreparerError::Database(format!(
                "injected failure after {} updates",
                n
            )));
        }

        let Some(request) = shared.catalog.request(update.request_id) else {
            return Ok(false);
        };
        if self.effective(request).0 != RequestState::Preparing {
            return Ok(false);
        }
        drop(shared);

        self.overlay.insert(update.request_id, update.clone());
        self.journal.push(update.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_request() -> (MemoryStore, RequestId, RseId) {
        let store = MemoryStore::new();
        let dest = store.add_rse("MOCK");
        let id = store.add_request(TransferRequest::new(Did::new("mock", "f"), dest, "root"));
        (store, id, dest)
    }

    #[tokio::test]
    async fn test_updates_invisible_until_commit() {
        let (store, id, _) = store_with_request();
        let mut session = store.begin();

        assert!(session.update_request(&RequestUpdate::no_sources(id)).await.unwrap());
        assert_eq!(session.pending_updates(), 1);
        assert_eq!(store.request(id).unwrap().state, RequestState::Preparing);

        assert_eq!(session.commit().unwrap(), 1);
        assert_eq!(store.request(id).unwrap().state, RequestState::NoSources);
    }

    #[tokio::test]
    async fn test_drop_discards_updates() {
        let (store, id, _) = store_with_request();
        {
            let mut session = store.begin();
            session.update_request(&RequestUpdate::no_sources(id)).await.unwrap();
        }
        assert_eq!(store.request(id).unwrap().state, RequestState::Preparing);
    }

    #[tokio::test]
    async fn test_second_update_of_same_request_is_rejected() {
        let (store, id, _) = store_with_request();
        let mut session = store.begin();

        assert!(session.update_request(&RequestUpdate::no_sources(id)).await.unwrap());
        assert!(!session.update_request(&RequestUpdate::no_sources(id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_locked_requests_are_skipped_by_other_sessions() {
        let (store, id, _) = store_with_request();
        let mut first = store.begin();
        let mut second = store.begin();

        let locked = first.lock_preparing_requests(10).await.unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].id, id);
        assert!(second.lock_preparing_requests(10).await.unwrap().is_empty());

        drop(first);
        assert_eq!(second.lock_preparing_requests(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_limit_lock_conflict() {
        let (store, _, dest) = store_with_request();
        store.set_rse_transfer_limits(dest, "default", 1, LimitStrategy::Fifo);
        let key = ThrottleKey {
            direction: ThrottleDirection::Destination,
            rse_id: dest,
            activity: Some("default".into()),
        };

        let mut first = store.begin();
        let mut second = store.begin();
        assert!(first.lock_transfer_limit(&key).await.unwrap().is_some());
        let err = second.lock_transfer_limit(&key).await.unwrap_err();
        assert!(err.is_transient());

        first.commit().unwrap();
        assert!(second.lock_transfer_limit(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_injected_update_failure() {
        let (store, id, _) = store_with_request();
        store.fail_updates_after(Some(0));
        let mut session = store.begin();

        let err = session
            .update_request(&RequestUpdate::no_sources(id))
            .await
            .unwrap_err();
        assert!(matches!(err, PreparerError::Database(_)));
    }
}
